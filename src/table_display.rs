use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use crossterm::style::Stylize;
use dtools_export::cache::{CacheStats, EntrySummary};
use dtools_export::export::ExportRow;

pub fn display_rows(rows: &[ExportRow], headers: &[String]) {
    if rows.is_empty() {
        println!("{}", "No rows exported.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let mut header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
        .collect();
    header_cells.push(Cell::new("source").add_attribute(Attribute::Bold));
    table.set_header(header_cells);

    for row in rows {
        let mut cells: Vec<String> = row.values.iter().map(|(_, v)| v.to_string()).collect();
        cells.push(row.provenance.to_string());
        table.add_row(cells);
    }

    println!("{table}");
}

pub fn display_cache_entries(entries: &[EntrySummary]) {
    if entries.is_empty() {
        println!("{}", "Cache is empty.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Endpoint").add_attribute(Attribute::Bold),
        Cell::new("Record").add_attribute(Attribute::Bold),
        Cell::new("Fields").add_attribute(Attribute::Bold),
        Cell::new("Fetched").add_attribute(Attribute::Bold),
        Cell::new("Size").add_attribute(Attribute::Bold),
    ]);

    for entry in entries {
        let fields: Vec<&str> = entry.key.fields().iter().map(String::as_str).collect();
        table.add_row(vec![
            entry.key.endpoint().to_string(),
            entry.key.scope_label(),
            fields.join(", "),
            entry.fetched_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{} B", entry.size_bytes),
        ]);
    }

    println!("{table}");
    println!("\n{}", format!("{} entries", entries.len()).green());
}

pub fn display_cache_stats(stats: &CacheStats) {
    println!("{}", "Cache Statistics".blue().bold());
    println!("  Entries:   {}", stats.total_entries);
    println!("  Size:      {}", stats.format_size());
    if stats.discarded_entries > 0 {
        println!(
            "  Discarded: {}",
            stats.discarded_entries.to_string().yellow()
        );
    }
    if let Some(oldest) = stats.oldest_entry {
        println!("  Oldest:    {}", oldest.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(newest) = stats.newest_entry {
        println!("  Newest:    {}", newest.format("%Y-%m-%d %H:%M:%S"));
    }
}
