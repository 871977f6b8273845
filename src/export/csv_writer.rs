use super::assembler::ExportRow;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Column layout of an exported CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvLayout {
    /// Header text per selected field, in selection order
    pub headers: Vec<String>,
    /// Append `provenance` and `fetched_at` columns
    pub include_provenance: bool,
}

impl CsvLayout {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            include_provenance: false,
        }
    }

    pub fn with_provenance(mut self, include: bool) -> Self {
        self.include_provenance = include;
        self
    }

    fn header_record(&self) -> Vec<String> {
        let mut record = self.headers.clone();
        if self.include_provenance {
            record.push("provenance".to_string());
            record.push("fetched_at".to_string());
        }
        record
    }
}

/// Write `rows` as CSV to any writer. Returns the number of rows written.
pub fn write_csv<W: Write>(writer: W, layout: &CsvLayout, rows: &[ExportRow]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(layout.header_record())?;

    for row in rows {
        let mut record: Vec<String> = row.values.iter().map(|(_, v)| v.to_string()).collect();
        if layout.include_provenance {
            record.push(row.provenance.to_string());
            record.push(row.fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(rows.len())
}

/// Write `rows` to `path`, creating parent directories as needed.
pub fn write_csv_file(path: &Path, layout: &CsvLayout, rows: &[ExportRow]) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let written = write_csv(file, layout, rows)?;
    info!(target: "export", "Wrote {} rows to {}", written, path.display());
    Ok(written)
}

/// `<dir>/<prefix>_<DDMonthYYYY>_<HHMMSS>.csv`
pub fn timestamped_file_name(dir: &Path, prefix: &str, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}_{}.csv", prefix, now.format("%d%B%Y_%H%M%S")))
}
