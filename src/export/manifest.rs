use crate::error::PlanError;
use crate::planner::Provenance;
use crate::request_key::RequestKey;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

#[derive(Debug, Clone, PartialEq)]
pub enum RowStatus {
    Exported(Provenance),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub key: RequestKey,
    pub status: RowStatus,
}

/// Outcome of every requested record, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportManifest {
    entries: Vec<ManifestEntry>,
}

impl ExportManifest {
    pub fn record_success(&mut self, key: RequestKey, provenance: Provenance) {
        self.entries.push(ManifestEntry {
            key,
            status: RowStatus::Exported(provenance),
        });
    }

    pub fn record_failure(&mut self, key: RequestKey, error: &PlanError) {
        self.entries.push(ManifestEntry {
            key,
            status: RowStatus::Failed(error.to_string()),
        });
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn succeeded_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, RowStatus::Exported(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries.len() - self.succeeded_count()
    }

    /// Count of exported rows with the given provenance.
    pub fn count_from(&self, provenance: Provenance) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == RowStatus::Exported(provenance))
            .count()
    }

    /// Failed keys with their reasons.
    pub fn failures(&self) -> impl Iterator<Item = (&RequestKey, &str)> {
        self.entries.iter().filter_map(|e| match &e.status {
            RowStatus::Failed(reason) => Some((&e.key, reason.as_str())),
            RowStatus::Exported(_) => None,
        })
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows exported ({} cached, {} live), {} failed",
            self.succeeded_count(),
            self.count_from(Provenance::Cached),
            self.count_from(Provenance::Live),
            self.failed_count()
        )
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Record").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
            Cell::new("Detail").add_attribute(Attribute::Bold),
        ]);

        for entry in &self.entries {
            let (status, detail) = match &entry.status {
                RowStatus::Exported(provenance) => {
                    (Cell::new("ok").fg(Color::Green), Cell::new(provenance))
                }
                RowStatus::Failed(reason) => {
                    (Cell::new("failed").fg(Color::Red), Cell::new(reason))
                }
            };
            table.add_row(vec![Cell::new(entry.key.scope_label()), status, detail]);
        }
        table
    }
}
