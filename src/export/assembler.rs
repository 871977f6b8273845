use super::manifest::ExportManifest;
use crate::error::PlanError;
use crate::payload::FieldValue;
use crate::planner::{PlannedRecord, PlannerResult, Provenance};
use crate::request_key::RequestKey;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// One exported record. Every value comes from the same cache entry or live
/// call, so the row carries a single provenance and fetch time.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub key: RequestKey,
    /// Field values in selection order
    pub values: Vec<(String, FieldValue)>,
    pub provenance: Provenance,
    pub fetched_at: DateTime<Utc>,
}

impl ExportRow {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOutcome {
    pub rows: Vec<ExportRow>,
    pub manifest: ExportManifest,
}

impl ExportOutcome {
    pub fn has_failures(&self) -> bool {
        self.manifest.failed_count() > 0
    }
}

/// Build rows for `fields` from planner results, keeping their order.
///
/// Failed results and records missing a selected field are left out of the
/// rows and reported in the manifest instead.
pub fn assemble(fields: &[String], results: Vec<PlannerResult>) -> ExportOutcome {
    let mut outcome = ExportOutcome::default();

    for result in results {
        let row = result
            .outcome
            .and_then(|planned| build_row(&result.key, fields, planned));
        match row {
            Ok(row) => {
                outcome.manifest.record_success(row.key.clone(), row.provenance);
                outcome.rows.push(row);
            }
            Err(e) => {
                warn!(target: "export", "Dropping row {}: {}", result.key.scope_label(), e);
                outcome.manifest.record_failure(result.key, &e);
            }
        }
    }

    info!(
        target: "export",
        "Assembled {} rows ({} failed)",
        outcome.rows.len(),
        outcome.manifest.failed_count()
    );
    outcome
}

fn build_row(
    key: &RequestKey,
    fields: &[String],
    planned: PlannedRecord,
) -> Result<ExportRow, PlanError> {
    let payload = &planned.entry.payload;
    let missing: Vec<String> = fields
        .iter()
        .filter(|f| !payload.contains(f))
        .cloned()
        .collect();
    if !missing.is_empty() {
        debug!(target: "export", "{} lacks {:?}", key, missing);
        return Err(PlanError::IncompleteRecord { missing });
    }

    let values = fields
        .iter()
        .filter_map(|f| payload.get(f).map(|v| (f.clone(), v.clone())))
        .collect();

    Ok(ExportRow {
        key: key.clone(),
        values,
        provenance: planned.provenance,
        fetched_at: planned.fetched_at(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::error::LiveCallError;
    use crate::payload::Payload;
    use std::sync::Arc;

    fn fields() -> Vec<String> {
        vec!["name".to_string(), "price".to_string()]
    }

    fn key(id: &str) -> RequestKey {
        RequestKey::new("Projects/GetProject", fields(), [("id", id)])
    }

    fn planned(id: &str, payload: Payload, provenance: Provenance) -> PlannerResult {
        PlannerResult {
            key: key(id),
            outcome: Ok(PlannedRecord {
                entry: Arc::new(CacheEntry::new(key(id), payload, Utc::now())),
                provenance,
            }),
        }
    }

    fn full_payload(name: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert("name", FieldValue::Text(name.to_string()));
        payload.insert("price", FieldValue::from(1200));
        payload.insert("stage", FieldValue::Text("Won".to_string()));
        payload
    }

    #[test]
    fn test_rows_follow_result_order_and_field_order() {
        let results = vec![
            planned("2", full_payload("Beta"), Provenance::Live),
            planned("1", full_payload("Alpha"), Provenance::Cached),
        ];
        let outcome = assemble(&fields(), results);
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.rows[0].get("name"), Some(&FieldValue::Text("Beta".into())));
        assert_eq!(outcome.rows[1].provenance, Provenance::Cached);
        let names: Vec<&str> = outcome.rows[0].values.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["name", "price"]);
        assert!(!outcome.has_failures());
    }

    #[test]
    fn test_failures_are_reported_not_emitted() {
        let mut partial = Payload::new();
        partial.insert("name", FieldValue::Text("Gamma".to_string()));

        let results = vec![
            planned("1", full_payload("Alpha"), Provenance::Live),
            PlannerResult {
                key: key("2"),
                outcome: Err(PlanError::Live(LiveCallError::RateLimited)),
            },
            planned("3", partial, Provenance::Live),
        ];
        let outcome = assemble(&fields(), results);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.manifest.failed_count(), 2);
        assert_eq!(outcome.manifest.succeeded_count(), 1);

        let failed: Vec<_> = outcome.manifest.failures().collect();
        assert_eq!(failed[0].0, &key("2"));
        assert!(failed[1].1.contains("price"));
    }

    #[test]
    fn test_empty_results() {
        let outcome = assemble(&fields(), Vec::new());
        assert!(outcome.rows.is_empty());
        assert!(outcome.manifest.is_empty());
    }
}
