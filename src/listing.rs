//! Record listing and stage routing
//!
//! `export --all` asks a list endpoint which records exist, then fetches each
//! record from the endpoint that matches its stage. The list response is
//! planned like any other call, so it is cached under its own request key and
//! the run's freshness policy decides whether a stored copy may be reused.

use crate::payload::{FieldValue, Payload};
use crate::planner::{CallPlanner, PlanOptions, Provenance, RunControl};
use crate::request_key::MULTI_VALUE_SEPARATOR;
use crate::selection::{RecordScope, Selection};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

/// The list call, e.g. `Opportunities/GetOpportunities?stages=..&page=1`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub endpoint: String,
    /// Response field holding the record array
    pub field: String,
    pub stages: Vec<String>,
    pub sort: Option<String>,
    pub page_size: u32,
}

impl ListQuery {
    fn scope(&self) -> RecordScope {
        let mut scope = RecordScope::new();
        scope.insert("page".to_string(), "1".to_string());
        scope.insert("pageSize".to_string(), self.page_size.to_string());
        if let Some(sort) = &self.sort {
            scope.insert("sort".to_string(), sort.clone());
        }
        if !self.stages.is_empty() {
            let separator = MULTI_VALUE_SEPARATOR.to_string();
            scope.insert("stages".to_string(), self.stages.join(&separator));
        }
        scope
    }

    /// Single-record selection whose request key identifies this listing.
    pub fn selection(&self) -> Selection {
        let mut selection = Selection::new(&self.endpoint, [&self.field]);
        selection.add_record(self.scope());
        selection
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedRecord {
    pub id: String,
    pub stage: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub records: Vec<ListedRecord>,
    pub provenance: Provenance,
    pub fetched_at: DateTime<Utc>,
}

/// Picks the detail endpoint for a listed record from its stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRouting {
    pub won_stage: String,
    pub won_endpoint: String,
    pub other_endpoint: String,
}

impl StageRouting {
    pub fn endpoint_for(&self, stage: Option<&str>) -> &str {
        match stage {
            Some(stage) if stage == self.won_stage => &self.won_endpoint,
            _ => &self.other_endpoint,
        }
    }

    /// Selection of `fields` for every listed record, each routed by stage.
    /// Listing order is kept.
    pub fn selection<I, S>(&self, fields: I, records: &[ListedRecord]) -> Selection
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selection = Selection::new(&self.other_endpoint, fields);
        for record in records {
            let endpoint = self.endpoint_for(record.stage.as_deref());
            selection.add_routed_record(endpoint, id_scope(&record.id));
        }
        selection
    }
}

/// Selection of `fields` for every listed record, all from `endpoint`.
pub fn selection_at<I, S>(endpoint: &str, fields: I, records: &[ListedRecord]) -> Selection
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    records
        .iter()
        .fold(Selection::new(endpoint, fields), |mut selection, record| {
            selection.add_record(id_scope(&record.id));
            selection
        })
}

fn id_scope(id: &str) -> RecordScope {
    RecordScope::from([("id".to_string(), id.to_string())])
}

/// Read the record array out of a list response. Items without an id are
/// skipped.
pub fn parse_listing(payload: &Payload, field: &str) -> Result<Vec<ListedRecord>> {
    let items: Vec<Value> = match payload.get(field) {
        Some(FieldValue::Text(text)) => serde_json::from_str(text)
            .with_context(|| format!("List field '{}' is not a JSON array", field))?,
        Some(FieldValue::Null) => Vec::new(),
        Some(other) => return Err(anyhow!("List field '{}' holds {:?}, not an array", field, other)),
        None => return Err(anyhow!("List response has no '{}' field", field)),
    };

    let mut records = Vec::with_capacity(items.len());
    for item in &items {
        let id = match item.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                warn!(target: "listing", "Skipping listed item without an id: {}", item);
                continue;
            }
        };
        let stage = item.get("stage").and_then(Value::as_str).map(str::to_string);
        records.push(ListedRecord { id, stage });
    }
    Ok(records)
}

/// Fetch the record list through `planner`.
pub async fn list_records(
    planner: &CallPlanner,
    query: &ListQuery,
    options: &PlanOptions,
    control: &RunControl,
) -> Result<Listing> {
    let selection = query.selection();
    let result = planner
        .plan(&selection, options, control)
        .await
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Record list was not planned"))?;

    let planned = result
        .outcome
        .map_err(|e| anyhow!("Unable to retrieve record list from {}: {}", query.endpoint, e))?;
    let records = parse_listing(&planned.entry.payload, &query.field)?;

    info!(
        target: "listing",
        "Listed {} records from {} ({})",
        records.len(),
        query.endpoint,
        planned.provenance
    );
    debug!(target: "listing", "Listing key {}", result.key);

    Ok(Listing {
        records,
        provenance: planned.provenance,
        fetched_at: planned.fetched_at(),
    })
}
