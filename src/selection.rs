use crate::request_key::RequestKey;
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;

/// Scope parameters identifying one record, e.g. `id=42`.
pub type RecordScope = BTreeMap<String, String>;

/// One requested record. `endpoint` overrides the selection's endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedRecord {
    pub endpoint: Option<String>,
    pub scope: RecordScope,
}

/// Fields and records the user picked for one export.
///
/// Field order is kept as picked since it becomes the column order of the
/// export; the request keys derived from it are order-independent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    endpoint: String,
    fields: Vec<String>,
    records: Vec<SelectedRecord>,
}

impl Selection {
    pub fn new<I, S>(endpoint: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut picked: Vec<String> = Vec::new();
        for field in fields {
            let field = field.as_ref().trim();
            if !field.is_empty() && !picked.iter().any(|f| f == field) {
                picked.push(field.to_string());
            }
        }
        Self {
            endpoint: endpoint.trim().to_string(),
            fields: picked,
            records: Vec::new(),
        }
    }

    pub fn with_record<I, K, V>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.add_record(scope.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn add_record(&mut self, scope: RecordScope) {
        self.records.push(SelectedRecord {
            endpoint: None,
            scope,
        });
    }

    /// Add a record fetched from `endpoint` instead of the selection's.
    pub fn add_routed_record(&mut self, endpoint: &str, scope: RecordScope) {
        self.records.push(SelectedRecord {
            endpoint: Some(endpoint.trim().to_string()),
            scope,
        });
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn records(&self) -> &[SelectedRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() || self.records.is_empty()
    }

    /// One key per record, in the order the records were requested.
    pub fn request_keys(&self) -> Vec<RequestKey> {
        self.records
            .iter()
            .map(|record| {
                let endpoint = record.endpoint.as_deref().unwrap_or(&self.endpoint);
                RequestKey::new(endpoint, &self.fields, &record.scope)
            })
            .collect()
    }
}

/// Parse `id=42` or `id=42&stage=Won` into a record scope.
pub fn parse_record_scope(text: &str) -> Result<RecordScope> {
    let mut scope = RecordScope::new();
    for pair in text.split('&').filter(|p| !p.trim().is_empty()) {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid record scope '{}': expected name=value", pair))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Invalid record scope '{}': empty parameter name", pair));
        }
        scope.insert(name.to_string(), value.trim().to_string());
    }
    if scope.is_empty() {
        return Err(anyhow!("Record scope '{}' is empty", text));
    }
    Ok(scope)
}
