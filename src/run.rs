//! One export run from selection to CSV file.

use crate::api::UsageLedger;
use crate::export::{assemble, write_csv_file, CsvLayout, ExportOutcome};
use crate::listing::{self, ListQuery, Listing};
use crate::planner::{CallPlanner, PlanOptions, PlannerStats, RunControl};
use crate::selection::Selection;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub selection: Selection,
    pub options: PlanOptions,
    pub layout: CsvLayout,
    /// CSV destination; rows are only assembled when unset
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub outcome: ExportOutcome,
    pub output: Option<PathBuf>,
    pub rows_written: usize,
    pub stats: PlannerStats,
    pub usage_summary: Option<String>,
}

pub struct ExportRun {
    planner: CallPlanner,
    usage: Option<Arc<Mutex<UsageLedger>>>,
}

impl ExportRun {
    pub fn new(planner: CallPlanner) -> Self {
        Self {
            planner,
            usage: None,
        }
    }

    /// Save this ledger when the run ends.
    pub fn with_usage(mut self, usage: Arc<Mutex<UsageLedger>>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn planner(&self) -> &CallPlanner {
        &self.planner
    }

    /// Fetch the record list. Saves the call ledger when this fails.
    pub async fn list_records(
        &self,
        query: &ListQuery,
        options: &PlanOptions,
        control: &RunControl,
    ) -> Result<Listing> {
        let listed = listing::list_records(&self.planner, query, options, control).await;
        if listed.is_err() {
            self.save_usage();
        }
        listed
    }

    pub async fn execute(&self, request: &ExportRequest, control: &RunControl) -> Result<ExportReport> {
        info!(
            target: "export",
            "Exporting {} records of {} ({} fields, {})",
            request.selection.records().len(),
            request.selection.endpoint(),
            request.selection.fields().len(),
            request.options.freshness
        );

        // 1. Plan and fetch
        let results = self.planner.plan(&request.selection, &request.options, control).await;

        // 2. Assemble rows in request order
        let outcome = assemble(request.selection.fields(), results);

        // 3. Flush the cache and the call ledger
        if let Err(e) = self.planner.store().flush().await {
            warn!(target: "cache", "Cache flush failed: {}", e);
        }
        let usage_summary = self.save_usage();

        // 4. Write the CSV
        let rows_written = match &request.output {
            Some(path) => write_csv_file(path, &request.layout, &outcome.rows)?,
            None => 0,
        };

        Ok(ExportReport {
            outcome,
            output: request.output.clone(),
            rows_written,
            stats: self.planner.stats(),
            usage_summary,
        })
    }

    fn save_usage(&self) -> Option<String> {
        let usage = self.usage.as_ref()?;
        let usage = usage.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = usage.save() {
            warn!(target: "api", "Could not save call usage: {}", e);
        }
        Some(usage.summary())
    }
}
