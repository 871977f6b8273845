mod common;

use common::MockApiClient;
use dtools_export::cache::MemoryCacheStore;
use dtools_export::config::Config;
use dtools_export::export::CsvLayout;
use dtools_export::freshness::FreshnessPolicy;
use dtools_export::planner::{CallPlanner, PlanOptions, Provenance, RunControl};
use dtools_export::run::{ExportRequest, ExportRun};
use serde_json::json;
use std::sync::Arc;

const LIST_ENDPOINT: &str = "Opportunities/GetOpportunities";

fn listing_client() -> MockApiClient {
    MockApiClient::new().with_listing(
        LIST_ENDPOINT,
        "opportunities",
        json!([
            {"id": 11, "stage": "Opportunity Won"},
            {"id": 12, "stage": "On Hold"},
            {"id": 13, "stage": "Negotiating, Reviews"}
        ]),
    )
}

fn any_age() -> PlanOptions {
    PlanOptions {
        freshness: FreshnessPolicy::AnyAge,
        ..PlanOptions::default()
    }
}

#[tokio::test]
async fn test_listing_is_cached_under_its_own_key() {
    let client = Arc::new(listing_client());
    let planner = CallPlanner::new(Arc::new(MemoryCacheStore::new()), client.clone());
    let run = ExportRun::new(planner);
    let query = Config::default().list_query();

    let first = run
        .list_records(&query, &any_age(), &RunControl::new())
        .await
        .unwrap();
    assert_eq!(first.provenance, Provenance::Live);
    let ids: Vec<&str> = first.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["11", "12", "13"]);

    let second = run
        .list_records(&query, &any_age(), &RunControl::new())
        .await
        .unwrap();
    assert_eq!(second.provenance, Provenance::Cached);
    assert_eq!(second.records, first.records);
    assert_eq!(client.calls(), 1);

    let request = &client.requests()[0];
    let stages: Vec<&str> = request
        .scope
        .iter()
        .filter(|(name, _)| name == "stages")
        .map(|(_, value)| value.as_str())
        .collect();
    assert_eq!(stages.len(), 6);
    assert!(stages.contains(&"Negotiating, Reviews"));
}

#[tokio::test]
async fn test_listed_records_are_fetched_by_stage() {
    let client = Arc::new(listing_client());
    let planner = CallPlanner::new(Arc::new(MemoryCacheStore::new()), client.clone());
    let run = ExportRun::new(planner);
    let config = Config::default();
    let control = RunControl::new();

    let listing = run
        .list_records(&config.list_query(), &any_age(), &control)
        .await
        .unwrap();
    let selection = config
        .stage_routing()
        .selection(["name", "stage"], &listing.records);

    let request = ExportRequest {
        selection,
        options: any_age(),
        layout: CsvLayout::new(vec!["Job Name".into(), "Job Stage".into()]),
        output: None,
    };
    let report = run.execute(&request, &control).await.unwrap();

    assert_eq!(client.calls_to("Projects/GetProject"), 1);
    assert_eq!(client.calls_to("Opportunities/GetOpportunity"), 2);
    let endpoints: Vec<&str> = report
        .outcome
        .rows
        .iter()
        .map(|row| row.key.endpoint())
        .collect();
    assert_eq!(
        endpoints,
        [
            "Projects/GetProject",
            "Opportunities/GetOpportunity",
            "Opportunities/GetOpportunity"
        ]
    );
    assert_eq!(report.outcome.rows[1].key.scope_label(), "id=12");
}

#[tokio::test]
async fn test_failed_listing_is_an_error() {
    let client = Arc::new(MockApiClient::new());
    let planner = CallPlanner::new(Arc::new(MemoryCacheStore::new()), client.clone());
    let run = ExportRun::new(planner);

    // Without a canned list the answer is not a JSON array
    let listed = run
        .list_records(&Config::default().list_query(), &any_age(), &RunControl::new())
        .await;
    assert!(listed.is_err());
    assert_eq!(client.calls(), 1);
}
