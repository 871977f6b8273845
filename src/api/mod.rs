//! API client collaborator
//!
//! The planner only sees the [`ApiClient`] trait; [`HttpApiClient`] is the
//! production implementation talking to the cloud API over HTTPS.

pub mod http;
pub mod usage;

use crate::error::LiveCallError;
use crate::payload::Payload;
use crate::request_key::RequestDescriptor;
use async_trait::async_trait;

pub use http::HttpApiClient;
pub use usage::UsageLedger;

/// One record returned by a live call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRecord {
    pub payload: Payload,
    /// Revision indicator (e.g. an ETag), when the API exposes one
    pub source_version: Option<String>,
}

impl FetchedRecord {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            source_version: None,
        }
    }
}

#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Perform one authenticated call for `request`.
    async fn fetch(&self, request: &RequestDescriptor) -> Result<FetchedRecord, LiveCallError>;
}
