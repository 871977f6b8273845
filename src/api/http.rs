use super::{ApiClient, FetchedRecord, UsageLedger};
use crate::credentials::Credentials;
use crate::error::LiveCallError;
use crate::payload::Payload;
use crate::request_key::RequestDescriptor;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, ETAG};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Settings for [`HttpApiClient`].
#[derive(Debug, Clone)]
pub struct HttpClientSettings {
    pub base_url: String,
    /// Minimum spacing between two calls
    pub throttle: Duration,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct HttpApiClient {
    base_url: String,
    client: reqwest::Client,
    throttle: Duration,
    last_call: Arc<Mutex<Option<Instant>>>,
    usage: Arc<std::sync::Mutex<UsageLedger>>,
}

impl HttpApiClient {
    pub fn new(
        settings: HttpClientSettings,
        credentials: &Credentials,
        usage: Arc<std::sync::Mutex<UsageLedger>>,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", HeaderValue::from_str(&credentials.key)?);
        let mut auth = HeaderValue::from_str(&credentials.basic_auth())?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client,
            throttle: settings.throttle,
            last_call: Arc::new(Mutex::new(None)),
            usage,
        })
    }

    /// `<base>/<endpoint>`; scope parameters go in the query string.
    pub fn url_for(&self, request: &RequestDescriptor) -> String {
        format!(
            "{}/{}",
            self.base_url,
            request.endpoint.trim_start_matches('/')
        )
    }

    async fn wait_for_slot(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.throttle;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn reserve_call(&self) -> Result<(), LiveCallError> {
        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        usage.try_record_call()
    }
}

fn map_status(status: StatusCode, body: String) -> LiveCallError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LiveCallError::Auth {
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => LiveCallError::RateLimited,
        _ => LiveCallError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<FetchedRecord, LiveCallError> {
        self.reserve_call()?;
        self.wait_for_slot().await;

        let url = self.url_for(request);
        info!(target: "api", "Pulling api: {} {:?}", request.endpoint, request.scope);

        let response = self
            .client
            .get(&url)
            .query(&request.scope)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "api", "Error pulling api: {}", e);
                LiveCallError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "api", "API returned {} for {}", status, url);
            return Err(map_status(status, body));
        }

        let source_version = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());

        let body: Value = response
            .json()
            .await
            .map_err(|e| LiveCallError::Decode(e.to_string()))?;

        let wanted = (!request.fields.is_empty()).then_some(request.fields.as_slice());
        let payload = Payload::from_json_object(&body, wanted)
            .ok_or_else(|| LiveCallError::Decode("expected a JSON object".to_string()))?;
        debug!(target: "api", "Received {} fields from {}", payload.len(), url);

        Ok(FetchedRecord {
            payload,
            source_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> HttpApiClient {
        HttpApiClient::new(
            HttpClientSettings {
                base_url: base_url.to_string(),
                throttle: Duration::from_millis(0),
                timeout: Duration::from_secs(5),
            },
            &Credentials::new("user", "pass", "key"),
            Arc::new(std::sync::Mutex::new(UsageLedger::in_memory(1))),
        )
        .unwrap()
    }

    #[test]
    fn test_url_joins_cleanly() {
        let c = client("https://dtcloudapi.d-tools.cloud/api/v1/");
        let request = RequestDescriptor {
            endpoint: "/Projects/GetProject".to_string(),
            fields: vec!["name".to_string()],
            scope: vec![("id".to_string(), "42".to_string())],
        };
        assert_eq!(
            c.url_for(&request),
            "https://dtcloudapi.d-tools.cloud/api/v1/Projects/GetProject"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            map_status(StatusCode::UNAUTHORIZED, String::new()),
            LiveCallError::Auth { status: 401 }
        );
        assert_eq!(
            map_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            LiveCallError::RateLimited
        );
        assert_eq!(
            map_status(StatusCode::NOT_FOUND, "missing".to_string()),
            LiveCallError::Status {
                status: 404,
                body: "missing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_budget_checked_before_network() {
        // Limit of one call: the second call must fail without touching the network
        let c = client("http://127.0.0.1:9");
        let request = RequestDescriptor {
            endpoint: "Quotes/GetQuote".to_string(),
            fields: vec![],
            scope: vec![],
        };
        let first = c.fetch(&request).await;
        assert!(matches!(first, Err(LiveCallError::Network(_))));
        let second = c.fetch(&request).await;
        assert_eq!(second, Err(LiveCallError::BudgetExhausted { limit: 1 }));
    }
}
