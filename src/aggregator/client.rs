//! Backend REST API Client
//!
//! HTTP client for the campus snapshot and history endpoints.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::error::FetchError;
use crate::config::BackendConfig;
use crate::model::Domain;

/// Where snapshots come from
///
/// Returns raw JSON; decoding and validation happen in the aggregator so
/// that every source is held to the same rules.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// `GET /{domain}`: mapping of entity id to attributes
    async fn fetch_snapshot(&self, domain: Domain) -> Result<Value, FetchError>;

    /// `GET /{domain}/{id}`: one entity's attributes
    async fn fetch_entity(&self, domain: Domain, id: &str) -> Result<Value, FetchError>;

    /// `GET /{domain}/{id}/{history}`: ordered history records
    async fn fetch_history(&self, domain: Domain, id: &str) -> Result<Value, FetchError>;
}

/// reqwest-backed [`SnapshotSource`]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    history_segment: String,
}

impl HttpBackend {
    /// Create a client for the configured backend
    pub fn new(config: &BackendConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            history_segment: config.history_segment.trim_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn snapshot_url(&self, domain: Domain) -> String {
        format!("{}/{}", self.base_url, domain.path())
    }

    fn entity_url(&self, domain: Domain, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            domain.path(),
            urlencoding::encode(id)
        )
    }

    fn history_url(&self, domain: Domain, id: &str) -> String {
        format!("{}/{}", self.entity_url(domain, id), self.history_segment)
    }

    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::decode(url, e.to_string()))
    }
}

#[async_trait]
impl SnapshotSource for HttpBackend {
    async fn fetch_snapshot(&self, domain: Domain) -> Result<Value, FetchError> {
        let url = self.snapshot_url(domain);
        tracing::trace!(domain = %domain, url = %url, "Fetching snapshot");
        self.get_json(&url).await
    }

    async fn fetch_entity(&self, domain: Domain, id: &str) -> Result<Value, FetchError> {
        self.get_json(&self.entity_url(domain, id)).await
    }

    async fn fetch_history(&self, domain: Domain, id: &str) -> Result<Value, FetchError> {
        self.get_json(&self.history_url(domain, id)).await
    }
}
