//! HTTP remote annotation client.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Method | Path | Body |
//! |--------|------|------|
//! | `GET` | `documents/{id}/annotations` | - |
//! | `PUT` | `documents/{id}/annotations` | `{"annotations": [...]}` |
//! | `DELETE` | `documents/{id}/annotations?locationKey=...` | - |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use folio_core::defaults::{ENV_REMOTE_TOKEN, ENV_REMOTE_URL, REMOTE_TIMEOUT_SECS};
use folio_core::{
    parse_remote_annotations, AnnotationRecord, AuthProvider, Error, PushOutcome,
    RemoteAnnotationClient, Result,
};

#[derive(Serialize)]
struct PushRequest<'a> {
    annotations: &'a [AnnotationRecord],
}

/// Remote annotation store over HTTP with bearer-token auth.
#[derive(Debug, Clone)]
pub struct HttpAnnotationClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpAnnotationClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid remote URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Remote URL '{}' cannot be used as a base",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REMOTE_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(url = %base_url, "Initializing remote annotation client");
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Set the bearer token. A client without a token reports itself as
    /// signed out.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Create from environment variables.
    ///
    /// | Variable | Required | Description |
    /// |----------|----------|-------------|
    /// | `FOLIO_REMOTE_URL` | yes | Base URL of the annotation service |
    /// | `FOLIO_REMOTE_TOKEN` | no | Bearer token |
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(ENV_REMOTE_URL)
            .map_err(|_| Error::Config(format!("{} is not set", ENV_REMOTE_URL)))?;
        let client = Self::new(&url)?;
        Ok(match std::env::var(ENV_REMOTE_TOKEN) {
            Ok(token) if !token.trim().is_empty() => client.with_token(token),
            _ => client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/documents/{id}/annotations`, with the id as a single
    /// percent-encoded segment.
    pub fn annotations_url(&self, document_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["documents", document_id, "annotations"]);
        }
        url
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[async_trait]
impl RemoteAnnotationClient for HttpAnnotationClient {
    async fn fetch(&self, document_id: &str) -> Result<Vec<AnnotationRecord>> {
        let response = self
            .request(reqwest::Method::GET, self.annotations_url(document_id))
            .send()
            .await
            .map_err(|e| Error::RemoteFetch(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::RemoteFetch(format!(
                "Remote returned {}",
                response.status()
            )));
        }

        let payload: JsonValue = response
            .json()
            .await
            .map_err(|e| Error::RemoteFetch(format!("Failed to parse response: {}", e)))?;
        let records = parse_remote_annotations(&payload, document_id)?;
        debug!(document_id, record_count = records.len(), "Fetched remote annotations");
        Ok(records)
    }

    async fn push(&self, document_id: &str, records: &[AnnotationRecord]) -> Result<PushOutcome> {
        let response = self
            .request(reqwest::Method::PUT, self.annotations_url(document_id))
            .json(&PushRequest {
                annotations: records,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Request(format!("Remote returned {}", status)));
        }

        // 204 and empty bodies count as acceptance.
        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(PushOutcome::ok());
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn delete(&self, document_id: &str, location_key: &str) -> Result<()> {
        let mut url = self.annotations_url(document_id);
        url.query_pairs_mut().append_pair("locationKey", location_key);

        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Request(format!("Remote returned {}", status)));
        }
        Ok(())
    }
}

impl AuthProvider for HttpAnnotationClient {
    fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}
