//! Client for the gallery JSON API.
//!
//! Both methods share one endpoint and accept at most 25 entries per call.
//! Responses mix successful entries and `{gid, error}` entries in one list;
//! [`ApiEntry`] models that.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{GalleryMetadata, GalleryToken, PageRef};

/// Public API endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.e-hentai.org/api.php";

/// Errors that make a whole API call unusable.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The HTTP client could not be built
    #[error("Client error: {0}")]
    Client(String),
    /// Error during network communication
    #[error("Network error: {0}")]
    Network(String),
    /// The request did not finish within the client timeout
    #[error("Request timed out")]
    Timeout,
    /// Non-success HTTP status
    #[error("HTTP error: {0}")]
    Status(String),
    /// Response body could not be parsed
    #[error("JSON error: {0}")]
    Json(String),
    /// The API rejected the request as a whole
    #[error("API error: {0}")]
    Api(String),
}

/// Per-entry failure reported inside an otherwise successful response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntryError {
    /// Gallery the error refers to, when the API echoes it
    #[serde(default)]
    pub gid: Option<Value>,
    /// Error text
    pub error: String,
}

/// One element of a batched response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ApiEntry<T> {
    /// Entry carries an error instead of data
    Failed(EntryError),
    /// Entry carries data
    Found(T),
}

// Entries stay raw here so one malformed entry cannot fail the whole list.
#[derive(Debug, Deserialize)]
struct TokenListResponse {
    tokenlist: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    gmetadata: Vec<Value>,
}

/// Decodes each entry on its own; an entry matching neither shape becomes
/// a [`ApiEntry::Failed`] for its gid.
fn decode_entries<T: DeserializeOwned>(entries: Vec<Value>) -> Vec<ApiEntry<T>> {
    entries
        .into_iter()
        .map(|entry| {
            let gid = entry.get("gid").cloned();
            serde_json::from_value(entry).unwrap_or_else(|e| {
                warn!("Malformed entry for gallery {:?}: {}", gid, e);
                ApiEntry::Failed(EntryError {
                    gid,
                    error: format!("malformed entry: {e}"),
                })
            })
        })
        .collect()
}

/// The two remote methods the resolver depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GalleryApi: Send + Sync {
    /// `gtoken`: looks up gallery tokens for page references.
    async fn gallery_tokens(
        &self,
        pages: &[PageRef],
    ) -> Result<Vec<ApiEntry<GalleryToken>>, ApiError>;

    /// `gdata`: fetches metadata for resolved galleries.
    async fn gallery_metadata(
        &self,
        galleries: &[GalleryToken],
    ) -> Result<Vec<ApiEntry<GalleryMetadata>>, ApiError>;
}

/// HTTP implementation of [`GalleryApi`].
#[derive(Debug, Clone)]
pub struct EhApiClient {
    http: HttpClient,
    endpoint: String,
}

impl EhApiClient {
    /// Creates a client posting to `endpoint`, bounding every call by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Client`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// Sends one JSON request and returns the decoded body.
    ///
    /// The API answers with `text/html` content type, so the body is read as
    /// text and parsed here rather than through `Response::json`.
    async fn post(&self, body: &Value) -> Result<Value, ApiError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_send_error)?;

        if !status.is_success() {
            return Err(ApiError::Status(describe_error_body(status, &text)));
        }

        let value: Value =
            serde_json::from_str(&text).map_err(|e| ApiError::Json(e.to_string()))?;

        if let Some(error) = value.get("error") {
            let message = error
                .as_str()
                .map_or_else(|| error.to_string(), ToString::to_string);
            return Err(ApiError::Api(message));
        }

        Ok(value)
    }
}

#[async_trait]
impl GalleryApi for EhApiClient {
    async fn gallery_tokens(
        &self,
        pages: &[PageRef],
    ) -> Result<Vec<ApiEntry<GalleryToken>>, ApiError> {
        let pagelist: Vec<Value> = pages
            .iter()
            .map(|p| json!([p.gid, p.page_token, p.page]))
            .collect();
        let body = json!({ "method": "gtoken", "pagelist": pagelist });

        debug!("Requesting gallery tokens for {} pages", pages.len());
        let value = self.post(&body).await?;
        let parsed: TokenListResponse =
            serde_json::from_value(value).map_err(|e| ApiError::Json(e.to_string()))?;
        Ok(decode_entries(parsed.tokenlist))
    }

    async fn gallery_metadata(
        &self,
        galleries: &[GalleryToken],
    ) -> Result<Vec<ApiEntry<GalleryMetadata>>, ApiError> {
        let gidlist: Vec<Value> = galleries.iter().map(|g| json!([g.gid, g.token])).collect();
        let body = json!({ "method": "gdata", "gidlist": gidlist, "namespace": 1 });

        debug!("Requesting metadata for {} galleries", galleries.len());
        let value = self.post(&body).await?;
        let parsed: MetadataResponse =
            serde_json::from_value(value).map_err(|e| ApiError::Json(e.to_string()))?;
        Ok(decode_entries(parsed.gmetadata))
    }
}

fn map_send_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(e.to_string())
    }
}

/// Builds a short description of a failed response without dumping HTML pages.
fn describe_error_body(status: reqwest::StatusCode, body: &str) -> String {
    let trimmed = body.trim_start();
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");

    if is_html {
        format!("{status} (server returned HTML error page)")
    } else if body.chars().count() > 300 {
        format!("{status} - {}... (truncated)", crate::utils::truncate_str(body, 300))
    } else {
        format!("{status} - {body}")
    }
}
