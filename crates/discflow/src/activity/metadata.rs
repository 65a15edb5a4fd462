//! Client for the metadata-extraction service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use crate::error::ActivityError;

const OPERATION: &str = "metadata_fetch";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request to inspect one video file. The service answers later on
/// `webhook_complete_uri`, quoting `token`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoRequest {
    pub request_id: String,
    pub token: String,
    pub video_path: String,
    pub webhook_complete_uri: String,
}

#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Hands the request to the service. `Ok` means it was accepted and a
    /// completion callback will follow.
    async fn request_info(&self, request: InfoRequest) -> Result<(), ActivityError>;
}

#[derive(Clone)]
pub struct HttpMetadataService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMetadataService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn info_url(&self) -> String {
        format!("{}/info", self.base_url.trim_end_matches('/'))
    }
}

/// Pulls `message` out of a JSON error body, falling back to the raw text.
pub(crate) fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).to_string())
}

#[async_trait]
impl MetadataService for HttpMetadataService {
    async fn request_info(&self, request: InfoRequest) -> Result<(), ActivityError> {
        let response = self
            .client
            .post(self.info_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| ActivityError::transient(OPERATION, format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::CREATED {
            return Ok(());
        }

        let body = response.bytes().await.map_err(|e| {
            ActivityError::transient(OPERATION, format!("failed reading error body: {e}"))
        })?;
        let message = error_message(&body);

        match status {
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::INTERNAL_SERVER_ERROR => {
                Err(ActivityError::permanent(OPERATION, message))
            }
            _ => Err(ActivityError::permanent(
                OPERATION,
                format!("unexpected response status {status}: {message}"),
            )),
        }
    }
}
