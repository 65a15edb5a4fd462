//! Client for the transcoding service.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::metadata::error_message;
use crate::error::ActivityError;

const OPERATION: &str = "preview_transcode";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const PREVIEW_PROFILE: &str = "preview";

/// Request to transcode one file. Progress is reported on
/// `webhook_progress_uri` and the outcome on `webhook_complete_uri`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeRequest {
    pub request_id: String,
    pub token: String,
    pub input_path: String,
    pub output_path: String,
    pub profile: String,
    pub webhook_complete_uri: String,
    pub webhook_progress_uri: String,
}

#[async_trait]
pub trait TranscodeService: Send + Sync {
    /// Hands the request to the service. `Ok` means it was accepted and a
    /// completion callback will follow.
    async fn request_transcode(&self, request: TranscodeRequest) -> Result<(), ActivityError>;
}

#[derive(Clone)]
pub struct HttpTranscodeService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTranscodeService {
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

    fn transcode_url(&self) -> String {
        format!("{}/transcode", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TranscodeService for HttpTranscodeService {
    async fn request_transcode(&self, request: TranscodeRequest) -> Result<(), ActivityError> {
        let response = self
            .client
            .post(self.transcode_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| ActivityError::transient(OPERATION, format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.bytes().await.map_err(|e| {
            ActivityError::transient(OPERATION, format!("failed reading error body: {e}"))
        })?;
        Err(ActivityError::permanent(
            OPERATION,
            format!("transcode rejected ({status}): {}", error_message(&body)),
        ))
    }
}
