//! Boundary between the outside world and the engine.
//!
//! Validates incoming requests, classifies failures for the caller and
//! retries operations that failed because the store was unavailable.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{Engine, HeartbeatOutcome, Resolution, SubmitOutcome};
use crate::error::{EngineError, RegistryError};
use crate::model::{ActivityKind, ActivityOutcome, VideoInfo};
use crate::query::{JobSnapshot, JobSummary, QueryService};

/// Base delay between store retries.
const STORE_RETRY_BASE_DELAY_MILLIS: u64 = 50;
/// Doublings after which the delay stops growing (50ms * 2^6 = 3.2s).
const STORE_RETRY_MAX_DOUBLINGS: u32 = 6;

/// Delay before retry number `attempt`, counting from 1.
fn store_retry_delay(attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(STORE_RETRY_MAX_DOUBLINGS);
    Duration::from_millis(STORE_RETRY_BASE_DELAY_MILLIS << doublings)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::Conflict(_) => "CONFLICT",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<EngineError> for GatewayError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::JobNotFound(id) => GatewayError::NotFound(format!("job {} not found", id)),
            EngineError::KindMismatch { .. } => GatewayError::BadRequest(err.to_string()),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

/// Video information as reported by the metadata service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResult {
    #[serde(default, alias = "durationSeconds")]
    pub total_duration_seconds: Option<f64>,
    #[serde(default, alias = "chapterDurations")]
    pub chapter_durations_seconds: Vec<f64>,
}

impl From<MetadataResult> for VideoInfo {
    fn from(result: MetadataResult) -> Self {
        VideoInfo {
            duration_seconds: result.total_duration_seconds.unwrap_or_default(),
            chapter_durations: result.chapter_durations_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedJob {
    pub id: String,
    pub source_path: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompletionAck {
    /// `false` when the token had already been resolved.
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeartbeatAck {
    /// `false` when the activity is no longer running.
    pub extended: bool,
}

/// Rejects ids that cannot be used as a directory name under the roots.
pub fn validate_job_id(job_id: &str) -> Result<(), GatewayError> {
    if job_id.trim().is_empty() {
        return Err(GatewayError::BadRequest("job id must not be empty".to_string()));
    }
    if job_id.contains(['/', '\\']) || job_id == "." || job_id == ".." {
        return Err(GatewayError::BadRequest(format!(
            "job id '{}' must not contain path separators",
            job_id
        )));
    }
    Ok(())
}

fn validate_token(token: &str) -> Result<(), GatewayError> {
    if token.trim().is_empty() {
        return Err(GatewayError::BadRequest("token must not be empty".to_string()));
    }
    Ok(())
}

/// Whether the failure came from the store rather than the request.
fn is_store_failure(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::Database(_) | EngineError::Registry(RegistryError::Database(_))
    )
}

/// Entry point for job submission, completion callbacks and queries.
#[derive(Clone)]
pub struct JobGateway {
    engine: Engine,
    queries: QueryService,
    store_retry_attempts: u32,
}

impl JobGateway {
    pub fn new(engine: Engine, store_retry_attempts: u32) -> Self {
        let queries = QueryService::new(engine.database().clone());
        Self {
            engine,
            queries,
            store_retry_attempts: store_retry_attempts.max(1),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn queries(&self) -> &QueryService {
        &self.queries
    }

    async fn with_store_retry<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Err(e) if is_store_failure(&e) && attempt < self.store_retry_attempts => {
                    let delay = store_retry_delay(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt,
                        self.store_retry_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Records a new job and starts it.
    pub async fn submit(&self, job_id: &str, source_path: &str) -> Result<SubmittedJob, GatewayError> {
        validate_job_id(job_id)?;
        if source_path.trim().is_empty() {
            return Err(GatewayError::BadRequest("sourcePath must not be empty".to_string()));
        }

        let outcome = self
            .with_store_retry("submit", || self.engine.create(job_id, source_path))
            .await?;
        match outcome {
            SubmitOutcome::Created => {
                self.engine.spawn_drive(job_id);
                Ok(SubmittedJob {
                    id: job_id.to_string(),
                    source_path: source_path.to_string(),
                    status: "created",
                })
            }
            SubmitOutcome::Conflict => Err(GatewayError::Conflict(format!(
                "job {} already exists",
                job_id
            ))),
        }
    }

    /// Delivers the result of a metadata request. Exactly one of `result`
    /// and `error` must be given.
    pub async fn complete_metadata(
        &self,
        token: &str,
        result: Option<MetadataResult>,
        error: Option<String>,
    ) -> Result<CompletionAck, GatewayError> {
        validate_token(token)?;
        let outcome = match (result, error) {
            (Some(result), None) => ActivityOutcome::Info {
                info: result.into(),
            },
            (None, Some(error)) => ActivityOutcome::failed(error),
            (Some(_), Some(_)) => {
                return Err(GatewayError::BadRequest(
                    "only one of result or error may be provided".to_string(),
                ))
            }
            (None, None) => {
                return Err(GatewayError::BadRequest(
                    "either result or error must be provided".to_string(),
                ))
            }
        };
        self.complete(token, ActivityKind::MetadataFetch, outcome).await
    }

    /// Delivers the end of a transcode; no error means success.
    pub async fn complete_transcode(
        &self,
        token: &str,
        error: Option<String>,
    ) -> Result<CompletionAck, GatewayError> {
        validate_token(token)?;
        let outcome = match error {
            Some(error) => ActivityOutcome::failed(error),
            None => ActivityOutcome::Transcoded,
        };
        self.complete(token, ActivityKind::PreviewTranscode, outcome).await
    }

    async fn complete(
        &self,
        token: &str,
        kind: ActivityKind,
        outcome: ActivityOutcome,
    ) -> Result<CompletionAck, GatewayError> {
        let resolution = self
            .with_store_retry("complete", || {
                self.engine.resolve(token, kind, outcome.clone())
            })
            .await?;
        match resolution {
            Resolution::Applied { .. } => Ok(CompletionAck { applied: true }),
            Resolution::Duplicate => Ok(CompletionAck { applied: false }),
            Resolution::UnknownToken => {
                Err(GatewayError::NotFound(format!("unknown token {}", token)))
            }
        }
    }

    pub async fn heartbeat_transcode(
        &self,
        token: &str,
        progress_percent: Option<f64>,
    ) -> Result<HeartbeatAck, GatewayError> {
        validate_token(token)?;
        let outcome = self
            .with_store_retry("heartbeat", || {
                self.engine.heartbeat(token, progress_percent)
            })
            .await?;
        match outcome {
            HeartbeatOutcome::Extended => Ok(HeartbeatAck { extended: true }),
            HeartbeatOutcome::NotExtendable => Ok(HeartbeatAck { extended: false }),
            HeartbeatOutcome::UnknownToken => {
                Err(GatewayError::NotFound(format!("unknown token {}", token)))
            }
        }
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobSnapshot, GatewayError> {
        validate_job_id(job_id)?;
        let queries = &self.queries;
        let snapshot = self
            .with_store_retry("get job", || async move { queries.get_state(job_id) })
            .await?;
        Ok(snapshot)
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>, GatewayError> {
        let queries = &self.queries;
        let jobs = self
            .with_store_retry("list jobs", || async move { queries.list_jobs() })
            .await?;
        Ok(jobs)
    }
}
