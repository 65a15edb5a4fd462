//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{ActivityKind, JobStatus, Stage};

/// What a progress event reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// The job entered a new stage.
    Stage,
    /// One per-file activity was resolved.
    ActivityResolved,
    /// A transcode reported progress.
    Heartbeat,
    /// The job failed.
    Failed,
}

/// Progress event for a job, published after the change is durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub kind: ProgressKind,
    pub stage: Stage,
    pub status: JobStatus,
    /// Human-readable message describing the change.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    /// Error message (activity failure or job failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    fn base(job_id: &str, kind: ProgressKind, stage: Stage, failed: bool, message: String) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
            stage,
            status: JobStatus::derive(stage, failed),
            message,
            timestamp: Utc::now(),
            file_key: None,
            activity: None,
            progress_percent: None,
            error: None,
        }
    }

    pub fn stage(job_id: &str, stage: Stage) -> Self {
        Self::base(
            job_id,
            ProgressKind::Stage,
            stage,
            false,
            format!("Entered {}", stage),
        )
    }

    pub fn activity_resolved(
        job_id: &str,
        stage: Stage,
        file_key: &str,
        activity: ActivityKind,
        error: Option<&str>,
    ) -> Self {
        let message = match error {
            None => format!("{} finished for {}", activity, file_key),
            Some(_) => format!("{} failed for {}", activity, file_key),
        };
        let mut event = Self::base(job_id, ProgressKind::ActivityResolved, stage, false, message);
        event.file_key = Some(file_key.to_string());
        event.activity = Some(activity);
        event.error = error.map(str::to_string);
        event
    }

    pub fn heartbeat(job_id: &str, stage: Stage, file_key: &str, progress_percent: Option<f64>) -> Self {
        let message = match progress_percent {
            Some(p) => format!("Transcoding {} ({:.1}%)", file_key, p),
            None => format!("Transcoding {}", file_key),
        };
        let mut event = Self::base(job_id, ProgressKind::Heartbeat, stage, false, message);
        event.file_key = Some(file_key.to_string());
        event.activity = Some(ActivityKind::PreviewTranscode);
        event.progress_percent = progress_percent;
        event
    }

    pub fn failed(job_id: &str, stage: Stage, error: &str) -> Self {
        let mut event = Self::base(
            job_id,
            ProgressKind::Failed,
            stage,
            true,
            format!("Failed at {}", stage),
        );
        event.error = Some(error.to_string());
        event
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
