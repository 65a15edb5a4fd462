//! Asynchronous activities and their outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of per-file asynchronous activity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    MetadataFetch,
    PreviewTranscode,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 2] = [ActivityKind::MetadataFetch, ActivityKind::PreviewTranscode];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::MetadataFetch => "metadata_fetch",
            ActivityKind::PreviewTranscode => "preview_transcode",
        }
    }

    pub fn parse(s: &str) -> Option<ActivityKind> {
        match s {
            "metadata_fetch" => Some(ActivityKind::MetadataFetch),
            "preview_transcode" => Some(ActivityKind::PreviewTranscode),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a registered activity. Only `Pending` may change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Pending,
    Completed,
    Failed,
    TimedOut,
}

impl ActivityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityStatus::Pending => "pending",
            ActivityStatus::Completed => "completed",
            ActivityStatus::Failed => "failed",
            ActivityStatus::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Option<ActivityStatus> {
        match s {
            "pending" => Some(ActivityStatus::Pending),
            "completed" => Some(ActivityStatus::Completed),
            "failed" => Some(ActivityStatus::Failed),
            "timed_out" => Some(ActivityStatus::TimedOut),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != ActivityStatus::Pending
    }
}

/// Result reported by the metadata-extraction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub duration_seconds: f64,
    #[serde(default)]
    pub chapter_durations: Vec<f64>,
}

/// How an activity ended, as recorded in job history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityOutcome {
    /// Metadata extraction succeeded.
    Info { info: VideoInfo },
    /// Preview transcode finished; the output path is the one chosen at scheduling.
    Transcoded,
    Failed { error: String },
    TimedOut,
}

impl ActivityOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    /// Registry status this outcome resolves a token to.
    pub fn status(&self) -> ActivityStatus {
        match self {
            ActivityOutcome::Info { .. } | ActivityOutcome::Transcoded => ActivityStatus::Completed,
            ActivityOutcome::Failed { .. } => ActivityStatus::Failed,
            ActivityOutcome::TimedOut => ActivityStatus::TimedOut,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == ActivityStatus::Completed
    }

    /// Whether this outcome is meaningful for the given activity kind.
    pub fn fits(&self, kind: ActivityKind) -> bool {
        match self {
            ActivityOutcome::Info { .. } => kind == ActivityKind::MetadataFetch,
            ActivityOutcome::Transcoded => kind == ActivityKind::PreviewTranscode,
            ActivityOutcome::Failed { .. } | ActivityOutcome::TimedOut => true,
        }
    }
}

/// A registered asynchronous activity as tracked by the token registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingActivity {
    pub token: String,
    pub job_id: String,
    pub file_key: String,
    pub kind: ActivityKind,
    pub status: ActivityStatus,
    pub issued_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_status_mapping() {
        let info = ActivityOutcome::Info {
            info: VideoInfo {
                duration_seconds: 1.0,
                chapter_durations: vec![],
            },
        };
        assert_eq!(info.status(), ActivityStatus::Completed);
        assert_eq!(ActivityOutcome::Transcoded.status(), ActivityStatus::Completed);
        assert_eq!(ActivityOutcome::failed("x").status(), ActivityStatus::Failed);
        assert_eq!(ActivityOutcome::TimedOut.status(), ActivityStatus::TimedOut);
        assert!(!ActivityOutcome::TimedOut.is_success());
    }

    #[test]
    fn test_outcome_fits_kind() {
        assert!(ActivityOutcome::Transcoded.fits(ActivityKind::PreviewTranscode));
        assert!(!ActivityOutcome::Transcoded.fits(ActivityKind::MetadataFetch));
        assert!(ActivityOutcome::failed("boom").fits(ActivityKind::MetadataFetch));
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ActivityStatus::Pending.is_terminal());
        assert!(ActivityStatus::TimedOut.is_terminal());
        assert_eq!(ActivityStatus::parse("timed_out"), Some(ActivityStatus::TimedOut));
        assert_eq!(ActivityKind::parse("metadata_fetch"), Some(ActivityKind::MetadataFetch));
    }
}
