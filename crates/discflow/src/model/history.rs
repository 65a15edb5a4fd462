//! Events recorded in a job's append-only history.

use serde::{Deserialize, Serialize};

use super::activity::{ActivityKind, ActivityOutcome};
use super::stage::Stage;

/// A committed transition of a job. Replaying these in order rebuilds the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    Created {
        source_path: String,
        library_path: String,
        preview_base_path: String,
    },
    StageAdvanced {
        stage: Stage,
    },
    /// Listing finished; also advances the job to `FilesListed`.
    FilesListed {
        files: Vec<String>,
    },
    /// Token issued; the external request has not necessarily been made yet.
    ActivityScheduled {
        token: String,
        request_id: String,
        file_key: String,
        kind: ActivityKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_path: Option<String>,
    },
    /// The external service accepted the request and will call back.
    ActivityDispatched {
        token: String,
    },
    ActivityResolved {
        token: String,
        file_key: String,
        kind: ActivityKind,
        outcome: ActivityOutcome,
    },
    Failed {
        stage: Stage,
        error: String,
    },
}

impl HistoryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HistoryEvent::Created { .. } => "created",
            HistoryEvent::StageAdvanced { .. } => "stage_advanced",
            HistoryEvent::FilesListed { .. } => "files_listed",
            HistoryEvent::ActivityScheduled { .. } => "activity_scheduled",
            HistoryEvent::ActivityDispatched { .. } => "activity_dispatched",
            HistoryEvent::ActivityResolved { .. } => "activity_resolved",
            HistoryEvent::Failed { .. } => "failed",
        }
    }
}

/// A history event together with its job-local sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub seq: u64,
    pub event: HistoryEvent,
}
