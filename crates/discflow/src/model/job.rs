//! In-memory job state, rebuilt by folding history events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ReplayError;

use super::activity::{ActivityKind, ActivityOutcome};
use super::barrier::JoinBarrier;
use super::history::{HistoryEvent, RecordedEvent};
use super::stage::{Stage, FINAL_STAGE};

/// Explicit state of one per-file sub-task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    #[default]
    NotStarted,
    Pending,
    Succeeded,
    Failed,
}

/// Diagnostics collected for a single video file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_durations: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_error: Option<String>,
    pub info_status: SubtaskStatus,
    pub preview_status: SubtaskStatus,
}

impl FileRecord {
    fn status_mut(&mut self, kind: ActivityKind) -> &mut SubtaskStatus {
        match kind {
            ActivityKind::MetadataFetch => &mut self.info_status,
            ActivityKind::PreviewTranscode => &mut self.preview_status,
        }
    }
}

/// Why a job stopped for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub stage: Stage,
    pub error: String,
}

/// An activity the job has issued a token for.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledActivity {
    pub token: String,
    pub request_id: String,
    pub file_key: String,
    pub kind: ActivityKind,
    pub output_path: Option<String>,
    pub dispatched: bool,
    pub outcome: Option<ActivityOutcome>,
}

impl ScheduledActivity {
    pub fn is_pending(&self) -> bool {
        self.outcome.is_none()
    }
}

/// One disc ingestion job.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub source_path: String,
    pub library_path: String,
    pub preview_base_path: String,
    pub stage: Stage,
    pub failure: Option<JobFailure>,
    pub files: BTreeMap<String, FileRecord>,
    activities: BTreeMap<String, ScheduledActivity>,
    barrier: Option<JoinBarrier>,
    next_seq: u64,
}

impl Job {
    /// Rebuilds a job from its full recorded history.
    pub fn replay(job_id: &str, events: &[RecordedEvent]) -> Result<Self, ReplayError> {
        let (first, rest) = events.split_first().ok_or_else(|| ReplayError::EmptyHistory {
            job_id: job_id.to_string(),
        })?;

        let mut job = Self::from_created(job_id, first)?;
        for recorded in rest {
            job.apply_recorded(recorded)?;
        }
        Ok(job)
    }

    /// Starts a job from its `Created` event, which must be event zero.
    pub fn from_created(job_id: &str, recorded: &RecordedEvent) -> Result<Self, ReplayError> {
        if recorded.seq != 0 {
            return Err(ReplayError::OutOfSequence {
                job_id: job_id.to_string(),
                seq: recorded.seq,
                expected: 0,
            });
        }
        match &recorded.event {
            HistoryEvent::Created {
                source_path,
                library_path,
                preview_base_path,
            } => Ok(Self {
                id: job_id.to_string(),
                source_path: source_path.clone(),
                library_path: library_path.clone(),
                preview_base_path: preview_base_path.clone(),
                stage: Stage::Created,
                failure: None,
                files: BTreeMap::new(),
                activities: BTreeMap::new(),
                barrier: None,
                next_seq: 1,
            }),
            _ => Err(ReplayError::MissingCreated {
                job_id: job_id.to_string(),
            }),
        }
    }

    /// Sequence number the next appended event must carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Applies an event that was read back from the store.
    pub fn apply_recorded(&mut self, recorded: &RecordedEvent) -> Result<(), ReplayError> {
        if recorded.seq != self.next_seq {
            return Err(ReplayError::OutOfSequence {
                job_id: self.id.clone(),
                seq: recorded.seq,
                expected: self.next_seq,
            });
        }
        self.apply(&recorded.event)
    }

    /// Applies the next event in sequence.
    pub fn apply(&mut self, event: &HistoryEvent) -> Result<(), ReplayError> {
        if self.failure.is_some() {
            return Err(ReplayError::AlreadyFailed {
                job_id: self.id.clone(),
            });
        }

        match event {
            HistoryEvent::Created { .. } => {
                return Err(self.inconsistent("duplicate Created event"));
            }
            HistoryEvent::StageAdvanced { stage } => self.advance(*stage)?,
            HistoryEvent::FilesListed { files } => self.list_files(files)?,
            HistoryEvent::ActivityScheduled {
                token,
                request_id,
                file_key,
                kind,
                output_path,
            } => self.schedule(token, request_id, file_key, *kind, output_path.clone())?,
            HistoryEvent::ActivityDispatched { token } => {
                let id = self.id.clone();
                let activity = self.activity_mut(token)?;
                if activity.dispatched || activity.outcome.is_some() {
                    return Err(ReplayError::Inconsistent {
                        job_id: id,
                        reason: format!("activity {} dispatched twice or after resolution", token),
                    });
                }
                activity.dispatched = true;
            }
            HistoryEvent::ActivityResolved {
                token,
                file_key,
                kind,
                outcome,
            } => self.resolve(token, file_key, *kind, outcome)?,
            HistoryEvent::Failed { stage, error } => {
                if *stage != self.stage {
                    return Err(self.inconsistent(&format!(
                        "failure recorded for {} while at {}",
                        stage, self.stage
                    )));
                }
                self.failure = Some(JobFailure {
                    stage: *stage,
                    error: error.clone(),
                });
            }
        }

        self.next_seq += 1;
        Ok(())
    }

    fn advance(&mut self, to: Stage) -> Result<(), ReplayError> {
        // FilesListed carries its payload and has its own event.
        if self.stage.next() != Some(to) || to == Stage::FilesListed {
            return Err(ReplayError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.stage,
                to,
            });
        }
        match to {
            Stage::RunningDiagnostics => {
                self.barrier = Some(JoinBarrier::for_files(self.files.len()));
            }
            Stage::DiagnosticsComplete if !self.barrier_satisfied() => {
                return Err(self.inconsistent("diagnostics completed before all activities resolved"));
            }
            _ => {}
        }
        self.stage = to;
        Ok(())
    }

    fn list_files(&mut self, files: &[String]) -> Result<(), ReplayError> {
        if self.stage != Stage::ListingFiles {
            return Err(ReplayError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.stage,
                to: Stage::FilesListed,
            });
        }
        let mut listed = BTreeMap::new();
        for file in files {
            if listed.insert(file.clone(), FileRecord::default()).is_some() {
                return Err(self.inconsistent(&format!("file {} listed twice", file)));
            }
        }
        self.files = listed;
        self.stage = Stage::FilesListed;
        Ok(())
    }

    fn schedule(
        &mut self,
        token: &str,
        request_id: &str,
        file_key: &str,
        kind: ActivityKind,
        output_path: Option<String>,
    ) -> Result<(), ReplayError> {
        if self.stage != Stage::RunningDiagnostics {
            return Err(self.inconsistent(&format!(
                "activity scheduled while at {}",
                self.stage
            )));
        }
        if self.activities.contains_key(token) {
            return Err(self.inconsistent(&format!("token {} scheduled twice", token)));
        }
        if self.activity_for(file_key, kind).is_some() {
            return Err(self.inconsistent(&format!("{} for {} scheduled twice", kind, file_key)));
        }
        let record = self
            .files
            .get_mut(file_key)
            .ok_or_else(|| ReplayError::Inconsistent {
                job_id: self.id.clone(),
                reason: format!("activity scheduled for unknown file {}", file_key),
            })?;
        *record.status_mut(kind) = SubtaskStatus::Pending;

        self.activities.insert(
            token.to_string(),
            ScheduledActivity {
                token: token.to_string(),
                request_id: request_id.to_string(),
                file_key: file_key.to_string(),
                kind,
                output_path,
                dispatched: false,
                outcome: None,
            },
        );
        Ok(())
    }

    fn resolve(
        &mut self,
        token: &str,
        file_key: &str,
        kind: ActivityKind,
        outcome: &ActivityOutcome,
    ) -> Result<(), ReplayError> {
        let job_id = self.id.clone();
        let activity = self.activity_mut(token)?;
        if activity.file_key != file_key || activity.kind != kind {
            return Err(ReplayError::Inconsistent {
                job_id,
                reason: format!("resolution of {} does not match its schedule", token),
            });
        }
        if activity.outcome.is_some() {
            return Err(ReplayError::Inconsistent {
                job_id,
                reason: format!("token {} resolved twice", token),
            });
        }
        if !outcome.fits(kind) {
            return Err(ReplayError::Inconsistent {
                job_id,
                reason: format!("outcome does not fit a {} activity", kind),
            });
        }
        activity.outcome = Some(outcome.clone());
        let output_path = activity.output_path.clone();

        let record = self
            .files
            .get_mut(file_key)
            .ok_or_else(|| ReplayError::Inconsistent {
                job_id: self.id.clone(),
                reason: format!("resolution for unknown file {}", file_key),
            })?;

        match (kind, outcome) {
            (ActivityKind::MetadataFetch, ActivityOutcome::Info { info }) => {
                record.duration_seconds = Some(info.duration_seconds);
                record.chapter_durations = Some(info.chapter_durations.clone());
                record.info_status = SubtaskStatus::Succeeded;
            }
            (ActivityKind::PreviewTranscode, ActivityOutcome::Transcoded) => {
                record.preview_path = output_path;
                record.preview_status = SubtaskStatus::Succeeded;
            }
            (kind, failed) => {
                let message = match failed {
                    ActivityOutcome::Failed { error } => error.clone(),
                    _ => format!("{} timed out", kind),
                };
                match kind {
                    ActivityKind::MetadataFetch => record.info_error = Some(message),
                    ActivityKind::PreviewTranscode => record.preview_error = Some(message),
                }
                *record.status_mut(kind) = SubtaskStatus::Failed;
            }
        }

        if let Some(barrier) = self.barrier.as_mut() {
            barrier.record(file_key, kind);
        }
        Ok(())
    }

    fn activity_mut(&mut self, token: &str) -> Result<&mut ScheduledActivity, ReplayError> {
        let job_id = self.id.clone();
        self.activities
            .get_mut(token)
            .ok_or_else(|| ReplayError::Inconsistent {
                job_id,
                reason: format!("unknown token {}", token),
            })
    }

    fn inconsistent(&self, reason: &str) -> ReplayError {
        ReplayError::Inconsistent {
            job_id: self.id.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// A terminal job will never record another transition.
    pub fn is_terminal(&self) -> bool {
        self.is_failed() || self.stage >= FINAL_STAGE
    }

    pub fn activity(&self, token: &str) -> Option<&ScheduledActivity> {
        self.activities.get(token)
    }

    pub fn activity_for(&self, file_key: &str, kind: ActivityKind) -> Option<&ScheduledActivity> {
        self.activities
            .values()
            .find(|a| a.file_key == file_key && a.kind == kind)
    }

    pub fn activities(&self) -> impl Iterator<Item = &ScheduledActivity> {
        self.activities.values()
    }

    /// Tokens still awaiting an external resolution.
    pub fn pending_tokens(&self) -> Vec<String> {
        self.activities
            .values()
            .filter(|a| a.is_pending())
            .map(|a| a.token.clone())
            .collect()
    }

    /// Activities with an issued token whose request was never acknowledged.
    pub fn undispatched(&self) -> Vec<ScheduledActivity> {
        self.activities
            .values()
            .filter(|a| a.is_pending() && !a.dispatched)
            .cloned()
            .collect()
    }

    /// `(file, kind)` pairs that have no activity yet.
    pub fn unscheduled(&self) -> Vec<(String, ActivityKind)> {
        self.files
            .keys()
            .flat_map(|file| ActivityKind::ALL.iter().map(move |kind| (file.clone(), *kind)))
            .filter(|(file, kind)| self.activity_for(file, *kind).is_none())
            .collect()
    }

    pub fn barrier(&self) -> Option<&JoinBarrier> {
        self.barrier.as_ref()
    }

    pub fn barrier_satisfied(&self) -> bool {
        self.barrier.as_ref().is_some_and(JoinBarrier::is_satisfied)
    }
}
