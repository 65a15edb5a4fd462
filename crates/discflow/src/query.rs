//! Read-only views of job state, rebuilt from durable history.

use serde::Serialize;

use crate::db::{history_repo, job_repo, Database};
use crate::error::EngineError;
use crate::model::{FileRecord, Job, JobStatus, RecordedEvent, Stage};

/// One file of a job snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    pub path: String,
    #[serde(flatten)]
    pub record: FileRecord,
}

/// Point-in-time copy of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub stage: Stage,
    pub source_path: String,
    pub library_path: String,
    pub preview_base_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub files: Vec<FileSnapshot>,
    /// Number of activities still awaiting a callback.
    pub pending_activities: usize,
    /// Tokens of those activities. Holding a token is what authorizes a
    /// completion, so they never leave the process.
    #[serde(skip)]
    pub pending_tokens: Vec<String>,
}

impl JobSnapshot {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: JobStatus::derive(job.stage, job.is_failed()),
            stage: job.stage,
            source_path: job.source_path.clone(),
            library_path: job.library_path.clone(),
            preview_base_path: job.preview_base_path.clone(),
            error: job.failure.as_ref().map(|f| f.error.clone()),
            files: job
                .files
                .iter()
                .map(|(path, record)| FileSnapshot {
                    path: path.clone(),
                    record: record.clone(),
                })
                .collect(),
            pending_activities: job.pending_tokens().len(),
            pending_tokens: job.pending_tokens(),
        }
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| &f.record)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub stage: Stage,
    pub status: JobStatus,
}

/// Answers job queries straight from the store, so a snapshot only ever
/// reflects committed transitions.
#[derive(Clone)]
pub struct QueryService {
    db: Database,
}

impl QueryService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Every recorded event of a job, in order.
    pub fn history(&self, job_id: &str) -> Result<Vec<RecordedEvent>, EngineError> {
        let rows = self.db.with_conn(|conn| history_repo::load(conn, job_id))?;
        if rows.is_empty() {
            return Err(EngineError::JobNotFound(job_id.to_string()));
        }
        Ok(history_repo::decode_all(&rows)?)
    }

    pub fn get_state(&self, job_id: &str) -> Result<JobSnapshot, EngineError> {
        let events = self.history(job_id)?;
        let job = Job::replay(job_id, &events)?;
        Ok(JobSnapshot::from_job(&job))
    }

    /// State of a job as of its first `len` events.
    pub fn get_state_at(&self, job_id: &str, len: usize) -> Result<JobSnapshot, EngineError> {
        let events = self.history(job_id)?;
        let job = Job::replay(job_id, &events[..len.min(events.len())])?;
        Ok(JobSnapshot::from_job(&job))
    }

    pub fn list_jobs(&self) -> Result<Vec<JobSummary>, EngineError> {
        let rows = self.db.with_conn(job_repo::list)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let stage = match Stage::parse(&row.stage) {
                    Some(stage) => stage,
                    None => {
                        log::warn!("Job {} has unknown stage '{}'", row.id, row.stage);
                        return None;
                    }
                };
                Some(JobSummary {
                    status: JobStatus::derive(stage, row.failed),
                    id: row.id,
                    stage,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HistoryEvent;

    fn seed(db: &Database, job_id: &str, events: &[HistoryEvent]) {
        db.with_conn(|conn| {
            job_repo::insert(
                conn,
                &job_repo::JobRow {
                    id: job_id.to_string(),
                    source_path: "/in/disc".to_string(),
                    library_path: format!("/lib/{}", job_id),
                    preview_base_path: format!("/prev/{}", job_id),
                    stage: "created".to_string(),
                    failed: false,
                    error: None,
                    created_at: "2026-01-01T00:00:00Z".to_string(),
                    updated_at: "2026-01-01T00:00:00Z".to_string(),
                },
            )?;
            for (seq, event) in events.iter().enumerate() {
                history_repo::append(conn, job_id, seq as u64, event, "2026-01-01T00:00:00Z")?;
            }
            Ok(())
        })
        .unwrap();
    }

    fn created(job_id: &str) -> HistoryEvent {
        HistoryEvent::Created {
            source_path: "/in/disc".to_string(),
            library_path: format!("/lib/{}", job_id),
            preview_base_path: format!("/prev/{}", job_id),
        }
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let service = QueryService::new(Database::open_in_memory().unwrap());
        assert!(matches!(
            service.get_state("missing"),
            Err(EngineError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_snapshot_of_listed_job() {
        let db = Database::open_in_memory().unwrap();
        seed(
            &db,
            "j",
            &[
                created("j"),
                HistoryEvent::StageAdvanced {
                    stage: Stage::MovingDirectory,
                },
                HistoryEvent::StageAdvanced {
                    stage: Stage::DirectoryMoved,
                },
                HistoryEvent::StageAdvanced {
                    stage: Stage::ListingFiles,
                },
                HistoryEvent::FilesListed {
                    files: vec!["/lib/j/a.mkv".to_string()],
                },
            ],
        );

        let service = QueryService::new(db);
        let snapshot = service.get_state("j").unwrap();
        assert_eq!(snapshot.status, JobStatus::FilesListed);
        assert_eq!(snapshot.stage, Stage::FilesListed);
        assert!(snapshot.file("/lib/j/a.mkv").is_some());

        let earlier = service.get_state_at("j", 3).unwrap();
        assert_eq!(earlier.status, JobStatus::DirectoryMoved);
        assert!(earlier.files.is_empty());
    }

    #[test]
    fn test_snapshot_serializes_flat_files() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "j", &[created("j")]);
        let value = serde_json::to_value(QueryService::new(db).get_state("j").unwrap()).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["sourcePath"], "/in/disc");
        assert!(value.get("error").is_none());
        assert_eq!(value["pendingActivities"], 0);
    }

    #[test]
    fn test_snapshot_never_serializes_tokens() {
        let db = Database::open_in_memory().unwrap();
        seed(
            &db,
            "j",
            &[
                created("j"),
                HistoryEvent::StageAdvanced {
                    stage: Stage::MovingDirectory,
                },
                HistoryEvent::StageAdvanced {
                    stage: Stage::DirectoryMoved,
                },
                HistoryEvent::StageAdvanced {
                    stage: Stage::ListingFiles,
                },
                HistoryEvent::FilesListed {
                    files: vec!["/lib/j/a.mkv".to_string()],
                },
                HistoryEvent::StageAdvanced {
                    stage: Stage::PreparingPreviewArea,
                },
                HistoryEvent::StageAdvanced {
                    stage: Stage::RunningDiagnostics,
                },
                HistoryEvent::ActivityScheduled {
                    token: "secret-token-1".to_string(),
                    request_id: "r1".to_string(),
                    file_key: "/lib/j/a.mkv".to_string(),
                    kind: crate::model::ActivityKind::MetadataFetch,
                    output_path: None,
                },
            ],
        );

        let snapshot = QueryService::new(db).get_state("j").unwrap();
        assert_eq!(snapshot.pending_tokens, vec!["secret-token-1".to_string()]);

        let body = serde_json::to_string(&snapshot).unwrap();
        assert!(!body.contains("secret-token-1"));
        assert!(!body.contains("pendingTokens"));
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["pendingActivities"], 1);
    }

    #[test]
    fn test_list_jobs_derives_status() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "a", &[created("a")]);
        db.with_conn(|conn| {
            job_repo::update_stage(conn, "a", "moving_directory", true, Some("gone"), "x")
        })
        .unwrap();

        let jobs = QueryService::new(db).list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].stage, Stage::MovingDirectory);
    }
}
