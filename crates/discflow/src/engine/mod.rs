//! Durable execution engine for disc ingestion jobs.
//!
//! Every change to a job is staged as a [`Transition`] against a copy of the
//! job, validated by applying it, and then persisted in a single SQLite
//! transaction together with the matching token-registry change. Only after
//! the commit succeeds does the in-memory copy replace the cached job.
//!
//! Each job has one exclusive slot. It is held while a transition is staged
//! and committed, never while an external call is in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

pub mod config;
mod driver;
pub mod transition;

pub use config::EngineConfig;
pub use transition::Transition;

use crate::activity::ActivityGateway;
use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::db::{history_repo, job_repo, Database, DatabaseError};
use crate::error::EngineError;
use crate::model::{
    ActivityKind, ActivityOutcome, HistoryEvent, Job, RecordedEvent, Stage, FINAL_STAGE,
};
use crate::registry;

/// Result of submitting a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created,
    /// A job with this id already exists; nothing was changed.
    Conflict,
}

/// Result of delivering an activity outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Applied {
        job_id: String,
        /// This resolution satisfied the join barrier.
        diagnostics_complete: bool,
    },
    /// The token was already resolved; nothing was changed.
    Duplicate,
    UnknownToken,
}

impl Resolution {
    pub fn is_applied(&self) -> bool {
        matches!(self, Resolution::Applied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Extended,
    /// The token exists but is resolved or is not a transcode.
    NotExtendable,
    UnknownToken,
}

#[derive(Default)]
struct JobSlot {
    /// Last committed state; `None` until loaded or after the job ended.
    job: Option<Job>,
    driving: bool,
}

struct EngineInner {
    db: Database,
    config: EngineConfig,
    activities: ActivityGateway,
    progress: JobProgressBroadcaster,
    slots: StdMutex<HashMap<String, Arc<Mutex<JobSlot>>>>,
}

/// Handle to the engine. Cloning is cheap.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

fn load_job(db: &Database, job_id: &str) -> Result<Job, EngineError> {
    let rows = db.with_conn(|conn| history_repo::load(conn, job_id))?;
    if rows.is_empty() {
        return Err(EngineError::JobNotFound(job_id.to_string()));
    }
    let events = history_repo::decode_all(&rows)?;
    Ok(Job::replay(job_id, &events)?)
}

impl Engine {
    pub fn new(
        db: Database,
        config: EngineConfig,
        activities: ActivityGateway,
        progress: JobProgressBroadcaster,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                db,
                config,
                activities,
                progress,
                slots: StdMutex::new(HashMap::new()),
            }),
        }
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn progress(&self) -> &JobProgressBroadcaster {
        &self.inner.progress
    }

    pub(crate) fn activities(&self) -> &ActivityGateway {
        &self.inner.activities
    }

    fn slot(&self, job_id: &str) -> Result<Arc<Mutex<JobSlot>>, EngineError> {
        let mut slots = self
            .inner
            .slots
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned)?;
        Ok(slots
            .entry(job_id.to_string())
            .or_default()
            .clone())
    }

    /// Drops the slot of a job that has nothing cached, no driver and no
    /// other waiter. `state` is the slot's contents as seen by the caller,
    /// which still holds the lock.
    fn release(&self, job_id: &str, slot: &Arc<Mutex<JobSlot>>, state: &JobSlot) {
        if state.job.is_some() || state.driving {
            return;
        }
        let Ok(mut slots) = self.inner.slots.lock() else {
            return;
        };
        // One reference in the map, one held by the caller.
        let idle = slots
            .get(job_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if idle {
            slots.remove(job_id);
        }
    }

    /// Durably records a new job. Does not start it.
    pub async fn create(&self, job_id: &str, source_path: &str) -> Result<SubmitOutcome, EngineError> {
        let slot = self.slot(job_id)?;
        let mut guard = slot.lock().await;

        let created = HistoryEvent::Created {
            source_path: source_path.to_string(),
            library_path: self
                .inner
                .config
                .library_path_for(job_id)
                .to_string_lossy()
                .into_owned(),
            preview_base_path: self
                .inner
                .config
                .preview_path_for(job_id)
                .to_string_lossy()
                .into_owned(),
        };
        let job = Job::from_created(
            job_id,
            &RecordedEvent {
                seq: 0,
                event: created.clone(),
            },
        )?;

        let now = Utc::now().to_rfc3339();
        let row = job_repo::JobRow {
            id: job.id.clone(),
            source_path: job.source_path.clone(),
            library_path: job.library_path.clone(),
            preview_base_path: job.preview_base_path.clone(),
            stage: job.stage.as_str().to_string(),
            failed: false,
            error: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        let inserted = self.inner.db.transaction(|tx| {
            if !job_repo::insert(tx, &row)? {
                return Ok::<_, EngineError>(false);
            }
            history_repo::append(tx, job_id, 0, &created, &now)?;
            Ok(true)
        })?;

        if !inserted {
            log::info!("Job {} already exists", job_id);
            self.release(job_id, &slot, &guard);
            return Ok(SubmitOutcome::Conflict);
        }

        log::info!("Created job {} for {}", job_id, source_path);
        self.inner
            .progress
            .send(JobProgressEvent::stage(job_id, Stage::Created));
        guard.job = Some(job);
        Ok(SubmitOutcome::Created)
    }

    pub fn spawn_drive(&self, job_id: &str) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.drive(&job_id).await {
                log::error!("Driving job {} stopped: {}", job_id, e);
            }
        })
    }

    /// Last committed state of a job.
    pub async fn job(&self, job_id: &str) -> Result<Job, EngineError> {
        let slot = self.slot(job_id)?;
        let guard = slot.lock().await;
        let job = match &guard.job {
            Some(job) => Ok(job.clone()),
            None => load_job(&self.inner.db, job_id),
        };
        self.release(job_id, &slot, &guard);
        job
    }

    /// Stages a transition with `build` and commits it.
    ///
    /// Returns the committed job and whatever `build` returned. A transition
    /// that stages nothing commits nothing.
    pub(crate) async fn commit<F, T>(&self, job_id: &str, build: F) -> Result<(Job, T), EngineError>
    where
        F: FnOnce(&mut Transition) -> Result<T, EngineError>,
    {
        let slot = self.slot(job_id)?;
        let mut guard = slot.lock().await;
        let result = self.commit_locked(job_id, &mut guard, build);
        if guard.job.as_ref().is_some_and(Job::is_terminal) {
            guard.job = None;
        }
        self.release(job_id, &slot, &guard);
        result
    }

    fn commit_locked<F, T>(
        &self,
        job_id: &str,
        guard: &mut JobSlot,
        build: F,
    ) -> Result<(Job, T), EngineError>
    where
        F: FnOnce(&mut Transition) -> Result<T, EngineError>,
    {
        let current = match guard.job.take() {
            Some(job) => job,
            None => load_job(&self.inner.db, job_id)?,
        };

        let mut transition = Transition::new(current.clone());
        let value = match build(&mut transition) {
            Ok(value) => value,
            Err(e) => {
                guard.job = Some(current);
                return Err(e);
            }
        };
        if transition.is_empty() {
            guard.job = Some(current.clone());
            return Ok((current, value));
        }

        let now = Utc::now();
        if let Err(e) = self
            .inner
            .db
            .transaction(|tx| transition.persist(tx, now))
        {
            guard.job = Some(current);
            return Err(e);
        }

        let (job, events) = transition.into_parts();
        self.publish(&job, &events);
        if !job.is_terminal() {
            guard.job = Some(job.clone());
        }
        Ok((job, value))
    }

    fn publish(&self, job: &Job, events: &[HistoryEvent]) {
        for event in events {
            let progress = match event {
                HistoryEvent::StageAdvanced { stage } => JobProgressEvent::stage(&job.id, *stage),
                HistoryEvent::FilesListed { .. } => {
                    JobProgressEvent::stage(&job.id, Stage::FilesListed)
                }
                HistoryEvent::ActivityResolved {
                    file_key,
                    kind,
                    outcome,
                    ..
                } => {
                    let error = match outcome {
                        ActivityOutcome::Failed { error } => Some(error.clone()),
                        ActivityOutcome::TimedOut => Some(format!("{} timed out", kind)),
                        _ => None,
                    };
                    JobProgressEvent::activity_resolved(
                        &job.id,
                        job.stage,
                        file_key,
                        *kind,
                        error.as_deref(),
                    )
                }
                HistoryEvent::Failed { stage, error } => {
                    JobProgressEvent::failed(&job.id, *stage, error)
                }
                _ => continue,
            };
            self.inner.progress.send(progress);
        }
    }

    /// Delivers the outcome of an asynchronous activity.
    ///
    /// The outcome is applied at most once per token. When it is the last
    /// outstanding resolution the job advances to `DiagnosticsComplete` in
    /// the same commit.
    pub async fn resolve(
        &self,
        token: &str,
        expected_kind: ActivityKind,
        outcome: ActivityOutcome,
    ) -> Result<Resolution, EngineError> {
        let record = match self
            .inner
            .db
            .transaction(|tx| Ok::<_, EngineError>(registry::get_in(tx, token)?))?
        {
            Some(record) => record,
            None => return Ok(Resolution::UnknownToken),
        };
        if record.kind != expected_kind {
            log::warn!(
                "Token {} for a {} activity was delivered as {}",
                token,
                record.kind,
                expected_kind
            );
            return Err(EngineError::KindMismatch {
                token: token.to_string(),
                expected: expected_kind,
            });
        }
        if record.status.is_terminal() {
            log::debug!("Ignoring repeated resolution of {}", token);
            return Ok(Resolution::Duplicate);
        }

        let job_id = record.job_id.clone();
        let committed = self
            .commit(&job_id, |t| {
                let activity = match t.job().activity(token) {
                    Some(activity) if activity.is_pending() => activity.clone(),
                    Some(_) => return Ok(false),
                    None => {
                        return Err(EngineError::Replay(
                            crate::error::ReplayError::Inconsistent {
                                job_id: job_id.clone(),
                                reason: format!("token {} has no scheduled activity", token),
                            },
                        ))
                    }
                };

                t.resolve(token, &outcome);
                t.push(HistoryEvent::ActivityResolved {
                    token: token.to_string(),
                    file_key: activity.file_key.clone(),
                    kind: activity.kind,
                    outcome: outcome.clone(),
                })?;

                if t.job().stage == Stage::RunningDiagnostics && t.job().barrier_satisfied() {
                    t.push(HistoryEvent::StageAdvanced {
                        stage: Stage::DiagnosticsComplete,
                    })?;
                }
                Ok(true)
            })
            .await;

        match committed {
            Ok((job, true)) => {
                let diagnostics_complete = job.stage == Stage::DiagnosticsComplete;
                if diagnostics_complete {
                    log::info!("Job {} finished diagnostics", job_id);
                }
                Ok(Resolution::Applied {
                    job_id,
                    diagnostics_complete,
                })
            }
            Ok((_, false)) | Err(EngineError::TokenNotPending(_)) => Ok(Resolution::Duplicate),
            Err(e) => Err(e),
        }
    }

    /// Extends the deadline of a running transcode.
    pub async fn heartbeat(
        &self,
        token: &str,
        progress_percent: Option<f64>,
    ) -> Result<HeartbeatOutcome, EngineError> {
        self.heartbeat_at(token, progress_percent, Utc::now()).await
    }

    pub async fn heartbeat_at(
        &self,
        token: &str,
        progress_percent: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatOutcome, EngineError> {
        let extension = self.inner.config.transcode_heartbeat_timeout;
        let (record, extended) = self.inner.db.transaction(|tx| {
            let record = registry::get_in(tx, token)?;
            let extended = match &record {
                Some(_) => registry::heartbeat_in(tx, token, progress_percent, now, extension)?,
                None => false,
            };
            Ok::<_, EngineError>((record, extended))
        })?;

        match record {
            None => Ok(HeartbeatOutcome::UnknownToken),
            Some(_) if !extended => Ok(HeartbeatOutcome::NotExtendable),
            Some(record) => {
                self.inner.progress.send(JobProgressEvent::heartbeat(
                    &record.job_id,
                    Stage::RunningDiagnostics,
                    &record.file_key,
                    progress_percent,
                ));
                Ok(HeartbeatOutcome::Extended)
            }
        }
    }

    /// Times out every pending activity whose deadline has passed.
    /// Returns how many were resolved.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let expired = self
            .inner
            .db
            .transaction(|tx| Ok::<_, EngineError>(registry::expired_in(tx, now)?))?;

        let mut resolved = 0;
        for record in expired {
            log::warn!(
                "{} for {} in job {} timed out",
                record.kind,
                record.file_key,
                record.job_id
            );
            if self
                .resolve(&record.token, record.kind, ActivityOutcome::TimedOut)
                .await?
                .is_applied()
            {
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    /// Resumes every job that has not reached a terminal state.
    ///
    /// Completed stages are not repeated. Activities whose request was never
    /// acknowledged are sent again under their original token.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let rows = self.inner.db.with_conn(job_repo::list_not_failed)?;
        let unfinished: Vec<String> = rows
            .into_iter()
            .filter(|row| Stage::parse(&row.stage).is_some_and(|stage| stage < FINAL_STAGE))
            .map(|row| row.id)
            .collect();

        log::info!("Recovering {} unfinished job(s)", unfinished.len());

        let results =
            futures_util::future::join_all(unfinished.iter().map(|job_id| self.drive(job_id)))
                .await;
        for (job_id, result) in unfinished.iter().zip(&results) {
            if let Err(e) = result {
                log::error!("Recovery of job {} failed: {}", job_id, e);
            }
        }
        Ok(unfinished.len())
    }
}
