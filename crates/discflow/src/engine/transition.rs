//! A batch of history events plus registry changes, committed atomically.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::{history_repo, job_repo};
use crate::error::{EngineError, ReplayError};
use crate::model::{ActivityKind, ActivityOutcome, HistoryEvent, Job};
use crate::registry;

#[derive(Debug, Clone)]
enum RegistryChange {
    Register {
        token: String,
        file_key: String,
        kind: ActivityKind,
        deadline: DateTime<Utc>,
    },
    Resolve {
        token: String,
        outcome: ActivityOutcome,
    },
}

/// Changes staged against a private copy of a job.
///
/// Every pushed event is applied to the copy immediately, so an illegal
/// transition is rejected before anything is written.
#[derive(Debug)]
pub struct Transition {
    job: Job,
    first_seq: u64,
    events: Vec<HistoryEvent>,
    registry: Vec<RegistryChange>,
}

impl Transition {
    pub fn new(job: Job) -> Self {
        let first_seq = job.next_seq();
        Self {
            job,
            first_seq,
            events: Vec::new(),
            registry: Vec::new(),
        }
    }

    /// The job with all staged events applied.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.registry.is_empty()
    }

    pub fn push(&mut self, event: HistoryEvent) -> Result<(), ReplayError> {
        self.job.apply(&event)?;
        self.events.push(event);
        Ok(())
    }

    /// Registers a pending token alongside the staged events.
    pub fn register(
        &mut self,
        token: &str,
        file_key: &str,
        kind: ActivityKind,
        deadline: DateTime<Utc>,
    ) {
        self.registry.push(RegistryChange::Register {
            token: token.to_string(),
            file_key: file_key.to_string(),
            kind,
            deadline,
        });
    }

    /// Resolves a token alongside the staged events. The commit fails with
    /// [`EngineError::TokenNotPending`] if the token was already resolved.
    pub fn resolve(&mut self, token: &str, outcome: &ActivityOutcome) {
        self.registry.push(RegistryChange::Resolve {
            token: token.to_string(),
            outcome: outcome.clone(),
        });
    }

    /// Writes registry changes, history and the job projection.
    pub(crate) fn persist(&self, conn: &Connection, now: DateTime<Utc>) -> Result<(), EngineError> {
        let job_id = &self.job.id;

        for change in &self.registry {
            match change {
                RegistryChange::Register {
                    token,
                    file_key,
                    kind,
                    deadline,
                } => registry::register_in(conn, token, job_id, file_key, *kind, now, *deadline)?,
                RegistryChange::Resolve { token, outcome } => {
                    if !registry::resolve_in(conn, token, outcome, now)? {
                        return Err(EngineError::TokenNotPending(token.clone()));
                    }
                }
            }
        }

        let recorded_at = now.to_rfc3339();
        for (offset, event) in self.events.iter().enumerate() {
            history_repo::append(conn, job_id, self.first_seq + offset as u64, event, &recorded_at)?;
        }

        if !self.events.is_empty() {
            job_repo::update_stage(
                conn,
                job_id,
                self.job.stage.as_str(),
                self.job.is_failed(),
                self.job.failure.as_ref().map(|f| f.error.as_str()),
                &recorded_at,
            )?;
        }
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (Job, Vec<HistoryEvent>) {
        (self.job, self.events)
    }
}
