//! Runs a job's synchronous stages and its diagnostics fan-out.
//!
//! The driver advances one stage per loop iteration, performing the stage's
//! side effect outside the job slot and committing the result inside it.
//! Once every activity has been handed out it exits; the job then waits on
//! durable records only, and resolutions re-enter it through
//! [`Engine::resolve`].

use std::path::Path;

use chrono::Utc;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{Engine, Resolution};
use crate::activity::preview_path_for;
use crate::error::{ActivityError, EngineError};
use crate::model::{ActivityKind, ActivityOutcome, HistoryEvent, Job, ScheduledActivity, Stage};
use crate::registry;

impl Engine {
    /// Drives a job until it suspends on its join barrier or ends.
    ///
    /// Only one driver runs per job; a second call while one is active
    /// returns immediately.
    pub async fn drive(&self, job_id: &str) -> Result<(), EngineError> {
        let slot = self.slot(job_id)?;
        {
            let mut guard = slot.lock().await;
            if guard.driving {
                log::debug!("Job {} is already being driven", job_id);
                return Ok(());
            }
            guard.driving = true;
        }

        let result = self
            .run_stages(job_id)
            .instrument(info_span!("drive", job_id = %job_id))
            .await;

        let mut guard = slot.lock().await;
        guard.driving = false;
        self.release(job_id, &slot, &guard);
        result
    }

    async fn run_stages(&self, job_id: &str) -> Result<(), EngineError> {
        loop {
            let job = self.job(job_id).await?;
            if job.is_terminal() {
                return Ok(());
            }

            let span = info_span!("stage", job_id = %job_id, stage = %job.stage);
            let suspended = self.step(&job).instrument(span).await?;
            if suspended {
                return Ok(());
            }
        }
    }

    /// Performs the work of the job's current stage. Returns `true` once the
    /// job is waiting on external callbacks.
    async fn step(&self, job: &Job) -> Result<bool, EngineError> {
        match job.stage {
            Stage::Created => {
                self.advance(job, Stage::MovingDirectory).await?;
            }
            Stage::MovingDirectory => {
                let source = Path::new(&job.source_path);
                let target = Path::new(&job.library_path);
                match self.activities().move_disc(source, target).await {
                    Ok(()) => {
                        log::info!("Moved {} to {}", job.source_path, job.library_path);
                        self.advance(job, Stage::DirectoryMoved).await?;
                    }
                    Err(e) => self.fail(job, &e).await?,
                }
            }
            Stage::DirectoryMoved => {
                self.advance(job, Stage::ListingFiles).await?;
            }
            Stage::ListingFiles => {
                match self
                    .activities()
                    .list_videos(Path::new(&job.library_path))
                    .await
                {
                    Ok(files) => {
                        log::info!("Found {} video file(s) in {}", files.len(), job.library_path);
                        self.commit(&job.id, |t| {
                            if t.job().stage == Stage::ListingFiles {
                                t.push(HistoryEvent::FilesListed { files })?;
                            }
                            Ok(())
                        })
                        .await?;
                    }
                    Err(e) => self.fail(job, &e).await?,
                }
            }
            Stage::FilesListed => {
                self.advance(job, Stage::PreparingPreviewArea).await?;
            }
            Stage::PreparingPreviewArea => {
                match self
                    .activities()
                    .prepare_preview_area(Path::new(&job.preview_base_path))
                    .await
                {
                    Ok(()) => self.advance(job, Stage::RunningDiagnostics).await?,
                    Err(e) => self.fail(job, &e).await?,
                }
            }
            Stage::RunningDiagnostics => {
                if job.barrier_satisfied() {
                    self.advance(job, Stage::DiagnosticsComplete).await?;
                    return Ok(false);
                }
                self.fan_out(job).await?;
                return Ok(true);
            }
            Stage::DiagnosticsComplete
            | Stage::Categorizing
            | Stage::Relocating
            | Stage::TranscodingMainTitle => return Ok(true),
        }
        Ok(false)
    }

    async fn advance(&self, job: &Job, to: Stage) -> Result<(), EngineError> {
        let from = job.stage;
        self.commit(&job.id, |t| {
            if t.job().stage == from && !t.job().is_failed() {
                t.push(HistoryEvent::StageAdvanced { stage: to })?;
            }
            Ok(())
        })
        .await?;
        log::debug!("Job {} advanced to {}", job.id, to);
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &ActivityError) -> Result<(), EngineError> {
        let stage = job.stage;
        log::error!("Job {} failed at {}: {}", job.id, stage, error);
        self.commit(&job.id, |t| {
            if t.job().stage == stage && !t.job().is_failed() {
                t.push(HistoryEvent::Failed {
                    stage,
                    error: error.to_string(),
                })?;
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Schedules every missing activity, then sends every request that has
    /// not been acknowledged yet.
    async fn fan_out(&self, job: &Job) -> Result<(), EngineError> {
        let unscheduled = job.unscheduled();
        let job = if unscheduled.is_empty() {
            job.clone()
        } else {
            self.schedule(job, unscheduled).await?
        };

        let undispatched = job.undispatched();
        if undispatched.is_empty() {
            return Ok(());
        }
        log::info!(
            "Dispatching {} activit{} for job {}",
            undispatched.len(),
            if undispatched.len() == 1 { "y" } else { "ies" },
            job.id
        );

        let results = futures_util::future::join_all(
            undispatched
                .iter()
                .map(|activity| self.activities().dispatch(activity)),
        )
        .await;

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for (activity, result) in undispatched.into_iter().zip(results) {
            match result {
                Ok(()) => accepted.push(activity),
                Err(e) => rejected.push((activity, e)),
            }
        }

        if !accepted.is_empty() {
            self.commit(&job.id, |t| {
                for activity in &accepted {
                    let still_waiting = t
                        .job()
                        .activity(&activity.token)
                        .is_some_and(|a| a.is_pending() && !a.dispatched);
                    if still_waiting {
                        t.push(HistoryEvent::ActivityDispatched {
                            token: activity.token.clone(),
                        })?;
                    }
                }
                Ok(())
            })
            .await?;
        }

        for (activity, error) in rejected {
            self.reject(&activity, &error).await?;
        }
        Ok(())
    }

    async fn schedule(
        &self,
        job: &Job,
        unscheduled: Vec<(String, ActivityKind)>,
    ) -> Result<Job, EngineError> {
        let now = Utc::now();
        let preview_base = Path::new(&job.preview_base_path);

        let mut planned = Vec::with_capacity(unscheduled.len());
        for (file_key, kind) in unscheduled {
            let token = registry::new_token()?;
            let (deadline, output_path) = match kind {
                ActivityKind::MetadataFetch => (now + self.config().metadata_timeout, None),
                ActivityKind::PreviewTranscode => (
                    now + self.config().transcode_heartbeat_timeout,
                    Some(
                        preview_path_for(preview_base, Path::new(&file_key))
                            .to_string_lossy()
                            .into_owned(),
                    ),
                ),
            };
            planned.push((file_key, kind, token, deadline, output_path));
        }

        let (job, _) = self
            .commit(&job.id, |t| {
                for (file_key, kind, token, deadline, output_path) in planned {
                    if t.job().activity_for(&file_key, kind).is_some() {
                        continue;
                    }
                    t.register(&token, &file_key, kind, deadline);
                    t.push(HistoryEvent::ActivityScheduled {
                        token,
                        request_id: Uuid::new_v4().to_string(),
                        file_key,
                        kind,
                        output_path,
                    })?;
                }
                Ok(())
            })
            .await?;
        Ok(job)
    }

    /// A request the service refused up front resolves as failed.
    async fn reject(
        &self,
        activity: &ScheduledActivity,
        error: &ActivityError,
    ) -> Result<(), EngineError> {
        log::warn!(
            "{} request for {} was rejected: {}",
            activity.kind,
            activity.file_key,
            error
        );
        let resolution = self
            .resolve(
                &activity.token,
                activity.kind,
                ActivityOutcome::failed(error.to_string()),
            )
            .await?;
        if resolution == Resolution::UnknownToken {
            log::error!("Token {} vanished from the registry", activity.token);
        }
        Ok(())
    }
}
