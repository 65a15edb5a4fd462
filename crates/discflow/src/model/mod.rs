//! Data model of disc ingestion jobs.

pub mod activity;
pub mod barrier;
pub mod history;
pub mod job;
pub mod stage;

pub use activity::{ActivityKind, ActivityOutcome, ActivityStatus, PendingActivity, VideoInfo};
pub use barrier::JoinBarrier;
pub use history::{HistoryEvent, RecordedEvent};
pub use job::{FileRecord, Job, JobFailure, ScheduledActivity, SubtaskStatus};
pub use stage::{JobStatus, Stage, FINAL_STAGE};
