pub mod activity;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod model;
pub mod query;
pub mod registry;
pub mod sweeper;

pub use activity::ActivityGateway;
pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, Config};
pub use db::Database;
pub use engine::{Engine, EngineConfig, HeartbeatOutcome, Resolution, SubmitOutcome};
pub use error::{ActivityError, ConfigError, DiscflowError, EngineError, ReplayError, Result};
pub use gateway::{GatewayError, JobGateway, MetadataResult};
pub use model::{ActivityKind, ActivityOutcome, Job, JobStatus, Stage};
pub use query::{JobSnapshot, JobSummary, QueryService};
pub use registry::TokenRegistry;
pub use sweeper::ExpirySweeper;
