use std::path::PathBuf;
use thiserror::Error;

use crate::model::Stage;

#[derive(Error, Debug)]
pub enum DiscflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Activity error: {0}")]
    Activity(#[from] ActivityError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    #[error("Invalid value for environment variable '{name}': {reason}")]
    InvalidEnv { name: &'static str, reason: String },
}

/// Failure of a single activity invocation, classified for the retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActivityError {
    /// May succeed if attempted again.
    #[error("{operation} failed (transient): {message}")]
    Transient { operation: String, message: String },

    /// Retrying cannot help.
    #[error("{operation} failed: {message}")]
    Permanent { operation: String, message: String },

    /// A single attempt exceeded its timeout.
    #[error("{operation} timed out after {seconds}s")]
    TimedOut { operation: String, seconds: u64 },
}

impl ActivityError {
    pub fn transient(operation: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn permanent(operation: &str, message: impl Into<String>) -> Self {
        Self::Permanent {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent { .. })
    }

    /// Classifies an I/O failure from a file-system activity.
    pub fn from_io(operation: &str, path: &std::path::Path, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let message = format!("{}: {}", path.display(), err);
        match err.kind() {
            ErrorKind::NotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::AlreadyExists
            | ErrorKind::InvalidInput
            | ErrorKind::InvalidData
            | ErrorKind::Unsupported => Self::permanent(operation, message),
            _ => Self::transient(operation, message),
        }
    }
}

/// History that cannot be folded into a consistent job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("History for job '{job_id}' is empty")]
    EmptyHistory { job_id: String },

    #[error("History for job '{job_id}' does not start with a Created event")]
    MissingCreated { job_id: String },

    #[error("Event {seq} of job '{job_id}' is out of sequence (expected {expected})")]
    OutOfSequence {
        job_id: String,
        seq: u64,
        expected: u64,
    },

    #[error("Job '{job_id}' cannot move from {from} to {to}")]
    InvalidTransition { job_id: String, from: Stage, to: Stage },

    #[error("Job '{job_id}' has already failed; no further transitions allowed")]
    AlreadyFailed { job_id: String },

    #[error("Job '{job_id}': {reason}")]
    Inconsistent { job_id: String, reason: String },

    #[error("Failed to decode event {seq} of job '{job_id}': {reason}")]
    Decode {
        job_id: String,
        seq: u64,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to generate token: {0}")]
    Entropy(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Token {0} is no longer pending")]
    TokenNotPending(String),

    #[error("Token {token} was not issued for a {expected} activity")]
    KindMismatch {
        token: String,
        expected: crate::model::ActivityKind,
    },
}

pub type Result<T> = std::result::Result<T, DiscflowError>;
