use std::path::PathBuf;

use chrono::Duration;

use crate::config::Config;

/// Runtime settings the engine needs, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub library_root: PathBuf,
    pub preview_root: PathBuf,
    /// How long a metadata request may stay outstanding.
    pub metadata_timeout: Duration,
    /// How long a transcode may go without a heartbeat.
    pub transcode_heartbeat_timeout: Duration,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            library_root: PathBuf::from(&config.library_path),
            preview_root: PathBuf::from(&config.preview_path),
            metadata_timeout: Duration::seconds(config.timeouts.metadata_secs as i64),
            transcode_heartbeat_timeout: Duration::seconds(
                config.timeouts.transcode_heartbeat_secs as i64,
            ),
        }
    }

    pub fn library_path_for(&self, job_id: &str) -> PathBuf {
        self.library_root.join(job_id)
    }

    pub fn preview_path_for(&self, job_id: &str) -> PathBuf {
        self.preview_root.join(job_id)
    }
}
