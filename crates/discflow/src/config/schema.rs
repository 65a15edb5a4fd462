use serde::{Deserialize, Serialize};

use crate::db::default_database_path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Root under which each job's disc directory is placed (`<root>/<job id>`).
    #[serde(default)]
    pub library_path: String,
    /// Root under which each job's previews are written (`<root>/<job id>`).
    #[serde(default)]
    pub preview_path: String,
    #[serde(default = "default_database_path_string")]
    pub database_path: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Public base URI the external services call back on.
    #[serde(default)]
    pub webhook_base_uri: String,
    #[serde(default)]
    pub video_info_url: String,
    #[serde(default)]
    pub transcoder_url: String,
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default = "default_store_retry_attempts")]
    pub store_retry_attempts: u32,
}

fn default_database_path_string() -> String {
    default_database_path()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "discflow.db".to_string())
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_video_extensions() -> Vec<String> {
    vec!["mkv".to_string()]
}

fn default_store_retry_attempts() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_path: String::new(),
            preview_path: String::new(),
            database_path: default_database_path_string(),
            listen_addr: default_listen_addr(),
            webhook_base_uri: String::new(),
            video_info_url: String::new(),
            transcoder_url: String::new(),
            video_extensions: default_video_extensions(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            store_retry_attempts: default_store_retry_attempts(),
        }
    }
}

/// Retry settings for synchronous file-system activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_rename_attempts")]
    pub rename_attempts: u32,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_backoff_millis")]
    pub backoff_millis: u64,
}

fn default_rename_attempts() -> u32 {
    3
}

fn default_attempt_timeout_secs() -> u64 {
    10
}

fn default_backoff_millis() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            rename_attempts: default_rename_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            backoff_millis: default_backoff_millis(),
        }
    }
}

/// Deadlines for asynchronous activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Time a metadata request may stay outstanding.
    #[serde(default = "default_metadata_secs")]
    pub metadata_secs: u64,
    /// Time a transcode may go without a heartbeat.
    #[serde(default = "default_transcode_heartbeat_secs")]
    pub transcode_heartbeat_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_metadata_secs() -> u64 {
    120
}

fn default_transcode_heartbeat_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    15
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            metadata_secs: default_metadata_secs(),
            transcode_heartbeat_secs: default_transcode_heartbeat_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}
