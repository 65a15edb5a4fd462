use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub const ENV_LIBRARY_PATH: &str = "DISCFLOW_LIBRARY_PATH";
pub const ENV_PREVIEW_PATH: &str = "DISCFLOW_PREVIEW_PATH";
pub const ENV_DATABASE_PATH: &str = "DISCFLOW_DATABASE_PATH";
pub const ENV_LISTEN_ADDR: &str = "DISCFLOW_LISTEN_ADDR";
pub const ENV_WEBHOOK_BASE_URI: &str = "DISCFLOW_WEBHOOK_BASE_URI";
pub const ENV_VIDEO_INFO_URL: &str = "DISCFLOW_VIDEO_INFO_URL";
pub const ENV_TRANSCODER_URL: &str = "DISCFLOW_TRANSCODER_URL";
pub const ENV_RENAME_ATTEMPTS: &str = "DISCFLOW_RENAME_ATTEMPTS";
pub const ENV_STORE_RETRY_ATTEMPTS: &str = "DISCFLOW_STORE_RETRY_ATTEMPTS";
pub const ENV_METADATA_SECS: &str = "DISCFLOW_METADATA_SECS";
pub const ENV_TRANSCODE_HEARTBEAT_SECS: &str = "DISCFLOW_TRANSCODE_HEARTBEAT_SECS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "DISCFLOW_SWEEP_INTERVAL_SECS";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads a config file, lets `DISCFLOW_*` variables override it, then validates.
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut config: Config = serde_json::from_str(&content)?;
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

impl Config {
    /// Builds a config from `DISCFLOW_*` environment variables alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;
        validate_config(&config)?;
        Ok(config)
    }
}

/// Overwrites fields of `config` with any `DISCFLOW_*` variables that are set.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    override_string(ENV_LIBRARY_PATH, &mut config.library_path);
    override_string(ENV_PREVIEW_PATH, &mut config.preview_path);
    override_string(ENV_DATABASE_PATH, &mut config.database_path);
    override_string(ENV_LISTEN_ADDR, &mut config.listen_addr);
    override_string(ENV_WEBHOOK_BASE_URI, &mut config.webhook_base_uri);
    override_string(ENV_VIDEO_INFO_URL, &mut config.video_info_url);
    override_string(ENV_TRANSCODER_URL, &mut config.transcoder_url);
    override_number(ENV_RENAME_ATTEMPTS, &mut config.retry.rename_attempts)?;
    override_number(ENV_STORE_RETRY_ATTEMPTS, &mut config.store_retry_attempts)?;
    override_number(ENV_METADATA_SECS, &mut config.timeouts.metadata_secs)?;
    override_number(
        ENV_TRANSCODE_HEARTBEAT_SECS,
        &mut config.timeouts.transcode_heartbeat_secs,
    )?;
    override_number(ENV_SWEEP_INTERVAL_SECS, &mut config.timeouts.sweep_interval_secs)?;
    Ok(())
}

fn override_string(name: &'static str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            *target = trimmed.to_string();
        }
    }
}

fn override_number<T>(name: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => {
            *target = value
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidEnv {
                    name,
                    reason: e.to_string(),
                })?;
            Ok(())
        }
        Err(std::env::VarError::NotPresent) => Ok(()),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnv {
            name,
            reason: "not valid unicode".to_string(),
        }),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.library_path.trim().is_empty() {
        return Err(ConfigError::Missing("libraryPath"));
    }
    if config.preview_path.trim().is_empty() {
        return Err(ConfigError::Missing("previewPath"));
    }
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Missing("databasePath"));
    }

    for (field, url) in [
        ("webhookBaseUri", &config.webhook_base_uri),
        ("videoInfoUrl", &config.video_info_url),
        ("transcoderUrl", &config.transcoder_url),
    ] {
        if url.is_empty() {
            continue;
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation {
                message: format!("{} must be an http(s) URL, got '{}'", field, url),
            });
        }
    }

    if config.listen_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Validation {
            message: format!("listenAddr '{}' is not a socket address", config.listen_addr),
        });
    }

    if config.retry.rename_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "retry.renameAttempts must be at least 1".to_string(),
        });
    }
    if config.retry.attempt_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "retry.attemptTimeoutSecs must be at least 1".to_string(),
        });
    }
    if config.store_retry_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "storeRetryAttempts must be at least 1".to_string(),
        });
    }
    if config.timeouts.metadata_secs == 0
        || config.timeouts.transcode_heartbeat_secs == 0
        || config.timeouts.sweep_interval_secs == 0
    {
        return Err(ConfigError::Validation {
            message: "timeouts must be non-zero".to_string(),
        });
    }
    if config.video_extensions.iter().all(|e| e.trim().is_empty()) {
        return Err(ConfigError::Validation {
            message: "videoExtensions must name at least one extension".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_ENV: [&str; 12] = [
        ENV_LIBRARY_PATH,
        ENV_PREVIEW_PATH,
        ENV_DATABASE_PATH,
        ENV_LISTEN_ADDR,
        ENV_WEBHOOK_BASE_URI,
        ENV_VIDEO_INFO_URL,
        ENV_TRANSCODER_URL,
        ENV_RENAME_ATTEMPTS,
        ENV_STORE_RETRY_ATTEMPTS,
        ENV_METADATA_SECS,
        ENV_TRANSCODE_HEARTBEAT_SECS,
        ENV_SWEEP_INTERVAL_SECS,
    ];

    fn clear_env() {
        for name in ALL_ENV {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_load_valid_config() {
        let config_json = r#"
        {
            "libraryPath": "/srv/library",
            "previewPath": "/srv/preview",
            "databasePath": "/var/lib/discflow/discflow.db",
            "webhookBaseUri": "http://discflow:8080",
            "videoInfoUrl": "http://videoinfo:9000",
            "transcoderUrl": "http://transcoder:9001",
            "retry": { "renameAttempts": 4 },
            "timeouts": { "transcodeHeartbeatSecs": 30 }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.library_path, "/srv/library");
        assert_eq!(config.retry.rename_attempts, 4);
        assert_eq!(config.timeouts.transcode_heartbeat_secs, 30);
        assert_eq!(config.timeouts.metadata_secs, 120);
    }

    #[test]
    fn test_missing_library_path() {
        let result = load_config_from_str(r#"{ "previewPath": "/p" }"#);
        assert!(matches!(result, Err(ConfigError::Missing("libraryPath"))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = load_config_from_str(
            r#"{ "libraryPath": "/l", "previewPath": "/p", "retry": { "renameAttempts": 0 } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_malformed_url_rejected() {
        let result = load_config_from_str(
            r#"{ "libraryPath": "/l", "previewPath": "/p", "videoInfoUrl": "videoinfo:9000" }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            load_config_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discflow.json");
        std::fs::write(&path, r#"{ "libraryPath": "/l", "previewPath": "/p" }"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.preview_path, "/p");

        let missing = load_config(dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        std::env::set_var(ENV_LIBRARY_PATH, "/env/library");
        std::env::set_var(ENV_PREVIEW_PATH, "/env/preview");
        std::env::set_var(ENV_RENAME_ATTEMPTS, "7");

        let config = Config::from_env().unwrap();
        assert_eq!(config.library_path, "/env/library");
        assert_eq!(config.preview_path, "/env/preview");
        assert_eq!(config.retry.rename_attempts, 7);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_required() {
        clear_env();
        std::env::set_var(ENV_PREVIEW_PATH, "/env/preview");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("libraryPath"))
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() {
        clear_env();
        let mut config =
            load_config_from_str(r#"{ "libraryPath": "/file/l", "previewPath": "/file/p" }"#)
                .unwrap();
        std::env::set_var(ENV_LIBRARY_PATH, "/env/l");
        apply_env_overrides(&mut config).unwrap();
        assert_eq!(config.library_path, "/env/l");
        assert_eq!(config.preview_path, "/file/p");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_fills_gaps_in_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discflow.json");
        std::fs::write(&path, r#"{ "previewPath": "/file/p" }"#).unwrap();
        assert!(load_config(&path).is_err());

        std::env::set_var(ENV_LIBRARY_PATH, "/env/l");
        let config = load_config_with_env(&path).unwrap();
        assert_eq!(config.library_path, "/env/l");
        assert_eq!(config.preview_path, "/file/p");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_non_numeric_env_rejected() {
        clear_env();
        std::env::set_var(ENV_SWEEP_INTERVAL_SECS, "soon");
        let mut config = Config::default();
        assert!(matches!(
            apply_env_overrides(&mut config),
            Err(ConfigError::InvalidEnv { name: ENV_SWEEP_INTERVAL_SECS, .. })
        ));
        clear_env();
    }
}
