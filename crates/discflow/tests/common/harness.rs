//! Test harness for isolated engine runs.
//!
//! The `TestHarness` struct provides:
//! - Temporary inbox/library/preview directories and a file-backed database
//! - Recording fake services, shared across engine restarts
//! - Helpers to build discs and fetch job snapshots

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use discflow::activity::{ActivityGateway, DiscStorage, LocalDiscStorage};
use discflow::{
    Config, Database, Engine, EngineConfig, JobGateway, JobProgressBroadcaster, JobSnapshot,
    QueryService,
};

use super::fakes::{RecordingMetadata, RecordingTranscoder};

pub struct TestHarness {
    temp_dir: TempDir,
    pub inbox_dir: PathBuf,
    pub library_dir: PathBuf,
    pub preview_dir: PathBuf,
    pub db_path: PathBuf,
    pub config: Config,
    pub metadata: Arc<RecordingMetadata>,
    pub transcoder: Arc<RecordingTranscoder>,
    storage: Arc<dyn DiscStorage>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(LocalDiscStorage::new()))
    }

    pub fn with_storage(storage: Arc<dyn DiscStorage>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let inbox_dir = base.join("inbox");
        let library_dir = base.join("library");
        let preview_dir = base.join("preview");
        std::fs::create_dir_all(&inbox_dir).expect("Failed to create inbox dir");

        let mut config = Config {
            library_path: library_dir.to_string_lossy().into_owned(),
            preview_path: preview_dir.to_string_lossy().into_owned(),
            database_path: base.join("discflow.db").to_string_lossy().into_owned(),
            webhook_base_uri: "http://discflow.test".to_string(),
            video_info_url: "http://video-info.test".to_string(),
            transcoder_url: "http://transcoder.test".to_string(),
            ..Config::default()
        };
        config.retry.backoff_millis = 1;

        Self {
            db_path: PathBuf::from(&config.database_path),
            temp_dir,
            inbox_dir,
            library_dir,
            preview_dir,
            config,
            metadata: Arc::new(RecordingMetadata::default()),
            transcoder: Arc::new(RecordingTranscoder::default()),
            storage,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Creates a disc directory in the inbox holding the given (empty) files.
    pub fn write_disc(&self, name: &str, files: &[&str]) -> PathBuf {
        let disc = self.inbox_dir.join(name);
        std::fs::create_dir_all(&disc).expect("Failed to create disc dir");
        for file in files {
            std::fs::write(disc.join(file), b"video").expect("Failed to write disc file");
        }
        disc
    }

    /// Path of a disc file once the disc is in the library.
    pub fn library_file(&self, job_id: &str, file: &str) -> String {
        self.library_dir
            .join(job_id)
            .join(file)
            .to_string_lossy()
            .into_owned()
    }

    pub fn preview_file(&self, job_id: &str, file: &str) -> String {
        self.preview_dir
            .join(job_id)
            .join(file)
            .to_string_lossy()
            .into_owned()
    }

    /// Opens the database and builds a fresh engine over it, as a restarted
    /// process would.
    pub fn engine(&self) -> Engine {
        let db = Database::open(&self.db_path).expect("Failed to open database");
        let activities = ActivityGateway::new(
            &self.config,
            Arc::clone(&self.storage),
            self.metadata.clone(),
            self.transcoder.clone(),
        );
        Engine::new(
            db,
            EngineConfig::from_config(&self.config),
            activities,
            JobProgressBroadcaster::default(),
        )
    }

    pub fn gateway(&self, engine: &Engine) -> JobGateway {
        JobGateway::new(engine.clone(), self.config.store_retry_attempts)
    }

    pub fn snapshot(&self, engine: &Engine, job_id: &str) -> JobSnapshot {
        QueryService::new(engine.database().clone())
            .get_state(job_id)
            .expect("Failed to query job")
    }

    /// Records a job and drives it until it waits on callbacks or ends.
    pub async fn start(&self, engine: &Engine, job_id: &str, disc: &Path) {
        engine
            .create(job_id, &disc.to_string_lossy())
            .await
            .expect("Failed to create job");
        engine.drive(job_id).await.expect("Failed to drive job");
    }
}
