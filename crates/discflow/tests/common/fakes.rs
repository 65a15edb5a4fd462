//! Fake collaborators that record what the engine asks of them.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use discflow::activity::{
    DiscStorage, InfoRequest, LocalDiscStorage, MetadataService, TranscodeRequest, TranscodeService,
};
use discflow::ActivityError;

/// Metadata service that accepts every request unless told to refuse.
#[derive(Default)]
pub struct RecordingMetadata {
    requests: Mutex<Vec<InfoRequest>>,
    refuse_with: Mutex<Option<ActivityError>>,
    stall: AtomicBool,
}

impl RecordingMetadata {
    pub fn requests(&self) -> Vec<InfoRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn refuse_with(&self, error: ActivityError) {
        *self.refuse_with.lock().unwrap() = Some(error);
    }

    /// While set, requests are recorded but never answered.
    pub fn stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Token issued for `video_path`.
    pub fn token_for(&self, video_path: &str) -> String {
        self.requests()
            .into_iter()
            .find(|r| r.video_path == video_path)
            .map(|r| r.token)
            .unwrap_or_else(|| panic!("no metadata request for {}", video_path))
    }
}

#[async_trait]
impl MetadataService for RecordingMetadata {
    async fn request_info(&self, request: InfoRequest) -> Result<(), ActivityError> {
        self.requests.lock().unwrap().push(request);
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        match self.refuse_with.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Transcoding service that accepts every request unless told to refuse.
#[derive(Default)]
pub struct RecordingTranscoder {
    requests: Mutex<Vec<TranscodeRequest>>,
    refuse_with: Mutex<Option<ActivityError>>,
}

impl RecordingTranscoder {
    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn refuse_with(&self, error: ActivityError) {
        *self.refuse_with.lock().unwrap() = Some(error);
    }

    pub fn token_for(&self, input_path: &str) -> String {
        self.requests()
            .into_iter()
            .find(|r| r.input_path == input_path)
            .map(|r| r.token)
            .unwrap_or_else(|| panic!("no transcode request for {}", input_path))
    }
}

#[async_trait]
impl TranscodeService for RecordingTranscoder {
    async fn request_transcode(&self, request: TranscodeRequest) -> Result<(), ActivityError> {
        self.requests.lock().unwrap().push(request);
        match self.refuse_with.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Local storage whose first `failing_renames` renames fail transiently.
pub struct FlakyStorage {
    inner: LocalDiscStorage,
    failing_renames: AtomicU32,
    rename_calls: AtomicU32,
}

impl FlakyStorage {
    pub fn new(failing_renames: u32) -> Self {
        Self {
            inner: LocalDiscStorage::new(),
            failing_renames: AtomicU32::new(failing_renames),
            rename_calls: AtomicU32::new(0),
        }
    }

    pub fn rename_calls(&self) -> u32 {
        self.rename_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscStorage for FlakyStorage {
    async fn rename_dir(&self, source: &Path, target: &Path) -> Result<(), ActivityError> {
        self.rename_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_renames.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_renames.store(remaining - 1, Ordering::SeqCst);
            return Err(ActivityError::transient("rename", "device busy"));
        }
        self.inner.rename_dir(source, target).await
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, ActivityError> {
        self.inner.list_dir(dir).await
    }

    async fn create_dir_all(&self, dir: &Path) -> Result<(), ActivityError> {
        self.inner.create_dir_all(dir).await
    }
}
