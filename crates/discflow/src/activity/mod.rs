//! Activity gateway: every side effect the engine performs goes through here.
//!
//! File-system steps complete synchronously under a retry policy. Metadata
//! and transcode requests only hand work to an external service, which
//! reports back later through the completion gateway.

use std::path::Path;
use std::sync::Arc;

pub mod metadata;
pub mod retry;
pub mod storage;
pub mod transcode;

pub use metadata::{HttpMetadataService, InfoRequest, MetadataService};
pub use retry::RetryPolicy;
pub use storage::{is_video_file, preview_path_for, DiscStorage, LocalDiscStorage};
pub use transcode::{HttpTranscodeService, TranscodeRequest, TranscodeService, PREVIEW_PROFILE};

use crate::config::Config;
use crate::error::ActivityError;
use crate::model::{ActivityKind, ScheduledActivity};

pub const METADATA_COMPLETE_ROUTE: &str = "/get_video_info/complete";
pub const TRANSCODE_COMPLETE_ROUTE: &str = "/transcode/complete";
pub const TRANSCODE_PROGRESS_ROUTE: &str = "/transcode/progress";

/// Callback URIs handed to the external services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookUris {
    pub metadata_complete: String,
    pub transcode_complete: String,
    pub transcode_progress: String,
}

impl WebhookUris {
    pub fn from_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            metadata_complete: format!("{}{}", base, METADATA_COMPLETE_ROUTE),
            transcode_complete: format!("{}{}", base, TRANSCODE_COMPLETE_ROUTE),
            transcode_progress: format!("{}{}", base, TRANSCODE_PROGRESS_ROUTE),
        }
    }
}

pub struct ActivityGateway {
    storage: Arc<dyn DiscStorage>,
    metadata: Arc<dyn MetadataService>,
    transcoder: Arc<dyn TranscodeService>,
    rename_policy: RetryPolicy,
    single_policy: RetryPolicy,
    webhooks: WebhookUris,
    video_extensions: Vec<String>,
}

impl ActivityGateway {
    /// Production constructor: local disk plus HTTP clients from config.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config,
            Arc::new(LocalDiscStorage::new()),
            Arc::new(HttpMetadataService::new(&config.video_info_url)),
            Arc::new(HttpTranscodeService::new(&config.transcoder_url)),
        )
    }

    pub fn new(
        config: &Config,
        storage: Arc<dyn DiscStorage>,
        metadata: Arc<dyn MetadataService>,
        transcoder: Arc<dyn TranscodeService>,
    ) -> Self {
        Self {
            storage,
            metadata,
            transcoder,
            rename_policy: RetryPolicy::for_rename(&config.retry),
            single_policy: RetryPolicy::single_attempt(&config.retry),
            webhooks: WebhookUris::from_base(&config.webhook_base_uri),
            video_extensions: config.video_extensions.clone(),
        }
    }

    /// Moves the disc directory into the library.
    pub async fn move_disc(&self, source: &Path, target: &Path) -> Result<(), ActivityError> {
        self.rename_policy
            .run("rename", || self.storage.rename_dir(source, target))
            .await
    }

    /// Video files in `dir`, as full paths.
    pub async fn list_videos(&self, dir: &Path) -> Result<Vec<String>, ActivityError> {
        let files = self
            .single_policy
            .run("list", || self.storage.list_dir(dir))
            .await?;
        Ok(files
            .into_iter()
            .filter(|path| is_video_file(path, &self.video_extensions))
            .map(|path| path.to_string_lossy().into_owned())
            .collect())
    }

    pub async fn prepare_preview_area(&self, dir: &Path) -> Result<(), ActivityError> {
        self.single_policy
            .run("mkdir", || self.storage.create_dir_all(dir))
            .await
    }

    /// Sends the external request for a scheduled activity.
    pub async fn dispatch(&self, activity: &ScheduledActivity) -> Result<(), ActivityError> {
        match activity.kind {
            ActivityKind::MetadataFetch => {
                self.metadata
                    .request_info(InfoRequest {
                        request_id: activity.request_id.clone(),
                        token: activity.token.clone(),
                        video_path: activity.file_key.clone(),
                        webhook_complete_uri: self.webhooks.metadata_complete.clone(),
                    })
                    .await
            }
            ActivityKind::PreviewTranscode => {
                let output_path = activity.output_path.clone().ok_or_else(|| {
                    ActivityError::permanent(
                        ActivityKind::PreviewTranscode.as_str(),
                        format!("no preview path scheduled for {}", activity.file_key),
                    )
                })?;
                self.transcoder
                    .request_transcode(TranscodeRequest {
                        request_id: activity.request_id.clone(),
                        token: activity.token.clone(),
                        input_path: activity.file_key.clone(),
                        output_path,
                        profile: PREVIEW_PROFILE.to_string(),
                        webhook_complete_uri: self.webhooks.transcode_complete.clone(),
                        webhook_progress_uri: self.webhooks.transcode_progress.clone(),
                    })
                    .await
            }
        }
    }
}
