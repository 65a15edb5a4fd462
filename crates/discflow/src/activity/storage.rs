//! File-system side of disc ingestion: moving, listing and preparing directories.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ActivityError;

#[async_trait]
pub trait DiscStorage: Send + Sync {
    /// Moves `source` to `target`.
    ///
    /// A move whose source is gone but whose target exists has already
    /// happened and succeeds.
    async fn rename_dir(&self, source: &Path, target: &Path) -> Result<(), ActivityError>;

    /// Regular files directly inside `dir`, sorted by path.
    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, ActivityError>;

    async fn create_dir_all(&self, dir: &Path) -> Result<(), ActivityError>;
}

/// `DiscStorage` over the local file system.
#[derive(Debug, Clone, Default)]
pub struct LocalDiscStorage;

impl LocalDiscStorage {
    pub fn new() -> Self {
        Self
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[async_trait]
impl DiscStorage for LocalDiscStorage {
    async fn rename_dir(&self, source: &Path, target: &Path) -> Result<(), ActivityError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ActivityError::from_io("rename", parent, &e))?;
        }

        match tokio::fs::rename(source, target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if !exists(source).await && exists(target).await {
                    log::info!(
                        "{} already moved to {}",
                        source.display(),
                        target.display()
                    );
                    Ok(())
                } else {
                    Err(ActivityError::from_io("rename", source, &e))
                }
            }
            Err(e) => Err(ActivityError::from_io("rename", source, &e)),
        }
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, ActivityError> {
        let metadata = tokio::fs::metadata(dir)
            .await
            .map_err(|e| ActivityError::from_io("list", dir, &e))?;
        if !metadata.is_dir() {
            return Err(ActivityError::permanent(
                "list",
                format!("{} is not a directory", dir.display()),
            ));
        }

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| ActivityError::from_io("list", dir, &e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ActivityError::from_io("list", dir, &e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ActivityError::from_io("list", &entry.path(), &e))?;
            if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn create_dir_all(&self, dir: &Path) -> Result<(), ActivityError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ActivityError::from_io("mkdir", dir, &e))
    }
}

/// Whether `path` has one of `extensions`, compared case-insensitively.
pub fn is_video_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            extensions
                .iter()
                .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Preview location for a video: `<preview_base>/<file stem>.mp4`.
pub fn preview_path_for(preview_base: &Path, video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "preview".to_string());
    preview_base.join(format!("{}.mp4", stem))
}
