//! Stages of a disc ingestion job.

use serde::{Deserialize, Serialize};

/// Stage of a disc ingestion job. Declaration order is the only legal order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Created,
    MovingDirectory,
    DirectoryMoved,
    ListingFiles,
    FilesListed,
    PreparingPreviewArea,
    RunningDiagnostics,
    DiagnosticsComplete,
    // Declared for versioning; nothing drives a job past DiagnosticsComplete yet.
    Categorizing,
    Relocating,
    TranscodingMainTitle,
}

/// The last stage the engine currently drives a job to.
pub const FINAL_STAGE: Stage = Stage::DiagnosticsComplete;

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::Created,
        Stage::MovingDirectory,
        Stage::DirectoryMoved,
        Stage::ListingFiles,
        Stage::FilesListed,
        Stage::PreparingPreviewArea,
        Stage::RunningDiagnostics,
        Stage::DiagnosticsComplete,
        Stage::Categorizing,
        Stage::Relocating,
        Stage::TranscodingMainTitle,
    ];

    /// The stage that directly follows this one, if any.
    pub fn next(self) -> Option<Stage> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Created => "created",
            Stage::MovingDirectory => "moving_directory",
            Stage::DirectoryMoved => "directory_moved",
            Stage::ListingFiles => "listing_files",
            Stage::FilesListed => "files_listed",
            Stage::PreparingPreviewArea => "preparing_preview_area",
            Stage::RunningDiagnostics => "running_diagnostics",
            Stage::DiagnosticsComplete => "diagnostics_complete",
            Stage::Categorizing => "categorizing",
            Stage::Relocating => "relocating",
            Stage::TranscodingMainTitle => "transcoding_main_title",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        Self::ALL.iter().copied().find(|stage| stage.as_str() == s)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse, client-facing status derived from a job's stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    DirectoryMoved,
    FilesListed,
    DiagnosticsComplete,
    Failed,
}

impl JobStatus {
    pub fn derive(stage: Stage, failed: bool) -> Self {
        if failed {
            JobStatus::Failed
        } else if stage >= Stage::DiagnosticsComplete {
            JobStatus::DiagnosticsComplete
        } else if stage >= Stage::FilesListed {
            JobStatus::FilesListed
        } else if stage >= Stage::DirectoryMoved {
            JobStatus::DirectoryMoved
        } else {
            JobStatus::Running
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::DirectoryMoved => "directory_moved",
            JobStatus::FilesListed => "files_listed",
            JobStatus::DiagnosticsComplete => "diagnostics_complete",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_follows_declaration_order() {
        assert_eq!(Stage::Created.next(), Some(Stage::MovingDirectory));
        assert_eq!(
            Stage::RunningDiagnostics.next(),
            Some(Stage::DiagnosticsComplete)
        );
        assert_eq!(Stage::TranscodingMainTitle.next(), None);
    }

    #[test]
    fn test_ordering_is_monotonic() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_parse_round_trips_every_stage() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("bogus"), None);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(JobStatus::derive(Stage::Created, false), JobStatus::Running);
        assert_eq!(
            JobStatus::derive(Stage::MovingDirectory, false),
            JobStatus::Running
        );
        assert_eq!(
            JobStatus::derive(Stage::ListingFiles, false),
            JobStatus::DirectoryMoved
        );
        assert_eq!(
            JobStatus::derive(Stage::RunningDiagnostics, false),
            JobStatus::FilesListed
        );
        assert_eq!(
            JobStatus::derive(Stage::DiagnosticsComplete, false),
            JobStatus::DiagnosticsComplete
        );
        assert_eq!(
            JobStatus::derive(Stage::MovingDirectory, true),
            JobStatus::Failed
        );
    }
}
