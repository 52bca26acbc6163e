//! Job type and its status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Discovered and queued, not yet confirmed stable
    Pending,
    /// Confirmed stable and handed to the external processor
    Processing,
    /// Processor finished successfully
    Completed,
    /// Processor failed, timed out or could not be started
    Failed,
}

impl JobStatus {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file's journey through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Source path, unique among live jobs
    pub file_path: PathBuf,
    /// Size in bytes when last observed
    pub size: u64,
    /// When the scanner first queued the file
    pub detected_time: DateTime<Utc>,
    /// File modification time when last observed
    pub last_modified: DateTime<Utc>,
    /// Head/tail content fingerprint, when enabled
    pub fingerprint: Option<String>,
    pub status: JobStatus,
    /// Reason for the last failure
    pub error: Option<String>,
}

impl Job {
    /// Create a pending job for `path` from its current metadata.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Self::new(path.to_path_buf(), metadata.len(), last_modified))
    }

    /// Create a pending job from known metadata
    pub fn new(file_path: PathBuf, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            file_path,
            size,
            detected_time: Utc::now(),
            last_modified,
            fingerprint: None,
            status: JobStatus::Pending,
            error: None,
        }
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                path: self.file_path.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark failed with a reason
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Refresh size and mtime from the filesystem
    pub fn refresh_metadata(&mut self) -> Result<()> {
        let metadata = std::fs::metadata(&self.file_path)?;
        self.size = metadata.len();
        if let Ok(modified) = metadata.modified() {
            self.last_modified = DateTime::<Utc>::from(modified);
        }
        Ok(())
    }

    /// Final path component, for log lines
    pub fn display_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.display().to_string())
    }
}
