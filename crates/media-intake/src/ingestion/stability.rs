//! Stability gate: proves a file has stopped changing before it is processed
//!
//! One check samples size and mtime, sleeps one interval, and samples again.
//! A file is ready after `required` consecutive successful checks; any failed
//! check restarts the count. Filesystem errors count as "not stable".

use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;

/// Result of a single two-sample check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityCheck {
    /// Size and mtime unchanged and size meets the minimum
    Stable,
    /// Changed between samples, too small, or unreadable
    Unstable,
    /// The file did not exist when the check started
    Missing,
    /// Shutdown requested during the sampling sleep
    Cancelled,
}

/// Result of a full confirmation sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Ready,
    /// A check failed before the required count was reached
    Unsettled,
    /// The file disappeared before it could be confirmed
    Vanished,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    size: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct StabilityGate {
    interval: Duration,
    required: u32,
    min_size: u64,
}

impl StabilityGate {
    /// Create a gate requiring `required` consecutive stable checks
    pub fn new(interval: Duration, required: u32, min_size: u64) -> Self {
        Self {
            interval,
            required: required.max(1),
            min_size,
        }
    }

    /// Create a gate from the monitor's stability settings
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.stability_interval(),
            config.stability_check_count,
            config.min_file_size_bytes(),
        )
    }

    /// Sleep between the two samples of one check
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Consecutive stable checks needed for a file to be ready
    pub fn required(&self) -> u32 {
        self.required
    }

    /// Smallest size in bytes a stable file may have
    pub fn min_size(&self) -> u64 {
        self.min_size
    }

    async fn sample(path: &Path) -> std::io::Result<Sample> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Sample {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }

    /// One momentary check, blocking for about one interval.
    pub async fn check(&self, path: &Path, cancel: &CancellationToken) -> StabilityCheck {
        let first = match Self::sample(path).await {
            Ok(sample) => Some(sample),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StabilityCheck::Missing,
            Err(e) => {
                tracing::debug!(path = %path.display(), "Stat failed: {}", e);
                None
            }
        };

        // Always wait out the interval so callers retrying a failed check
        // are paced by it
        tokio::select! {
            _ = tokio::time::sleep(self.interval) => {}
            _ = cancel.cancelled() => return StabilityCheck::Cancelled,
        }
        let Some(first) = first else {
            return StabilityCheck::Unstable;
        };

        match Self::sample(path).await {
            Ok(second) if second == first && second.size >= self.min_size => StabilityCheck::Stable,
            Ok(_) => StabilityCheck::Unstable,
            Err(e) => {
                tracing::debug!(path = %path.display(), "Stat failed: {}", e);
                StabilityCheck::Unstable
            }
        }
    }

    /// Momentary stability as a plain yes/no
    pub async fn is_stable(&self, path: &Path, cancel: &CancellationToken) -> bool {
        self.check(path, cancel).await == StabilityCheck::Stable
    }

    /// One bounded confirmation: up to `required` checks, stopping at the
    /// first one that fails. Takes at most `required` intervals.
    pub async fn attempt(&self, path: &Path, cancel: &CancellationToken) -> GateOutcome {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for passed in 1..=self.required {
            match self.check(path, cancel).await {
                StabilityCheck::Stable => {
                    tracing::info!(
                        "Stability check {}/{} passed: {}",
                        passed,
                        self.required,
                        name
                    );
                }
                StabilityCheck::Unstable => {
                    if passed > 1 {
                        tracing::info!("File changed again, restarting checks: {}", name);
                    } else {
                        tracing::debug!("File still transferring: {}", name);
                    }
                    return GateOutcome::Unsettled;
                }
                StabilityCheck::Missing => return GateOutcome::Vanished,
                StabilityCheck::Cancelled => return GateOutcome::Cancelled,
            }
        }

        GateOutcome::Ready
    }

    /// Repeat [`attempt`](Self::attempt) until the file is ready, vanishes
    /// or shutdown is requested.
    pub async fn confirm(&self, path: &Path, cancel: &CancellationToken) -> GateOutcome {
        loop {
            match self.attempt(path, cancel).await {
                GateOutcome::Unsettled => continue,
                outcome => return outcome,
            }
        }
    }

    /// Single concurrent check over many candidates; keeps the stable ones.
    /// Returns `None` if shutdown interrupted the sampling.
    pub async fn prefilter(
        &self,
        candidates: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Option<Vec<PathBuf>> {
        let checks = join_all(candidates.iter().map(|path| self.check(path, cancel))).await;
        if checks.contains(&StabilityCheck::Cancelled) {
            return None;
        }

        Some(
            candidates
                .into_iter()
                .zip(checks)
                .filter(|(_, check)| *check == StabilityCheck::Stable)
                .map(|(path, _)| path)
                .collect(),
        )
    }
}
