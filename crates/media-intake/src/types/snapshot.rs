//! Engine state snapshot: the persisted status document read by external
//! health-check tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::{Job, StatsAggregate};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSnapshot {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub stats: StatsAggregate,
    /// Mirror of `stats.last_activity` for readers that only look at the top level
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_files: BTreeSet<PathBuf>,
    /// Pending plus in-flight jobs
    #[serde(default)]
    pub queue_length: usize,
    /// First job of the in-flight wave
    #[serde(default)]
    pub current_job: Option<Job>,
    /// Number of jobs in the in-flight wave
    #[serde(default)]
    pub wave_size: usize,
}

impl EngineSnapshot {
    /// Assemble a snapshot stamped with the current time
    pub fn new(
        stats: StatsAggregate,
        completed_files: BTreeSet<PathBuf>,
        queue_length: usize,
        in_flight: &[Job],
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            last_activity: stats.last_activity,
            stats,
            completed_files,
            queue_length,
            current_job: in_flight.first().cloned(),
            wave_size: in_flight.len(),
        }
    }

    /// Zero state used when nothing valid is on disk
    pub fn empty() -> Self {
        Self::new(StatsAggregate::default(), BTreeSet::new(), 0, &[])
    }
}
