//! Aggregate processing counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters carried across restarts through the state file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatsAggregate {
    pub files_processed: u64,
    pub files_failed: u64,
    /// Cumulative processor wall time, in seconds
    pub total_processing_time: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl StatsAggregate {
    /// Count `jobs` completed in a run that took `elapsed`
    pub fn record_completed(&mut self, jobs: u64, elapsed: Duration) {
        self.files_processed += jobs;
        self.total_processing_time += elapsed.as_secs_f64();
        self.touch();
    }

    /// Count `jobs` failed
    pub fn record_failed(&mut self, jobs: u64) {
        self.files_failed += jobs;
        self.touch();
    }

    /// Bump the last-activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let mut stats = StatsAggregate::default();
        stats.record_completed(2, Duration::from_millis(1500));
        stats.record_failed(1);

        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.files_failed, 1);
        assert!((stats.total_processing_time - 1.5).abs() < f64::EPSILON);
        assert!(stats.last_activity.is_some());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let stats: StatsAggregate = serde_json::from_str(r#"{"files_processed": 42}"#).unwrap();
        assert_eq!(stats.files_processed, 42);
        assert_eq!(stats.files_failed, 0);
        assert!(stats.last_activity.is_none());
    }
}
