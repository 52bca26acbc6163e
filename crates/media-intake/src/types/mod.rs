//! Core types for the intake pipeline

pub mod job;
pub mod snapshot;
pub mod stats;

pub use job::{Job, JobStatus};
pub use snapshot::EngineSnapshot;
pub use stats::StatsAggregate;
