//! media-intake: directory-watching ingestion daemon for media transfers
//!
//! Files dropped into the input directory are discovered by a periodic scan
//! (optionally nudged by filesystem events), held back until their size and
//! mtime stop changing, queued, and handed to an external processor in waves.
//! Outcomes, statistics and the completed set are persisted to a JSON state
//! file so a restart picks up where the previous run left off.

pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod storage;
pub mod types;

pub use config::MonitorConfig;
pub use context::IntakeContext;
pub use daemon::{IntakeDaemon, LifecyclePhase};
pub use error::{Error, Result};
pub use types::{EngineSnapshot, Job, JobStatus, StatsAggregate};
