//! Persistence: engine state snapshot and log retention

mod retention;
mod state_store;

pub use retention::cleanup_old_logs;
pub use state_store::StateStore;
