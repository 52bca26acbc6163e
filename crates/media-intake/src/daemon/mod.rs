//! Daemon lifecycle and process signals

mod lifecycle;
mod signals;

pub use lifecycle::{IntakeDaemon, LifecyclePhase};
pub use signals::spawn_signal_listener;
