//! File discovery: directory scanning, stability confirmation, fingerprints

mod events;
mod fingerprint;
mod scanner;
mod stability;

pub use events::EventWatcher;
pub use fingerprint::fingerprint;
pub use scanner::FileScanner;
pub use stability::{GateOutcome, StabilityCheck, StabilityGate};
