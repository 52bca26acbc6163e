//! Log retention: removes rotated log files past the retention horizon

use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::error::Result;

/// Delete `*.log*` files in `dir` last modified more than `retention` ago.
/// Returns the number of files removed. Individual failures are logged and
/// skipped.
pub fn cleanup_old_logs(dir: &Path, retention: Duration) -> Result<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Unreadable log directory entry: {}", e);
                continue;
            }
        };

        if !entry.file_name().to_string_lossy().contains(".log") {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| {
            if m.is_file() {
                m.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(modified)) => modified,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Cannot stat {}: {}", entry.path().display(), e);
                continue;
            }
        };

        if modified < cutoff {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    removed += 1;
                    tracing::info!("Removed old log: {}", entry.path().display());
                }
                Err(e) => tracing::warn!("Failed to remove {}: {}", entry.path().display(), e),
            }
        }
    }

    Ok(removed)
}
