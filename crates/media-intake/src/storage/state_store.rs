//! Durable engine state snapshot
//!
//! Writes go to a temp file in the target directory, are synced, then renamed
//! over the state file, so readers never observe a half-written document.

use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::processing::JobQueue;
use crate::types::EngineSnapshot;

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    /// Serializes writers so a stale snapshot never lands after a newer one
    write_lock: Mutex<()>,
}

impl StateStore {
    /// Store backed by the JSON file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, starting from zero state if the file is missing or
    /// unreadable.
    pub fn load(&self) -> EngineSnapshot {
        match self.try_load() {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    "State loaded: {} processed, {} failed, {} completed files",
                    snapshot.stats.files_processed,
                    snapshot.stats.files_failed,
                    snapshot.completed_files.len()
                );
                snapshot
            }
            Ok(None) => {
                tracing::info!("No state file at {}, starting fresh", self.path.display());
                EngineSnapshot::empty()
            }
            Err(e) => {
                tracing::error!(
                    "Failed to load state from {}, starting fresh: {}",
                    self.path.display(),
                    e
                );
                EngineSnapshot::empty()
            }
        }
    }

    /// Strict load: `None` when the file is absent, `Err` when it is unreadable
    pub fn try_load(&self) -> Result<Option<EngineSnapshot>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Atomically replace the state file with `snapshot`
    pub fn save(&self, snapshot: &EngineSnapshot) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_atomic(snapshot)
    }

    /// Snapshot `queue` and save it, holding the write lock across both so
    /// concurrent flushes land in order.
    pub fn flush(&self, queue: &JobQueue) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_atomic(&queue.snapshot())
    }

    fn write_atomic(&self, snapshot: &EngineSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::persist(&self.path, format!("creating temp file: {}", e)))?;
        temp.write_all(&bytes)
            .map_err(|e| Error::persist(&self.path, format!("writing temp file: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::persist(&self.path, format!("syncing temp file: {}", e)))?;
        temp.persist(&self.path)
            .map_err(|e| Error::persist(&self.path, format!("renaming temp file: {}", e.error)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Job;
    use chrono::Utc;

    #[test]
    fn test_round_trip_preserves_stats_and_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let queue = JobQueue::default();
        for name in ["a.mkv", "b.mkv", "c.mkv"] {
            queue.push(Job::new(dir.path().join(name), 1, Utc::now()));
        }
        queue.begin_wave(queue.pending_jobs());
        queue.finish_wave(&crate::processing::WaveOutcome::Succeeded(
            std::time::Duration::from_secs(3),
        ));
        store.flush(&queue).unwrap();

        let loaded = store.load();
        let current = queue.snapshot();
        assert_eq!(loaded.stats, current.stats);
        assert_eq!(loaded.completed_files, current.completed_files);
    }

    #[test]
    fn test_missing_file_is_zero_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load().stats.files_processed, 0);
    }

    #[test]
    fn test_corrupt_file_is_zero_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{\"stats\": ").unwrap();

        let snapshot = StateStore::new(&path).load();
        assert_eq!(snapshot.stats.files_processed, 0);
        assert!(snapshot.completed_files.is_empty());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        tokio_test::assert_ok!(store.save(&EngineSnapshot::empty()));
        tokio_test::assert_ok!(store.save(&EngineSnapshot::empty()));

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_save_into_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("logs/state.json"));
        tokio_test::assert_ok!(store.save(&EngineSnapshot::empty()));
        assert!(store.path().exists());
    }
}
