//! Input directory scanner

use std::path::PathBuf;
use walkdir::WalkDir;

use crate::config::{matches_extension, MonitorConfig};
use crate::processing::JobQueue;

/// Walks the input tree and yields paths worth queueing
#[derive(Debug, Clone)]
pub struct FileScanner {
    root: PathBuf,
    extensions: Vec<String>,
    min_size: u64,
}

impl FileScanner {
    /// Scanner over the configured input directory and filters
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            root: config.input_directory.clone(),
            extensions: config.video_extensions.clone(),
            min_size: config.min_file_size_bytes(),
        }
    }

    /// Regular files with an accepted suffix that are at least the minimum
    /// size and not already completed, pending or in flight.
    pub fn scan(&self, queue: &JobQueue) -> Vec<PathBuf> {
        if !self.root.is_dir() {
            tracing::debug!("Input directory missing: {}", self.root.display());
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if !matches_extension(entry.path(), &self.extensions) {
                continue;
            }
            // Early reject with the same threshold the stability gate applies
            match entry.metadata() {
                Ok(metadata) if metadata.len() >= self.min_size => {}
                _ => continue,
            }

            let path = entry.into_path();
            if queue.is_known(&path) {
                continue;
            }
            candidates.push(path);
        }

        candidates
    }
}
