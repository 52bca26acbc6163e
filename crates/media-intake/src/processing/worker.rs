//! Background worker that drains the job queue one wave at a time

use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ProcessorMode;
use crate::context::IntakeContext;
use crate::error::Error;
use crate::ingestion::{fingerprint, GateOutcome, StabilityGate};
use crate::types::Job;

use super::job_queue::WaveOutcome;
use super::processor::Processor;

/// What happened to one pass over the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaveResult {
    /// The processor ran and the wave was resolved
    Processed,
    /// No pending job reached ready in this pass
    Empty,
    /// Shutdown arrived during stability confirmation
    Abandoned,
}

/// Single consumer of the job queue
pub struct ProcessingWorker {
    ctx: IntakeContext,
    gate: StabilityGate,
    processor: Arc<dyn Processor>,
}

impl ProcessingWorker {
    /// Create a worker draining `ctx.queue` through `processor`
    pub fn new(ctx: IntakeContext, processor: Arc<dyn Processor>) -> Self {
        let gate = StabilityGate::from_config(&ctx.config);
        Self {
            ctx,
            gate,
            processor,
        }
    }

    /// Process waves until shutdown. A wave already handed to the processor
    /// always runs to completion; confirmation in progress is abandoned.
    pub async fn run(self) {
        tracing::info!(
            "Processing worker started: {:?} mode, {} stability checks every {:.1}s",
            self.ctx.config.processor.mode,
            self.gate.required(),
            self.gate.interval().as_secs_f64()
        );

        while self.ctx.queue.wait_for_work(&self.ctx.cancel).await {
            match self.run_wave().await {
                WaveResult::Abandoned => break,
                WaveResult::Processed => {}
                WaveResult::Empty => {
                    // Everything pending is still settling; pace the retry
                    tokio::select! {
                        _ = tokio::time::sleep(self.gate.interval()) => {}
                        _ = self.ctx.cancel.cancelled() => break,
                    }
                }
            }
        }

        tracing::info!("Processing worker stopped");
    }

    async fn run_wave(&self) -> WaveResult {
        let candidates = self.ctx.queue.pending_jobs();
        if candidates.is_empty() {
            return WaveResult::Empty;
        }

        // Second confirmation, immediately before processing. Each candidate
        // gets one bounded attempt so a file still being copied cannot hold
        // back the ones that have settled.
        let outcomes = join_all(
            candidates
                .iter()
                .map(|job| self.gate.attempt(&job.file_path, &self.ctx.cancel)),
        )
        .await;

        let mut ready = Vec::new();
        let mut dropped: Vec<PathBuf> = Vec::new();
        let mut settling = 0;
        let mut abandoned = false;
        for (job, outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                GateOutcome::Ready => ready.push(job),
                GateOutcome::Unsettled => settling += 1,
                GateOutcome::Vanished => {
                    tracing::warn!("File disappeared before processing: {}", job.display_name());
                    dropped.push(job.file_path);
                }
                GateOutcome::Cancelled => {
                    abandoned = true;
                    dropped.push(job.file_path);
                }
            }
        }

        if abandoned {
            // Ready jobs are abandoned too; the scanner finds them after restart
            dropped.extend(ready.into_iter().map(|j| j.file_path));
            let count = self.ctx.queue.discard_pending(&dropped);
            tracing::info!(
                "Shutdown during stability confirmation, abandoned {} job(s)",
                count
            );
            return WaveResult::Abandoned;
        }
        if !dropped.is_empty() {
            self.ctx.queue.discard_pending(&dropped);
        }
        if settling > 0 {
            tracing::debug!("{} file(s) still settling, left pending", settling);
        }
        if ready.is_empty() {
            self.ctx.flush_state().await;
            return WaveResult::Empty;
        }

        // Queue order is kept, so per-file mode takes the oldest ready job
        if self.ctx.config.processor.mode == ProcessorMode::PerFile {
            ready.truncate(1);
        }

        let ready = self.prepare(ready).await;
        let wave = self.ctx.queue.begin_wave(ready);
        if wave.is_empty() {
            return WaveResult::Empty;
        }
        for job in &wave {
            tracing::info!(
                "Processing: {} ({:.1} MB)",
                job.display_name(),
                job.size as f64 / 1024.0 / 1024.0
            );
        }
        self.ctx.flush_state().await;

        let target = match self.ctx.config.processor.mode {
            ProcessorMode::Directory => self.ctx.config.input_directory.clone(),
            ProcessorMode::PerFile => wave[0].file_path.clone(),
        };

        let outcome = match self.processor.process(&target).await {
            Ok(report) => WaveOutcome::Succeeded(report.elapsed),
            Err(Error::Timeout { secs }) => WaveOutcome::Failed(format!("timeout after {}s", secs)),
            Err(e) => WaveOutcome::Failed(e.to_string()),
        };

        let finished = self.ctx.queue.finish_wave(&outcome);
        match &outcome {
            WaveOutcome::Succeeded(elapsed) => {
                for job in &finished {
                    tracing::info!(
                        "Completed: {} (took {:.1}s)",
                        job.display_name(),
                        elapsed.as_secs_f64()
                    );
                }
            }
            WaveOutcome::Failed(reason) => {
                for job in &finished {
                    tracing::error!("Failed: {} ({})", job.display_name(), reason);
                }
            }
        }
        self.ctx.flush_state().await;

        WaveResult::Processed
    }

    /// Refresh metadata and fingerprint confirmed jobs
    async fn prepare(&self, jobs: Vec<Job>) -> Vec<Job> {
        let with_fingerprint = self.ctx.config.enable_hash_check;
        let mut prepared = Vec::with_capacity(jobs.len());

        for mut job in jobs {
            if let Err(e) = job.refresh_metadata() {
                tracing::debug!("Metadata refresh failed for {}: {}", job.display_name(), e);
            }
            if with_fingerprint {
                let path = job.file_path.clone();
                match tokio::task::spawn_blocking(move || fingerprint(&path)).await {
                    Ok(Ok(hash)) => job.fingerprint = Some(hash),
                    Ok(Err(e)) => {
                        tracing::warn!("Fingerprint failed for {}: {}", job.display_name(), e)
                    }
                    Err(e) => tracing::warn!("Fingerprint task failed: {}", e),
                }
            }
            prepared.push(job);
        }

        prepared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::error::Result;
    use crate::processing::{ProcessReport, JobQueue};
    use crate::storage::StateStore;
    use crate::types::JobStatus;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Records targets and answers with a fixed result
    struct FakeProcessor {
        succeed: bool,
        targets: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Processor for FakeProcessor {
        async fn process(&self, target: &Path) -> Result<ProcessReport> {
            self.targets.lock().push(target.to_path_buf());
            if self.succeed {
                Ok(ProcessReport {
                    elapsed: Duration::from_millis(10),
                    lines: 0,
                })
            } else {
                Err(Error::processor("exit status 1"))
            }
        }
    }

    fn context(dir: &Path, mode: &str) -> IntakeContext {
        context_with_state(dir, mode, &dir.join("state.json"))
    }

    fn context_with_state(dir: &Path, mode: &str, state_file: &Path) -> IntakeContext {
        let config = MonitorConfig::from_overrides(json!({
            "input_directory": dir.join("in"),
            "state_file": state_file,
            "min_file_size_mb": 0,
            "stability_check_interval": 0.02,
            "stability_check_count": 2,
            "processor": { "mode": mode },
        }))
        .unwrap();
        std::fs::create_dir_all(&config.input_directory).unwrap();
        let store = StateStore::new(&config.state_file);
        IntakeContext::new(
            config,
            Arc::new(JobQueue::default()),
            Arc::new(store),
            CancellationToken::new(),
        )
    }

    fn queue_file(ctx: &IntakeContext, name: &str) -> PathBuf {
        let path = ctx.config.input_directory.join(name);
        std::fs::write(&path, b"payload").unwrap();
        assert!(ctx.queue.push(Job::from_path(&path).unwrap()));
        path
    }

    /// Keep appending to `path` until the returned token is cancelled
    fn keep_growing(path: PathBuf) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let stop = CancellationToken::new();
        let writer_stop = stop.clone();
        let handle = tokio::spawn(async move {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            while !writer_stop.is_cancelled() {
                file.write_all(&[1u8; 64]).unwrap();
                file.flush().unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        (stop, handle)
    }

    #[tokio::test]
    async fn test_directory_mode_runs_one_wave_for_all_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "directory");
        queue_file(&ctx, "a.mkv");
        queue_file(&ctx, "b.mkv");

        let processor = Arc::new(FakeProcessor {
            succeed: true,
            targets: Mutex::new(Vec::new()),
        });
        let worker = ProcessingWorker::new(ctx.clone(), processor.clone());

        assert_eq!(worker.run_wave().await, WaveResult::Processed);
        assert_eq!(*processor.targets.lock(), vec![ctx.config.input_directory.clone()]);
        assert_eq!(ctx.queue.stats().files_processed, 2);
        assert!(ctx.queue.is_empty());

        let persisted = ctx.store.load();
        assert_eq!(persisted.completed_files.len(), 2);
    }

    #[tokio::test]
    async fn test_per_file_mode_targets_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "per_file");
        let a = queue_file(&ctx, "a.mkv");
        queue_file(&ctx, "b.mkv");

        let processor = Arc::new(FakeProcessor {
            succeed: true,
            targets: Mutex::new(Vec::new()),
        });
        let worker = ProcessingWorker::new(ctx.clone(), processor.clone());

        worker.run_wave().await;
        assert_eq!(*processor.targets.lock(), vec![a]);
        assert_eq!(ctx.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_copying_file_does_not_hold_back_settled_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "directory");
        let done = queue_file(&ctx, "done.mkv");
        let copying = queue_file(&ctx, "copying.mkv");
        let (stop, writer) = keep_growing(copying.clone());

        let processor = Arc::new(FakeProcessor {
            succeed: true,
            targets: Mutex::new(Vec::new()),
        });
        let worker = ProcessingWorker::new(ctx.clone(), processor.clone());
        let result = tokio::time::timeout(Duration::from_secs(2), worker.run_wave()).await;

        stop.cancel();
        writer.await.unwrap();
        assert_eq!(result.unwrap(), WaveResult::Processed);
        assert_eq!(processor.targets.lock().len(), 1);
        assert!(ctx.queue.is_completed(&done));
        assert!(!ctx.queue.is_completed(&copying));
        assert!(ctx.queue.is_known(&copying));
        assert_eq!(ctx.queue.stats().files_processed, 1);
    }

    #[tokio::test]
    async fn test_per_file_mode_skips_unsettled_front_job() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "per_file");
        let copying = queue_file(&ctx, "copying.mkv");
        let done = queue_file(&ctx, "done.mkv");
        let (stop, writer) = keep_growing(copying.clone());

        let processor = Arc::new(FakeProcessor {
            succeed: true,
            targets: Mutex::new(Vec::new()),
        });
        let worker = ProcessingWorker::new(ctx.clone(), processor.clone());
        let result = tokio::time::timeout(Duration::from_secs(2), worker.run_wave()).await;

        stop.cancel();
        writer.await.unwrap();
        assert_eq!(result.unwrap(), WaveResult::Processed);
        assert_eq!(*processor.targets.lock(), vec![done]);
        assert_eq!(ctx.queue.pending_jobs()[0].file_path, copying);
    }

    #[tokio::test]
    async fn test_only_unsettled_jobs_yield_empty_wave() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "directory");
        let copying = queue_file(&ctx, "copying.mkv");
        let (stop, writer) = keep_growing(copying.clone());

        let processor = Arc::new(FakeProcessor {
            succeed: true,
            targets: Mutex::new(Vec::new()),
        });
        let worker = ProcessingWorker::new(ctx.clone(), processor.clone());
        let result = tokio::time::timeout(Duration::from_secs(2), worker.run_wave()).await;

        stop.cancel();
        writer.await.unwrap();
        assert_eq!(result.unwrap(), WaveResult::Empty);
        assert!(processor.targets.lock().is_empty());
        assert_eq!(ctx.queue.pending_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_state_file_keeps_processing() {
        let dir = tempfile::tempdir().unwrap();
        // Parent of the state file is a regular file, so every write fails
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let ctx = context_with_state(dir.path(), "directory", &blocker.join("state.json"));
        let path = queue_file(&ctx, "a.mkv");

        let processor = Arc::new(FakeProcessor {
            succeed: true,
            targets: Mutex::new(Vec::new()),
        });
        let worker = ProcessingWorker::new(ctx.clone(), processor);

        assert_eq!(worker.run_wave().await, WaveResult::Processed);
        assert!(ctx.queue.is_completed(&path));
        assert_eq!(ctx.queue.stats().files_processed, 1);
        assert!(!ctx.flush_state().await);

        // Once the location is writable the next flush carries the in-memory state
        std::fs::remove_file(&blocker).unwrap();
        assert!(ctx.flush_state().await);
        let persisted = ctx.store.load();
        assert!(persisted.completed_files.contains(&path));
        assert_eq!(persisted.stats.files_processed, 1);
    }

    #[tokio::test]
    async fn test_failure_marks_wave_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "directory");
        let path = queue_file(&ctx, "a.mkv");

        let processor = Arc::new(FakeProcessor {
            succeed: false,
            targets: Mutex::new(Vec::new()),
        });
        let worker = ProcessingWorker::new(ctx.clone(), processor);

        worker.run_wave().await;
        assert_eq!(ctx.queue.stats().files_failed, 1);
        assert!(!ctx.queue.is_known(&path));
    }

    #[tokio::test]
    async fn test_vanished_file_is_dropped_without_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "directory");
        let path = queue_file(&ctx, "a.mkv");
        std::fs::remove_file(&path).unwrap();

        let processor = Arc::new(FakeProcessor {
            succeed: true,
            targets: Mutex::new(Vec::new()),
        });
        let worker = ProcessingWorker::new(ctx.clone(), processor.clone());

        assert_eq!(worker.run_wave().await, WaveResult::Empty);
        assert!(processor.targets.lock().is_empty());
        assert_eq!(ctx.queue.stats().files_failed, 0);
        assert!(ctx.queue.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_confirmation_abandons_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "directory");
        queue_file(&ctx, "a.mkv");
        ctx.cancel.cancel();

        let processor = Arc::new(FakeProcessor {
            succeed: true,
            targets: Mutex::new(Vec::new()),
        });
        let worker = ProcessingWorker::new(ctx.clone(), processor.clone());

        assert_eq!(worker.run_wave().await, WaveResult::Abandoned);
        assert!(processor.targets.lock().is_empty());
        let stats = ctx.queue.stats();
        assert_eq!(stats.files_failed, 0);
        assert_eq!(stats.files_processed, 0);
        assert!(ctx.queue.is_empty());
    }

    #[tokio::test]
    async fn test_fingerprint_recorded_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "directory");
        queue_file(&ctx, "a.mkv");

        let worker = ProcessingWorker::new(
            ctx.clone(),
            Arc::new(FakeProcessor {
                succeed: true,
                targets: Mutex::new(Vec::new()),
            }),
        );
        let prepared = worker.prepare(ctx.queue.pending_jobs()).await;
        assert!(prepared[0].fingerprint.is_some());
        assert_eq!(prepared[0].status, JobStatus::Pending);
    }
}
