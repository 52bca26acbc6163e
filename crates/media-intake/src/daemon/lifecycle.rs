//! Lifecycle controller: scan loop, worker hookup, periodic persistence and
//! retention, graceful drain.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::context::IntakeContext;
use crate::ingestion::{EventWatcher, FileScanner, StabilityGate};
use crate::processing::{CommandProcessor, JobQueue, ProcessingWorker, Processor};
use crate::storage::{cleanup_old_logs, StateStore};
use crate::types::{EngineSnapshot, Job};

/// How often log retention runs
const CLEANUP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Daemon lifecycle phases, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecyclePhase {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl LifecyclePhase {
    /// Phases only move forward, one step at a time
    pub fn can_advance_to(self, next: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        matches!(
            (self, next),
            (Starting, Running) | (Running, Draining) | (Draining, Stopped)
        )
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// The intake daemon
pub struct IntakeDaemon {
    ctx: IntakeContext,
    processor: Arc<dyn Processor>,
    phase: watch::Sender<LifecyclePhase>,
    /// Woken by filesystem events to scan before the next tick
    scan_now: Arc<Notify>,
}

impl IntakeDaemon {
    /// Daemon running the configured external command
    pub fn new(config: MonitorConfig) -> Self {
        let processor = Arc::new(CommandProcessor::from_config(&config));
        Self::with_processor(config, processor)
    }

    /// Daemon handing waves to `processor`
    pub fn with_processor(config: MonitorConfig, processor: Arc<dyn Processor>) -> Self {
        let store = Arc::new(StateStore::new(&config.state_file));
        let ctx = IntakeContext::new(
            config,
            Arc::new(JobQueue::default()),
            store,
            CancellationToken::new(),
        );
        let (phase, _) = watch::channel(LifecyclePhase::Starting);
        Self {
            ctx,
            processor,
            phase,
            scan_now: Arc::new(Notify::new()),
        }
    }

    /// Token that starts a graceful drain when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    /// Watch lifecycle phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    /// Shared handles, for inspection
    pub fn context(&self) -> &IntakeContext {
        &self.ctx
    }

    fn advance(&self, next: LifecyclePhase) {
        let current = *self.phase.borrow();
        if !current.can_advance_to(next) {
            tracing::debug!("Ignoring phase change {} -> {}", current, next);
            return;
        }
        tracing::info!("Lifecycle: {} -> {}", current, next);
        self.phase.send_replace(next);
    }

    /// Run until the shutdown token is cancelled. Returns the final snapshot.
    pub async fn run(self) -> EngineSnapshot {
        self.run_inner(false).await
    }

    /// Scan once, let the worker drain everything queued, then stop.
    pub async fn run_once(self) -> EngineSnapshot {
        self.run_inner(true).await
    }

    async fn run_inner(self, once: bool) -> EngineSnapshot {
        let ctx = self.ctx.clone();
        tracing::info!(
            "Starting intake monitor on {}",
            ctx.config.input_directory.display()
        );

        ctx.queue.restore(ctx.store.load());
        let worker = ProcessingWorker::new(ctx.clone(), self.processor.clone());
        let worker_handle = tokio::spawn(worker.run());
        let _watcher = if once {
            None
        } else {
            EventWatcher::spawn(&ctx.config, self.scan_now.clone(), ctx.cancel.clone())
        };

        self.advance(LifecyclePhase::Running);
        let scanner = FileScanner::from_config(&ctx.config);
        let gate = StabilityGate::from_config(&ctx.config);
        let mut last_cleanup: Option<Instant> = None;

        loop {
            self.scan_tick(&scanner, &gate).await;

            if last_cleanup.map_or(true, |at| at.elapsed() >= CLEANUP_PERIOD) {
                self.cleanup_logs().await;
                last_cleanup = Some(Instant::now());
            }

            if once {
                ctx.queue.wait_until_idle(&ctx.cancel).await;
                break;
            }
            if ctx.cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(ctx.config.scan_interval()) => {}
                _ = self.scan_now.notified() => {
                    tracing::debug!("Filesystem activity, scanning early");
                }
                _ = ctx.cancel.cancelled() => break,
            }
        }

        self.advance(LifecyclePhase::Draining);
        ctx.cancel.cancel();
        if let Err(e) = worker_handle.await {
            tracing::error!("Processing worker panicked: {}", e);
        }

        self.advance(LifecyclePhase::Stopped);
        ctx.flush_state().await;
        let snapshot = ctx.queue.snapshot();
        tracing::info!(
            "Intake monitor stopped: {} processed, {} failed, {} still queued",
            snapshot.stats.files_processed,
            snapshot.stats.files_failed,
            snapshot.queue_length
        );
        snapshot
    }

    /// Discover, pre-check and enqueue new files, then flush state.
    async fn scan_tick(&self, scanner: &FileScanner, gate: &StabilityGate) {
        let ctx = &self.ctx;

        let candidates = {
            let scanner = scanner.clone();
            let queue = ctx.queue.clone();
            match tokio::task::spawn_blocking(move || scanner.scan(&queue)).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::error!("Directory scan failed: {}", e);
                    Vec::new()
                }
            }
        };

        let found = candidates.len();
        if found > 0 {
            tracing::debug!("Scan found {} candidate(s)", found);
            match gate.prefilter(candidates, &ctx.cancel).await {
                Some(stable) => {
                    for path in stable {
                        match Job::from_path(&path) {
                            Ok(job) => {
                                let size_mb = job.size as f64 / 1024.0 / 1024.0;
                                let name = job.display_name();
                                if ctx.queue.push(job) {
                                    tracing::info!("Queued: {} ({:.1} MB)", name, size_mb);
                                }
                            }
                            Err(e) => {
                                tracing::warn!("Failed to queue {}: {}", path.display(), e)
                            }
                        }
                    }
                }
                None => tracing::info!("Shutdown during scan, skipping enqueue"),
            }
        }

        if found > 0 || !ctx.queue.is_empty() {
            ctx.queue.touch_activity();
        }
        ctx.flush_state().await;
    }

    async fn cleanup_logs(&self) {
        let dir = self.ctx.config.log_directory();
        let retention = self.ctx.config.log_retention();
        match tokio::task::spawn_blocking(move || cleanup_old_logs(&dir, retention)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(removed)) => tracing::info!("Log cleanup removed {} file(s)", removed),
            Ok(Err(e)) => tracing::warn!("Log cleanup failed: {}", e),
            Err(e) => tracing::warn!("Log cleanup task failed: {}", e),
        }
    }
}
