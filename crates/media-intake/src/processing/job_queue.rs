//! Bounded, ordered job queue shared by the scan loop and the worker
//!
//! Pending jobs, the in-flight wave, the completed set and the stats
//! aggregate all live behind one mutex. The lock is only held for list
//! mutations, never across stability sampling or processor runs.

use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::types::{EngineSnapshot, Job, JobStatus, StatsAggregate};

/// Default number of pending jobs the queue holds
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Default)]
struct QueueInner {
    pending: VecDeque<Job>,
    in_flight: Vec<Job>,
    completed: BTreeSet<PathBuf>,
    stats: StatsAggregate,
}

impl QueueInner {
    fn is_live(&self, path: &Path) -> bool {
        self.pending.iter().any(|j| j.file_path == path)
            || self.in_flight.iter().any(|j| j.file_path == path)
    }

    fn len(&self) -> usize {
        self.pending.len() + self.in_flight.len()
    }
}

/// How a wave ended
#[derive(Debug, Clone)]
pub enum WaveOutcome {
    /// Processor exited zero after running for the given time
    Succeeded(Duration),
    /// Processor failed, timed out or could not be started
    Failed(String),
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub capacity: usize,
}

/// Job queue with dedup by source path
#[derive(Debug)]
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    /// Wakes the worker when work is pushed
    work_available: Notify,
    /// Wakes anyone waiting for the queue to drain
    changed: Notify,
    capacity: usize,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` pending jobs
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            work_available: Notify::new(),
            changed: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Seed counters and the completed set from a persisted snapshot
    pub fn restore(&self, snapshot: EngineSnapshot) {
        let mut inner = self.inner.lock();
        inner.stats = snapshot.stats;
        inner.completed.extend(snapshot.completed_files);
    }

    /// Queue a pending job. Returns false if a job for the same path is
    /// already pending or in flight, or the queue is full.
    pub fn push(&self, job: Job) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.is_live(&job.file_path) {
                tracing::debug!("Ignoring duplicate job for {}", job.file_path.display());
                return false;
            }
            if inner.pending.len() >= self.capacity {
                tracing::warn!(
                    "Queue full ({} jobs), deferring {}",
                    self.capacity,
                    job.file_path.display()
                );
                return false;
            }
            inner.pending.push_back(job);
        }
        self.work_available.notify_one();
        true
    }

    /// Whether the scanner should skip `path`: already completed, pending or
    /// in flight.
    pub fn is_known(&self, path: &Path) -> bool {
        let inner = self.inner.lock();
        inner.completed.contains(path) || inner.is_live(path)
    }

    /// Whether `path` finished successfully in this or an earlier run
    pub fn is_completed(&self, path: &Path) -> bool {
        self.inner.lock().completed.contains(path)
    }

    /// Copy of every pending job, oldest first. The worker picks its wave
    /// from these after confirmation.
    pub fn pending_jobs(&self) -> Vec<Job> {
        self.inner.lock().pending.iter().cloned().collect()
    }

    /// Move confirmed jobs from pending into the in-flight wave as
    /// `processing`. Jobs no longer pending are skipped.
    pub fn begin_wave(&self, confirmed: Vec<Job>) -> Vec<Job> {
        let mut inner = self.inner.lock();
        let mut started = Vec::with_capacity(confirmed.len());

        for mut job in confirmed {
            let Some(index) = inner.pending.iter().position(|j| j.file_path == job.file_path)
            else {
                continue;
            };
            inner.pending.remove(index);
            if let Err(e) = job.transition(JobStatus::Processing) {
                tracing::error!("{}", e);
                continue;
            }
            inner.in_flight.push(job.clone());
            started.push(job);
        }

        if !started.is_empty() {
            inner.stats.touch();
        }
        started
    }

    /// Resolve the in-flight wave. Completed jobs join the completed set;
    /// failed jobs are dropped so the scanner can rediscover them.
    pub fn finish_wave(&self, outcome: &WaveOutcome) -> Vec<Job> {
        let finished = {
            let mut inner = self.inner.lock();
            let mut finished: Vec<Job> = inner.in_flight.drain(..).collect();

            for job in &mut finished {
                let result = match outcome {
                    WaveOutcome::Succeeded(_) => job.transition(JobStatus::Completed),
                    WaveOutcome::Failed(reason) => job.fail(reason.clone()),
                };
                if let Err(e) = result {
                    tracing::error!("{}", e);
                }
            }

            let count = finished.len() as u64;
            match outcome {
                WaveOutcome::Succeeded(elapsed) => {
                    inner
                        .completed
                        .extend(finished.iter().map(|j| j.file_path.clone()));
                    inner.stats.record_completed(count, *elapsed);
                }
                WaveOutcome::Failed(_) => inner.stats.record_failed(count),
            }
            finished
        };
        self.changed.notify_waiters();
        finished
    }

    /// Drop pending jobs without recording an outcome (vanished files,
    /// confirmation abandoned on shutdown).
    pub fn discard_pending(&self, paths: &[PathBuf]) -> usize {
        let removed = {
            let mut inner = self.inner.lock();
            let before = inner.pending.len();
            inner.pending.retain(|j| !paths.contains(&j.file_path));
            before - inner.pending.len()
        };
        if removed > 0 {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Wait until a pending job exists. Returns false if cancelled first.
    pub async fn wait_for_work(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if !self.inner.lock().pending.is_empty() {
                return true;
            }
            tokio::select! {
                _ = self.work_available.notified() => {}
                _ = cancel.cancelled() => return false,
            }
        }
    }

    /// Wait until nothing is pending or in flight. Returns false if
    /// cancelled first.
    pub async fn wait_until_idle(&self, cancel: &CancellationToken) -> bool {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return true;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return false,
            }
        }
    }

    /// Bump the last-activity timestamp
    pub fn touch_activity(&self) {
        self.inner.lock().stats.touch();
    }

    /// Pending plus in-flight jobs
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when nothing is pending or in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the counters
    pub fn stats(&self) -> StatsAggregate {
        self.inner.lock().stats.clone()
    }

    /// Get queue statistics
    pub fn queue_stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            pending: inner.pending.len(),
            in_flight: inner.in_flight.len(),
            completed: inner.completed.len(),
            capacity: self.capacity,
        }
    }

    /// Consistent point-in-time view for the state store
    pub fn snapshot(&self) -> EngineSnapshot {
        let inner = self.inner.lock();
        EngineSnapshot::new(
            inner.stats.clone(),
            inner.completed.clone(),
            inner.len(),
            &inner.in_flight,
        )
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
