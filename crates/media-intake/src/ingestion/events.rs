//! Filesystem event assistance for discovery
//!
//! Create/modify events only shorten the wait until the next scan. They never
//! queue jobs themselves, so every file still goes through the scanner
//! filters and the stability gate.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::{matches_extension, MonitorConfig};

/// Keeps the platform watcher alive; dropping it stops event delivery.
pub struct EventWatcher {
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for EventWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWatcher").finish_non_exhaustive()
    }
}

impl EventWatcher {
    /// Watch the input directory and notify `wake` after each debounced
    /// burst of relevant events. Returns `None` when events are disabled or
    /// the watcher cannot be set up; polling continues either way.
    pub fn spawn(
        config: &MonitorConfig,
        wake: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Option<Self> {
        if !config.watch.fs_events {
            tracing::info!("Filesystem events disabled, polling only");
            return None;
        }

        let extensions = config.video_extensions.clone();
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = match notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| {
                let Ok(event) = res else { return };
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths {
                    if matches_extension(&path, &extensions) {
                        let _ = tx.send(path);
                    }
                }
            },
        ) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!("Failed to create file watcher, polling only: {}", e);
                return None;
            }
        };

        if let Err(e) = watcher.watch(&config.input_directory, RecursiveMode::Recursive) {
            tracing::warn!(
                "Failed to watch {}, polling only: {}",
                config.input_directory.display(),
                e
            );
            return None;
        }
        tracing::info!("Watching directory: {}", config.input_directory.display());

        let debounce = Duration::from_millis(config.watch.debounce_ms);
        tokio::spawn(debounce_events(rx, debounce, wake, cancel));

        Some(Self { _watcher: watcher })
    }
}

async fn debounce_events(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    debounce: Duration,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            path = rx.recv() => path,
            _ = cancel.cancelled() => return,
        };
        let Some(first) = first else { return };
        tracing::debug!("Filesystem activity: {}", first.display());

        // Wait for a quiet period before waking the scanner
        loop {
            tokio::select! {
                more = rx.recv() => {
                    if more.is_none() {
                        return;
                    }
                }
                _ = tokio::time::sleep(debounce) => break,
                _ = cancel.cancelled() => return,
            }
        }

        wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_produces_single_wake() {
        let (tx, rx) = mpsc::unbounded_channel();
        let wake = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        tokio::spawn(debounce_events(
            rx,
            Duration::from_millis(30),
            wake.clone(),
            cancel.clone(),
        ));

        for i in 0..5 {
            tx.send(PathBuf::from(format!("/in/{}.mkv", i))).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), wake.notified())
            .await
            .expect("debounced wake");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_disabled_watcher_is_none() {
        let mut config = MonitorConfig::default();
        config.watch.fs_events = false;
        let watcher = EventWatcher::spawn(&config, Arc::new(Notify::new()), CancellationToken::new());
        assert!(watcher.is_none());
    }
}
