//! Interrupt/terminate handling

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on SIGINT or SIGTERM. Later signals are logged and
/// otherwise ignored; the drain already in progress continues.
pub fn spawn_signal_listener(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                None
            }
        };

        loop {
            #[cfg(unix)]
            let received = async {
                match terminate.as_mut() {
                    Some(stream) => {
                        stream.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };
            #[cfg(not(unix))]
            let received = std::future::pending::<()>();

            let name = tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                        return;
                    }
                    "SIGINT"
                }
                _ = received => "SIGTERM",
            };

            on_signal(&token, name);
        }
    })
}

/// Start the drain on the first signal. Returns false when one was already
/// in progress.
fn on_signal(token: &CancellationToken, name: &str) -> bool {
    if token.is_cancelled() {
        tracing::info!("Received {} while already draining, ignoring", name);
        false
    } else {
        tracing::info!("Received {}, shutting down gracefully...", name);
        token.cancel();
        true
    }
}
