//! Process signal utilities
//!
//! Shutdown (Ctrl+C, SIGTERM) and configuration reload (SIGHUP) signals.

use tokio::sync::mpsc;
use tracing::warn;

/// Resolve on Ctrl+C, or SIGTERM on Unix
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Service will only respond to Ctrl+C",
                    e
                );
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    std::future::pending::<()>().await
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Spawn a task that forwards SIGHUP as a reload request.
///
/// Bursts of signals collapse into at most a few queued requests. On non-Unix
/// targets the channel is closed from the start.
pub fn reload_requests() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(4);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::hangup()) {
            Ok(mut hup) => {
                tokio::spawn(async move {
                    while hup.recv().await.is_some() {
                        // A pending request already covers this one
                        let _ = tx.try_send(());
                    }
                });
            },
            Err(e) => warn!("Failed to install SIGHUP handler: {}", e),
        }
    }
    #[cfg(not(unix))]
    {
        drop(tx);
    }

    rx
}
