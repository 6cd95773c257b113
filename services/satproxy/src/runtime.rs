//! Runtime lifecycle management
//!
//! Startup of the Modbus listeners and background tasks, the SIGHUP reload
//! loop, and orderly shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::error::Result;
use crate::protocols::modbus::{spawn_heartbeat, ListenerHandle};

/// Handles of everything started by [`start_proxy_services`]
pub struct RunningServices {
    pub listeners: Vec<ListenerHandle>,
    pub heartbeat: Option<JoinHandle<()>>,
}

impl RunningServices {
    pub fn tasks(self) -> Vec<JoinHandle<()>> {
        self.listeners
            .into_iter()
            .map(|l| l.task)
            .chain(self.heartbeat)
            .collect()
    }
}

/// Bind one Modbus listener per configured address and start the heartbeat
///
/// A listener that cannot bind is a startup error.
pub async fn start_proxy_services(
    state: &Arc<AppState>,
    token: CancellationToken,
) -> Result<RunningServices> {
    let addresses = state.listen_addresses();
    if addresses.is_empty() {
        warn!("No outstations configured, no Modbus listener started");
    }

    let listeners = state
        .modbus
        .start(addresses.iter().copied(), token.clone())
        .await?;
    state.mark_bound(listeners.iter().map(|l| l.listen));

    let config = state.config();
    let modbus = &config.modbus;
    let heartbeat = (modbus.heartbeat_secs > 0).then(|| {
        spawn_heartbeat(
            Arc::clone(&state.resolver),
            Arc::clone(&state.store),
            Duration::from_secs(modbus.heartbeat_secs),
            token.clone(),
        )
    });

    info!(
        "Proxy started: {} Modbus listener(s), {} outstation(s)",
        listeners.len(),
        state.resolver.load().len()
    );
    Ok(RunningServices {
        listeners,
        heartbeat,
    })
}

/// Reload the configuration every time `requests` yields
pub fn spawn_reload_task(
    state: Arc<AppState>,
    mut requests: mpsc::Receiver<()>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                request = requests.recv() => {
                    if request.is_none() {
                        break;
                    }
                    info!("Reload requested");
                    let state = Arc::clone(&state);
                    match tokio::task::spawn_blocking(move || state.reload()).await {
                        Ok(Ok(summary)) => debug!("Reload summary: {:?}", summary),
                        Ok(Err(e)) => error!("Reload rejected: {}", e),
                        Err(e) => error!("Reload task failed: {}", e),
                    }
                },
            }
        }
        debug!("Reload task terminated");
    })
}

/// Cancel every task and wait for it, bounded by `grace`
pub async fn shutdown_services(
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
) {
    info!("Shutting down services...");
    token.cancel();

    let count = tasks.len();
    let all = futures::future::join_all(tasks);
    match tokio::time::timeout(grace, all).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    warn!("Task ended abnormally: {}", e);
                }
            }
            info!("All {} tasks stopped", count);
        },
        Err(_) => warn!("Shutdown grace period elapsed, exiting anyway"),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::config::SatProxyConfig;

    fn state() -> Arc<AppState> {
        let config = SatProxyConfig::from_yaml_str(
            r#"
modbus:
  heartbeat_secs: 1
outstations:
  - id: A1
    listen: 127.0.0.1:0
    registers: [{ type: holding, address: 0 }]
"#,
            ".",
        )
        .unwrap();
        Arc::new(AppState::new(config, None).unwrap())
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let state = state();
        let token = CancellationToken::new();
        let running = start_proxy_services(&state, token.clone()).await.unwrap();
        assert_eq!(running.listeners.len(), 1);
        assert!(running.heartbeat.is_some());

        shutdown_services(token, running.tasks(), Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_reload_task_stops_when_senders_drop() {
        let (tx, rx) = mpsc::channel(1);
        let handle = spawn_reload_task(state(), rx, CancellationToken::new());
        // No config file: the reload is rejected and the loop keeps running
        tx.send(()).await.unwrap();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
