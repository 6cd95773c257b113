//! Modbus TCP server
//!
//! One listener per distinct configured `listen` address. Each connection is
//! its own task running the MBAP codec; a broken frame closes only that
//! connection. Requests are answered synchronously by the adapter, so a slow
//! satellite link can never stall a master's poll.

use super::adapter::ModbusAdapter;
use super::codec::{MbapCodec, MbapFrame};
use crate::core::config::{ContextResolver, ModbusConfig};
use crate::error::{Result, SatProxyError};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use satproxy_rtdb::{RegisterStore, RtdbError};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Server counters
#[derive(Debug, Default)]
pub struct ModbusServerStats {
    pub requests: AtomicU64,
    pub exceptions: AtomicU64,
    /// Currently open connections
    pub connections: AtomicU64,
    pub connections_total: AtomicU64,
    pub connections_rejected: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModbusStatsSnapshot {
    pub requests: u64,
    pub exceptions: u64,
    pub connections: u64,
    pub connections_total: u64,
    pub connections_rejected: u64,
}

impl ModbusServerStats {
    pub fn snapshot(&self) -> ModbusStatsSnapshot {
        ModbusStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
        }
    }
}

/// A running listener
pub struct ListenerHandle {
    /// Address as configured; the adapter resolves units against it
    pub listen: SocketAddr,
    /// Address actually bound (differs when the configured port is 0)
    pub local_addr: SocketAddr,
    pub task: JoinHandle<()>,
}

pub struct ModbusServer {
    adapter: Arc<ModbusAdapter>,
    max_connections: usize,
    idle_timeout: Duration,
    stats: Arc<ModbusServerStats>,
}

impl ModbusServer {
    pub fn new(adapter: Arc<ModbusAdapter>, config: &ModbusConfig) -> Self {
        Self {
            adapter,
            max_connections: config.max_connections,
            idle_timeout: config.request_timeout(),
            stats: Arc::new(ModbusServerStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<ModbusServerStats> {
        &self.stats
    }

    /// Bind every address and spawn its accept loop
    ///
    /// Fails if any address cannot be bound; listeners already started are
    /// stopped through `token` by the caller.
    pub async fn start(
        self: &Arc<Self>,
        addresses: impl IntoIterator<Item = SocketAddr>,
        token: CancellationToken,
    ) -> Result<Vec<ListenerHandle>> {
        let mut handles = Vec::new();
        for listen in addresses {
            let listener = bind(listen)?;
            let local_addr = listener.local_addr()?;
            info!("Modbus listener on {} (bound {})", listen, local_addr);

            let server = Arc::clone(self);
            let task = tokio::spawn(server.accept_loop(listen, listener, token.clone()));
            handles.push(ListenerHandle {
                listen,
                local_addr,
                task,
            });
        }
        Ok(handles)
    }

    async fn accept_loop(
        self: Arc<Self>,
        listen: SocketAddr,
        listener: TcpListener,
        token: CancellationToken,
    ) {
        let limit = Arc::new(Semaphore::new(self.max_connections));
        loop {
            let accepted = tokio::select! {
                () = token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                        warn!(
                            "{}: connection from {} refused, {} connections open",
                            listen, peer, self.max_connections
                        );
                        self.stats
                            .connections_rejected
                            .fetch_add(1, Ordering::Relaxed);
                        continue;
                    };
                    debug!("{}: connection from {}", listen, peer);
                    let server = Arc::clone(&self);
                    tokio::spawn(server.serve_connection(
                        listen,
                        stream,
                        peer,
                        token.clone(),
                        permit,
                    ));
                },
                Err(e) => {
                    error!("{}: accept error: {}", listen, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                },
            }
        }
        info!("Modbus listener on {} stopped", listen);
    }

    async fn serve_connection(
        self: Arc<Self>,
        listen: SocketAddr,
        stream: TcpStream,
        peer: SocketAddr,
        token: CancellationToken,
        _permit: OwnedSemaphorePermit,
    ) {
        self.stats.connections.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        let _ = stream.set_nodelay(true);
        let mut framed = Framed::new(stream, MbapCodec);

        loop {
            let next = tokio::select! {
                () = token.cancelled() => break,
                next = tokio::time::timeout(self.idle_timeout, framed.next()) => next,
            };
            let frame = match next {
                Err(_) => {
                    debug!("{}: {} idle, closing", listen, peer);
                    break;
                },
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    warn!("{}: closing {}: {}", listen, peer, e);
                    break;
                },
                Ok(Some(Ok(frame))) => frame,
            };

            self.stats.requests.fetch_add(1, Ordering::Relaxed);
            let response = self.adapter.handle(listen, frame.unit_id, &frame.pdu);
            if response.first().is_some_and(|fc| fc & 0x80 != 0) {
                self.stats.exceptions.fetch_add(1, Ordering::Relaxed);
            }

            let reply = MbapFrame {
                transaction_id: frame.transaction_id,
                unit_id: frame.unit_id,
                pdu: Bytes::from(response),
            };
            if let Err(e) = framed.send(reply).await {
                debug!("{}: write to {} failed: {}", listen, peer, e);
                break;
            }
        }

        self.stats.connections.fetch_sub(1, Ordering::Relaxed);
        debug!("{}: connection from {} closed", listen, peer);
    }
}

fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    };
    let socket =
        socket.map_err(|e| SatProxyError::io(format!("Failed to create socket: {}", e)))?;
    socket
        .set_reuseaddr(true)
        .map_err(|e| SatProxyError::io(format!("Failed to set SO_REUSEADDR: {}", e)))?;
    socket
        .bind(addr)
        .map_err(|e| SatProxyError::io(format!("Failed to bind to {}: {}", addr, e)))?;
    socket
        .listen(1024)
        .map_err(|e| SatProxyError::io(format!("Failed to listen on {}: {}", addr, e)))
}

/// Periodically log each outstation's staleness
pub fn spawn_heartbeat(
    resolver: Arc<ContextResolver>,
    store: Arc<RegisterStore>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => log_staleness(&resolver, &store),
            }
        }
        debug!("Heartbeat task terminated");
    })
}

fn log_staleness(resolver: &ContextResolver, store: &RegisterStore) {
    let threshold = store.stale_after();
    for id in resolver.load().ids() {
        match store.staleness(&id) {
            Ok(age) if threshold.is_some_and(|t| age > t) => {
                warn!("Outstation {} stale: last contact {}s ago", id, age.as_secs())
            },
            Ok(age) => info!("Outstation {} last contact {}s ago", id, age.as_secs()),
            Err(RtdbError::OutstationNotFound(_) | RtdbError::NoContact(_)) => {
                info!("Outstation {} has not reported yet", id)
            },
            Err(e) => warn!("Outstation {} staleness unavailable: {}", id, e),
        }
    }
}
