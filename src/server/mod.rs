//! # Streaming Server
//!
//! TCP endpoint publishing the event bus as newline-delimited JSON. Every client
//! gets its own bus subscription and its own task: a client that stops reading
//! only loses its own oldest events and is eventually disconnected, it never slows
//! ingestion or other clients.
//!
//! Per connection:
//! 1. subscribe (before the snapshot, so no event falls between the two)
//! 2. optional `{"type":"snapshot",..}` line with every known node
//! 3. one `{"type":"event",..}` line per published event until either side closes

use log::{debug, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::ServerConfig;
use crate::error::{MeshtapError, Result};
use crate::events::{EventBus, Subscription, WireMessage};
use crate::metrics;
use crate::registry::RegistryReader;

/// How long shutdown waits for clients to flush their queues.
const CLIENT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub queue_depth: usize,
    pub send_snapshot: bool,
    pub write_timeout: Duration,
    /// 0 = never disconnect for drops.
    pub max_client_drops: u64,
    /// 0 = unlimited.
    pub max_clients: usize,
    /// TTL used to flag stale nodes in snapshots.
    pub registry_ttl: Duration,
}

impl ServerSettings {
    pub fn from_config(cfg: &ServerConfig, registry_ttl: Duration) -> Self {
        Self {
            queue_depth: cfg.queue_depth,
            send_snapshot: cfg.send_snapshot,
            write_timeout: Duration::from_millis(cfg.write_timeout_ms.max(1)),
            max_client_drops: cfg.max_client_drops,
            max_clients: cfg.max_clients,
            registry_ttl,
        }
    }
}

/// Why a client session ended without an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEnd {
    PeerClosed,
    BusClosed,
    TooSlow { dropped: u64 },
}

pub struct StreamServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    bus: EventBus,
    registry: RegistryReader,
    settings: Arc<ServerSettings>,
    active: Arc<AtomicUsize>,
}

impl StreamServer {
    /// Bind the listener. Failure here is the one fatal startup error.
    pub async fn bind(
        addr: SocketAddr,
        bus: EventBus,
        registry: RegistryReader,
        settings: ServerSettings,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| MeshtapError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            bus,
            registry,
            settings: Arc::new(settings),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Actual bound address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept clients until `shutdown` flips to true (or its sender goes away),
    /// then give connected clients a short grace period to drain.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Streaming server listening on {}", self.local_addr);
        let mut clients = JoinSet::new();
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(&mut clients, stream, peer),
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(_) = clients.join_next(), if !clients.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        drop(self.listener);
        debug!("Streaming server stopped accepting; {} client(s) draining", clients.len());
        let drained = tokio::time::timeout(CLIENT_DRAIN_GRACE, async {
            while clients.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            clients.abort_all();
        }
        info!("Streaming server stopped");
    }

    fn admit(&self, clients: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let max = self.settings.max_clients;
        if max > 0 && self.active.load(Ordering::Relaxed) >= max {
            warn!("Rejecting {}: {} clients already connected", peer, max);
            return;
        }
        let _ = stream.set_nodelay(true);
        self.active.fetch_add(1, Ordering::Relaxed);
        metrics::inc_clients_connected();
        // Subscribe here, on the accept path, so the client sees every event
        // published from this point on.
        let sub = self.bus.subscribe_with_depth(self.settings.queue_depth);
        info!("Client {} connected (subscriber {})", peer, sub.id());

        let registry = self.registry.clone();
        let settings = Arc::clone(&self.settings);
        let active = Arc::clone(&self.active);
        clients.spawn(async move {
            match serve_client(stream, sub, registry, &settings).await {
                Ok(ClientEnd::TooSlow { dropped }) => {
                    warn!("Client {} disconnected: {} events dropped", peer, dropped)
                }
                Ok(end) => info!("Client {} disconnected ({:?})", peer, end),
                Err(e) => info!("Client {} disconnected: {}", peer, e),
            }
            active.fetch_sub(1, Ordering::Relaxed);
            metrics::inc_clients_disconnected();
        });
    }
}

async fn write_line(w: &mut OwnedWriteHalf, line: &[u8], timeout: Duration) -> io::Result<()> {
    match tokio::time::timeout(timeout, w.write_all(line)).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "client write timed out",
        )),
    }
}

/// Stream one client until it closes, falls too far behind or the bus closes.
/// The subscription is dropped (unsubscribed) on return.
pub async fn serve_client(
    stream: TcpStream,
    sub: Subscription,
    registry: RegistryReader,
    settings: &ServerSettings,
) -> Result<ClientEnd> {
    let (mut reader, mut writer) = stream.into_split();

    if settings.send_snapshot {
        let line = WireMessage::snapshot(registry.snapshot(), settings.registry_ttl).to_line()?;
        write_line(&mut writer, &line, settings.write_timeout).await?;
    }

    let mut scratch = [0u8; 256];
    loop {
        tokio::select! {
            next = sub.recv() => {
                let Some(ev) = next else {
                    let _ = writer.shutdown().await;
                    return Ok(ClientEnd::BusClosed);
                };
                let line = WireMessage::event(&ev).to_line()?;
                write_line(&mut writer, &line, settings.write_timeout).await?;
                let dropped = sub.dropped();
                if settings.max_client_drops > 0 && dropped >= settings.max_client_drops {
                    return Ok(ClientEnd::TooSlow { dropped });
                }
            }
            read = reader.read(&mut scratch) => match read {
                Ok(0) => return Ok(ClientEnd::PeerClosed),
                // Inbound bytes carry no meaning; they are discarded.
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}
