//! Wires the pipeline together:
//!
//! ```text
//! [link thread]* --InboundFrame--> [ingest task] --DomainEvent--> EventBus --> [client task]*
//!                                        |                                        ^
//!                                        +------ NodeRegistry (RegistryReader) ---+
//! ```
//!
//! [`Meshtap::new`] performs every fallible startup step (validation, cache load,
//! listener bind) before any device is touched. [`Meshtap::run`] then starts the
//! tasks and, once the shutdown future resolves, stops them in dependency order:
//! links first, then ingest (final cache save, bus close), then the server.
use anyhow::{Context, Result};
use log::{error, info};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::error::MeshtapError;
use crate::events::EventBus;
use crate::ingest::{run_ingest, IngestSettings};
use crate::link::{LinkConnector, LinkHandle, LinkSupervisor};
use crate::meshtastic::Interpreter;
use crate::registry::{load_cache_into, NodeRegistry, RegistryReader};
use crate::server::{ServerSettings, StreamServer};

pub struct Meshtap {
    config: Config,
    bus: EventBus,
    reader: RegistryReader,
    interpreter: Interpreter,
    server: StreamServer,
}

impl Meshtap {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::new(config.server.queue_depth);
        let mut registry = NodeRegistry::new();
        if let Some(path) = config.registry.cache_file.as_deref() {
            let restored = load_cache_into(&mut registry, Path::new(path));
            if restored > 0 {
                info!("Loaded {} nodes from {}", restored, path);
            }
        }
        let reader = registry.reader();

        let addr = config.server.listen_addr()?;
        let settings = ServerSettings::from_config(&config.server, config.registry.ttl());
        let server = StreamServer::bind(addr, bus.clone(), reader.clone(), settings).await?;

        let interpreter = Interpreter::new(registry, bus.clone(), config.ingest.dedup_window);
        Ok(Self {
            config,
            bus,
            reader,
            interpreter,
            server,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> RegistryReader {
        self.reader.clone()
    }

    /// Run against the serial devices listed in the configuration.
    #[cfg(feature = "serial")]
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        use crate::link::SerialConnector;
        use std::time::Duration;

        let read_timeout = Duration::from_millis(self.config.link.read_timeout_ms);
        let connectors = self
            .config
            .devices
            .iter()
            .map(|d| {
                let c: Box<dyn LinkConnector> =
                    Box::new(SerialConnector::new(&d.port, d.baud_rate, read_timeout));
                (d.name.clone(), c)
            })
            .collect();
        self.run_with_connectors(connectors, shutdown).await
    }

    #[cfg(not(feature = "serial"))]
    pub async fn run(self, _shutdown: impl Future<Output = ()>) -> Result<()> {
        Err(anyhow::anyhow!(
            "built without the `serial` feature; no device connector available"
        ))
    }

    /// Run with explicit connectors, one supervisor each.
    pub async fn run_with_connectors(
        self,
        connectors: Vec<(String, Box<dyn LinkConnector>)>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let Meshtap {
            config,
            interpreter,
            server,
            ..
        } = self;
        let link_settings = config.link_settings()?;

        let (server_stop_tx, server_stop_rx) = watch::channel(false);
        let server_task = tokio::spawn(server.run(server_stop_rx));

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let ingest_task = tokio::spawn(run_ingest(
            interpreter,
            frame_rx,
            IngestSettings::from_config(&config),
        ));

        let stop = Arc::new(AtomicBool::new(false));
        let mut links: Vec<LinkHandle> = Vec::with_capacity(connectors.len());
        for (name, connector) in connectors {
            let (supervisor, _) = LinkSupervisor::new(
                name.clone(),
                connector,
                link_settings.clone(),
                frame_tx.clone(),
                Arc::clone(&stop),
            );
            let handle = supervisor
                .spawn()
                .with_context(|| format!("spawning link thread for {}", name))?;
            watch_link_state(&handle);
            links.push(handle);
        }
        // Ingest ends once the last supervisor drops its sender.
        drop(frame_tx);

        shutdown.await;
        info!("Shutdown requested");
        stop.store(true, Ordering::Relaxed);

        tokio::task::spawn_blocking(move || {
            for link in links {
                if link.thread.join().is_err() {
                    error!("Link thread {} panicked", link.name);
                }
            }
        })
        .await
        .map_err(|e| MeshtapError::Internal(format!("joining link threads: {}", e)))?;

        let interpreter = ingest_task
            .await
            .map_err(|e| MeshtapError::Internal(format!("ingest task failed: {}", e)))?;
        info!(
            "Ingest finished with {} nodes in registry",
            interpreter.registry().len()
        );

        let _ = server_stop_tx.send(true);
        server_task
            .await
            .map_err(|e| MeshtapError::Internal(format!("server task failed: {}", e)))?;
        info!("meshtap stopped");
        Ok(())
    }
}

/// Report link state changes at info level.
fn watch_link_state(handle: &LinkHandle) {
    let name = handle.name.clone();
    let mut rx = handle.state.clone();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = *rx.borrow();
            info!("Link {} is {}", name, state);
        }
    });
}
