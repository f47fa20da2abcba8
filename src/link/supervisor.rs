//! Connection lifecycle for one device.
//!
//! A supervisor runs on its own OS thread because serial I/O is blocking. It is
//! the only owner of its connection and its [`FrameDecoder`]; decoded frames leave
//! through an unbounded channel towards the ingest actor, so nothing downstream
//! can stall the read loop.
use log::{debug, info, trace, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use super::connector::{LinkConnector, LinkIo};
use super::state::{Backoff, LinkEvent, LinkState, LinkStateMachine};
use super::InboundFrame;
use crate::logutil::hex_snippet;
use crate::meshtastic::framer::{FrameCheck, FrameDecoder};
use crate::meshtastic::{heartbeat_frame, want_config_frame};
use crate::metrics;

/// Longest single sleep while waiting, so shutdown is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// No bytes at all for this long while connected counts as a disconnect.
    pub idle_timeout: Duration,
    /// Streaming this long before a failure resets the backoff.
    pub stable_after: Duration,
    pub want_config: bool,
    pub heartbeat: Option<Duration>,
    pub max_payload: usize,
    pub check: Arc<dyn FrameCheck>,
}

#[derive(Debug, Error)]
pub enum LinkFailure {
    #[error("device closed the stream")]
    Eof,
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("no bytes received for {0:?}")]
    Idle(Duration),
}

pub struct LinkSupervisor<C: LinkConnector> {
    name: String,
    connector: C,
    settings: LinkSettings,
    frames: mpsc::UnboundedSender<InboundFrame>,
    state_tx: watch::Sender<LinkState>,
    shutdown: Arc<AtomicBool>,
    machine: LinkStateMachine,
    backoff: Backoff,
    decoder: FrameDecoder,
    streaming_since: Option<Instant>,
}

/// Running supervisor thread plus its observable state.
#[derive(Debug)]
pub struct LinkHandle {
    pub name: String,
    pub state: watch::Receiver<LinkState>,
    pub thread: JoinHandle<()>,
}

impl<C: LinkConnector + 'static> LinkSupervisor<C> {
    pub fn new(
        name: impl Into<String>,
        connector: C,
        settings: LinkSettings,
        frames: mpsc::UnboundedSender<InboundFrame>,
        shutdown: Arc<AtomicBool>,
    ) -> (Self, watch::Receiver<LinkState>) {
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let decoder = FrameDecoder::new(Arc::clone(&settings.check), settings.max_payload);
        let backoff = Backoff::new(settings.backoff_min, settings.backoff_max);
        (
            Self {
                name: name.into(),
                connector,
                settings,
                frames,
                state_tx,
                shutdown,
                machine: LinkStateMachine::new(),
                backoff,
                decoder,
                streaming_since: None,
            },
            state_rx,
        )
    }

    /// Run on a dedicated named thread.
    pub fn spawn(self) -> io::Result<LinkHandle> {
        let name = self.name.clone();
        let state = self.state_tx.subscribe();
        let thread = thread::Builder::new()
            .name(format!("link-{}", name))
            .spawn(move || self.run())?;
        Ok(LinkHandle {
            name,
            state,
            thread,
        })
    }

    /// Blocking supervisor loop; returns once shutdown is requested or the
    /// ingest side has gone away.
    pub fn run(mut self) {
        info!(
            "Link {}: supervising {}",
            self.name,
            self.connector.describe()
        );
        self.apply(LinkEvent::Start);
        while !self.stopping() {
            match self.machine.state() {
                LinkState::Connecting => self.connect_and_stream(),
                LinkState::Backoff => self.wait_backoff(),
                other => {
                    // Only Connecting and Backoff are resting states of this loop.
                    warn!("Link {}: unexpected state {}, restarting", self.name, other);
                    self.apply(LinkEvent::Stop);
                    self.apply(LinkEvent::Start);
                }
            }
        }
        self.apply(LinkEvent::Stop);
        info!("Link {}: stopped", self.name);
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed) || self.frames.is_closed()
    }

    fn apply(&mut self, event: LinkEvent) {
        let before = self.machine.state();
        let (state, changed) = self.machine.on(event);
        if changed {
            debug!("Link {}: {} -> {} ({:?})", self.name, before, state, event);
            self.state_tx.send_replace(state);
        }
    }

    fn connect_and_stream(&mut self) {
        let io = match self.connector.open() {
            Ok(io) => io,
            Err(e) => {
                warn!(
                    "Link {}: cannot open {}: {}",
                    self.name,
                    self.connector.describe(),
                    e
                );
                self.apply(LinkEvent::OpenFailed);
                return;
            }
        };
        self.apply(LinkEvent::Opened);
        // A fresh connection starts mid-stream; forget any partial frame.
        self.decoder.reset();
        self.streaming_since = None;

        match self.pump(io) {
            Ok(()) => {}
            Err(failure) => {
                warn!("Link {}: {}", self.name, failure);
                let sustained = self
                    .streaming_since
                    .take()
                    .map(|since| since.elapsed() >= self.settings.stable_after)
                    .unwrap_or(false);
                if sustained {
                    debug!("Link {}: had been stable, resetting backoff", self.name);
                    self.backoff.reset();
                }
                self.apply(LinkEvent::Failure);
            }
        }
    }

    fn wait_backoff(&mut self) {
        let delay = self.backoff.next_delay();
        info!(
            "Link {}: reconnecting in {:?} (attempt {})",
            self.name,
            delay,
            self.backoff.attempts()
        );
        self.sleep_sliced(delay);
        if !self.stopping() {
            metrics::inc_link_reconnects();
            self.apply(LinkEvent::BackoffElapsed);
        }
    }

    fn sleep_sliced(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn send_raw(io: &mut Box<dyn LinkIo>, bytes: &[u8]) -> Result<(), LinkFailure> {
        io.write_all(bytes)
            .and_then(|_| io.flush())
            .map_err(LinkFailure::Write)
    }

    /// Read until failure or shutdown. `Ok` means shutdown.
    fn pump(&mut self, mut io: Box<dyn LinkIo>) -> Result<(), LinkFailure> {
        if self.settings.want_config {
            let request_id = (chrono::Utc::now().timestamp_millis() as u32) | 1;
            debug!(
                "Link {}: requesting config id=0x{:08x}",
                self.name, request_id
            );
            Self::send_raw(
                &mut io,
                &want_config_frame(request_id, self.settings.check.as_ref()),
            )?;
        }

        let mut buf = [0u8; READ_CHUNK];
        let mut last_rx = Instant::now();
        let mut last_heartbeat = Instant::now();
        while !self.stopping() {
            if let Some(every) = self.settings.heartbeat {
                if last_heartbeat.elapsed() >= every {
                    trace!("Link {}: heartbeat", self.name);
                    Self::send_raw(&mut io, &heartbeat_frame(self.settings.check.as_ref()))?;
                    last_heartbeat = Instant::now();
                }
            }

            match io.read(&mut buf) {
                Ok(0) => return Err(LinkFailure::Eof),
                Ok(n) => {
                    last_rx = Instant::now();
                    trace!(
                        "Link {}: RAW {} bytes: {}",
                        self.name,
                        n,
                        hex_snippet(&buf[..n], 64)
                    );
                    self.decoder.push(&buf[..n]);
                    self.forward_frames();
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(LinkFailure::Read(e)),
            }

            if last_rx.elapsed() >= self.settings.idle_timeout {
                return Err(LinkFailure::Idle(self.settings.idle_timeout));
            }
        }
        Ok(())
    }

    fn forward_frames(&mut self) {
        while let Some(frame) = self.decoder.next_frame() {
            if self.machine.state() == LinkState::Syncing {
                info!("Link {}: stream aligned, streaming", self.name);
                self.streaming_since = Some(Instant::now());
                self.apply(LinkEvent::FrameValidated);
            }
            let inbound = InboundFrame {
                source: self.name.clone(),
                frame,
            };
            if self.frames.send(inbound).is_err() {
                debug!("Link {}: ingest closed, dropping frame", self.name);
                return;
            }
        }
    }
}
