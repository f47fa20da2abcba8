//! The ingest actor: the single task that owns the [`Interpreter`] (and with it the
//! writable registry and the dedup window).
//!
//! Link supervisors push [`InboundFrame`]s into an unbounded channel; the actor
//! decodes, deduplicates, upserts and publishes them in arrival order. When every
//! sender is gone it saves the node cache one last time and closes the bus so
//! streaming clients drain and disconnect.
use log::{debug, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::Config;
use crate::link::InboundFrame;
use crate::meshtastic::Interpreter;
use crate::metrics;
use crate::registry::NodeCache;

#[derive(Debug, Clone, Default)]
pub struct IngestSettings {
    pub cache_file: Option<PathBuf>,
    /// `None` saves only on shutdown.
    pub save_interval: Option<Duration>,
    /// `None` disables periodic stats lines.
    pub stats_interval: Option<Duration>,
}

fn positive_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_file: config.registry.cache_file.as_ref().map(PathBuf::from),
            save_interval: positive_secs(config.registry.save_interval_secs),
            stats_interval: positive_secs(config.ingest.stats_interval_secs),
        }
    }
}

fn ticker(period: Option<Duration>) -> Option<Interval> {
    period.map(|p| {
        let mut t = interval_at(Instant::now() + p, p);
        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
        t
    })
}

async fn tick(t: &mut Option<Interval>) {
    match t {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Write the registry to the cache file, if one is configured.
pub fn save_cache(interpreter: &Interpreter, settings: &IngestSettings) {
    let Some(path) = settings.cache_file.as_ref() else {
        return;
    };
    let nodes = interpreter.registry().snapshot();
    let count = nodes.len();
    match NodeCache::from_nodes(nodes).save_to_file(path) {
        Ok(()) => debug!("Saved {} nodes to {}", count, path.display()),
        Err(e) => warn!("Failed to save node cache {}: {}", path.display(), e),
    }
}

fn log_stats(interpreter: &Interpreter) {
    let m = metrics::snapshot();
    let bus = interpreter.bus().stats();
    info!(
        "stats: nodes={} frames={} rejected={} resync_bytes={} unknown={} dup={} events={} subscribers={} dropped={} clients={} reconnects={}",
        interpreter.registry().len(),
        m.frames_decoded,
        m.frames_rejected,
        m.resync_bytes,
        m.packets_unknown,
        m.duplicates_suppressed,
        bus.published,
        bus.subscribers,
        bus.dropped,
        m.clients_active(),
        m.link_reconnects
    );
}

/// Run until every frame sender has been dropped. Returns the interpreter so
/// callers can inspect final state.
pub async fn run_ingest(
    mut interpreter: Interpreter,
    mut frames: mpsc::UnboundedReceiver<InboundFrame>,
    settings: IngestSettings,
) -> Interpreter {
    info!(
        "Ingest started ({} nodes known)",
        interpreter.registry().len()
    );
    let mut save_timer = ticker(settings.save_interval);
    let mut stats_timer = ticker(settings.stats_interval);

    loop {
        tokio::select! {
            inbound = frames.recv() => match inbound {
                Some(InboundFrame { source, frame }) => {
                    interpreter.ingest(&source, &frame.payload);
                }
                None => break,
            },
            _ = tick(&mut save_timer) => save_cache(&interpreter, &settings),
            _ = tick(&mut stats_timer) => log_stats(&interpreter),
        }
    }

    info!("Ingest stopping; {} events published", interpreter.next_sequence() - 1);
    save_cache(&interpreter, &settings);
    interpreter.bus().close();
    interpreter
}
