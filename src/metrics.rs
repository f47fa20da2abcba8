//! Process-wide ingestion counters.
//!
//! Plain relaxed atomics: cheap enough to bump from the serial threads, the ingest
//! actor and every client task without coordination. Read with [`snapshot`].
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_DECODED: AtomicU64 = AtomicU64::new(0);
static FRAMES_REJECTED: AtomicU64 = AtomicU64::new(0);
static RESYNC_BYTES: AtomicU64 = AtomicU64::new(0);
static PACKETS_UNKNOWN: AtomicU64 = AtomicU64::new(0);
static DUPLICATES_SUPPRESSED: AtomicU64 = AtomicU64::new(0);
static EVENTS_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static SUBSCRIBER_DROPS: AtomicU64 = AtomicU64::new(0);
static CLIENTS_CONNECTED: AtomicU64 = AtomicU64::new(0);
static CLIENTS_DISCONNECTED: AtomicU64 = AtomicU64::new(0);
static LINK_RECONNECTS: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_decoded() {
    FRAMES_DECODED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_rejected() {
    FRAMES_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn add_resync_bytes(n: u64) {
    RESYNC_BYTES.fetch_add(n, Ordering::Relaxed);
}
pub fn inc_packets_unknown() {
    PACKETS_UNKNOWN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_duplicates_suppressed() {
    DUPLICATES_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_events_published() {
    EVENTS_PUBLISHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_subscriber_drops() {
    SUBSCRIBER_DROPS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_clients_connected() {
    CLIENTS_CONNECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_clients_disconnected() {
    CLIENTS_DISCONNECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_link_reconnects() {
    LINK_RECONNECTS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub resync_bytes: u64,
    pub packets_unknown: u64,
    pub duplicates_suppressed: u64,
    pub events_published: u64,
    pub subscriber_drops: u64,
    pub clients_connected: u64,
    pub clients_disconnected: u64,
    pub link_reconnects: u64,
}

impl Snapshot {
    /// Clients currently attached, derived from the connect/disconnect counters.
    pub fn clients_active(&self) -> u64 {
        self.clients_connected
            .saturating_sub(self.clients_disconnected)
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_decoded: FRAMES_DECODED.load(Ordering::Relaxed),
        frames_rejected: FRAMES_REJECTED.load(Ordering::Relaxed),
        resync_bytes: RESYNC_BYTES.load(Ordering::Relaxed),
        packets_unknown: PACKETS_UNKNOWN.load(Ordering::Relaxed),
        duplicates_suppressed: DUPLICATES_SUPPRESSED.load(Ordering::Relaxed),
        events_published: EVENTS_PUBLISHED.load(Ordering::Relaxed),
        subscriber_drops: SUBSCRIBER_DROPS.load(Ordering::Relaxed),
        clients_connected: CLIENTS_CONNECTED.load(Ordering::Relaxed),
        clients_disconnected: CLIENTS_DISCONNECTED.load(Ordering::Relaxed),
        link_reconnects: LINK_RECONNECTS.load(Ordering::Relaxed),
    }
}
