//! # Node Registry
//!
//! Live table of mesh participants keyed by [`NodeId`]. The ingest actor is the
//! only writer ([`NodeRegistry`]); everything else holds a [`RegistryReader`] that
//! can only take bounded snapshots under a read lock.
//!
//! Updates merge field by field: a position-only observation never erases a
//! display name learnt earlier, and empty strings count as "not provided".
//! Entries are never removed; consumers use [`Freshness`] to fade silent nodes.
//!
//! The table can be persisted to a JSON node cache so a restart does not lose
//! names that may take hours to be re-announced on a quiet mesh.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::meshtastic::{NodeId, Position, Telemetry};

/// One known mesh participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub hardware: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
    #[serde(default)]
    pub hops_away: Option<u32>,
    #[serde(default)]
    pub rx_snr: Option<f32>,
    #[serde(default)]
    pub rx_rssi: Option<i32>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub packets_seen: u64,
    #[serde(default)]
    pub last_source: Option<String>,
}

impl Node {
    fn new(id: NodeId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: None,
            long_name: None,
            short_name: None,
            hardware: None,
            position: None,
            telemetry: None,
            hops_away: None,
            rx_snr: None,
            rx_rssi: None,
            first_seen: now,
            last_seen: now,
            packets_seen: 0,
            last_source: None,
        }
    }

    /// Best display label: long name, short name, then the node id.
    pub fn label(&self) -> String {
        self.long_name
            .clone()
            .or_else(|| self.short_name.clone())
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn freshness(&self, now: DateTime<Utc>, ttl: Duration) -> Freshness {
        // A TTL too large for chrono never expires anything.
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return Freshness::Fresh;
        };
        if now.signed_duration_since(self.last_seen) > ttl {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    fn merge(&mut self, update: NodeUpdate, now: DateTime<Utc>) {
        merge_text(&mut self.user_id, update.user_id);
        merge_text(&mut self.long_name, update.long_name);
        merge_text(&mut self.short_name, update.short_name);
        merge_text(&mut self.hardware, update.hardware);
        merge_text(&mut self.last_source, update.source);
        if update.position.is_some() {
            self.position = update.position;
        }
        if let Some(t) = update.telemetry {
            self.telemetry = Some(match self.telemetry {
                Some(old) => old.merged_with(&t),
                None => t,
            });
        }
        if update.hops_away.is_some() {
            self.hops_away = update.hops_away;
        }
        if update.rx_snr.is_some() {
            self.rx_snr = update.rx_snr;
        }
        if update.rx_rssi.is_some() {
            self.rx_rssi = update.rx_rssi;
        }
        // Delayed packets must not move last_seen backwards.
        if now > self.last_seen {
            self.last_seen = now;
        }
        self.packets_seen = self.packets_seen.saturating_add(1);
    }
}

fn merge_text(slot: &mut Option<String>, value: Option<String>) {
    if let Some(v) = value {
        let v = v.trim();
        if !v.is_empty() {
            *slot = Some(v.to_string());
        }
    }
}

/// Fields observed in one packet. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub user_id: Option<String>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub hardware: Option<String>,
    pub position: Option<Position>,
    pub telemetry: Option<Telemetry>,
    pub hops_away: Option<u32>,
    pub rx_snr: Option<f32>,
    pub rx_rssi: Option<i32>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

type Table = Arc<RwLock<HashMap<NodeId, Node>>>;

/// Writable registry handle, owned by the ingest actor.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Table,
}

/// Read-only registry handle for snapshot consumers.
#[derive(Debug, Clone)]
pub struct RegistryReader {
    nodes: Table,
}

fn snapshot_of(table: &Table) -> Vec<Node> {
    let guard = table.read().unwrap_or_else(PoisonError::into_inner);
    let mut nodes: Vec<Node> = guard.values().cloned().collect();
    drop(guard);
    nodes.sort_by_key(|n| n.id);
    nodes
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(&self) -> RegistryReader {
        RegistryReader {
            nodes: Arc::clone(&self.nodes),
        }
    }

    pub fn upsert(&mut self, id: NodeId, update: NodeUpdate) -> Upsert {
        self.upsert_at(id, update, Utc::now())
    }

    /// Merge `update` into the entry for `id`, creating it when first sighted.
    pub fn upsert_at(&mut self, id: NodeId, update: NodeUpdate, now: DateTime<Utc>) -> Upsert {
        let mut guard = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match guard.get_mut(&id) {
            Some(node) => {
                node.merge(update, now);
                Upsert::Updated
            }
            None => {
                let mut node = Node::new(id, now);
                node.merge(update, now);
                guard.insert(id, node);
                Upsert::Created
            }
        }
    }

    pub fn get(&self, id: NodeId) -> Option<Node> {
        self.reader().get(id)
    }

    pub fn len(&self) -> usize {
        self.reader().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Node> {
        snapshot_of(&self.nodes)
    }

    pub fn staleness(&self, ttl: Duration) -> Vec<(NodeId, Freshness)> {
        self.reader().staleness_at(ttl, Utc::now())
    }

    /// Seed the table from a persisted cache. Entries already present (seen live)
    /// win over cached ones.
    pub fn restore(&mut self, nodes: impl IntoIterator<Item = Node>) -> usize {
        let mut guard = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let mut restored = 0;
        for node in nodes {
            if node.id.is_unknown() {
                continue;
            }
            guard.entry(node.id).or_insert_with(|| {
                restored += 1;
                node
            });
        }
        restored
    }
}

impl RegistryReader {
    pub fn get(&self, id: NodeId) -> Option<Node> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Immutable copy of every entry, ordered by node id.
    pub fn snapshot(&self) -> Vec<Node> {
        snapshot_of(&self.nodes)
    }

    pub fn staleness(&self, ttl: Duration) -> Vec<(NodeId, Freshness)> {
        self.staleness_at(ttl, Utc::now())
    }

    pub fn staleness_at(&self, ttl: Duration, now: DateTime<Utc>) -> Vec<(NodeId, Freshness)> {
        self.snapshot()
            .into_iter()
            .map(|n| (n.id, n.freshness(now, ttl)))
            .collect()
    }
}

/// On-disk form of the registry.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeCache {
    pub nodes: Vec<Node>,
    pub last_updated: DateTime<Utc>,
}

impl NodeCache {
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            last_updated: Utc::now(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Guard against accidental leading NULs from previous partial writes
        let cleaned = content.trim_start_matches('\0');
        let cache: NodeCache = serde_json::from_str(cleaned)?;
        Ok(cache)
    }

    /// Write via a temp file in the same directory and rename over the target.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        use std::fs::{self as sfs, File, OpenOptions};
        use std::io::Write;
        let path_ref = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;

        let dir = match path_ref.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        sfs::create_dir_all(dir)?;
        let base = path_ref
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("node_cache.json");
        let mut counter = 0u32;
        let tmp_path = loop {
            let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(mut tmp) => {
                    tmp.write_all(content.as_bytes())?;
                    tmp.flush()?;
                    let _ = tmp.sync_all();
                    break candidate;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    counter = counter.saturating_add(1);
                    continue;
                }
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "Failed to create temp file for atomic write: {}",
                        e
                    ))
                }
            }
        };

        sfs::rename(&tmp_path, path_ref)?;
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
        Ok(())
    }
}

/// Load a cache file into `registry`. A missing or corrupt file is logged and
/// ignored; the registry simply starts empty.
pub fn load_cache_into(registry: &mut NodeRegistry, path: &Path) -> usize {
    if !path.exists() {
        debug!("No node cache at {}, starting fresh", path.display());
        return 0;
    }
    match NodeCache::load_from_file(path) {
        Ok(cache) => {
            let restored = registry.restore(cache.nodes);
            debug!("Restored {} cached nodes from {}", restored, path.display());
            restored
        }
        Err(e) => {
            warn!("Ignoring unreadable node cache {}: {}", path.display(), e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn name_then_position_keeps_both() {
        let mut reg = NodeRegistry::new();
        let id = NodeId(0xabc123);
        let created = reg.upsert_at(
            id,
            NodeUpdate {
                long_name: Some("A".into()),
                ..Default::default()
            },
            t(0),
        );
        assert_eq!(created, Upsert::Created);
        let pos = Position {
            latitude: 1.5,
            longitude: 2.5,
            altitude: None,
        };
        let updated = reg.upsert_at(
            id,
            NodeUpdate {
                position: Some(pos),
                ..Default::default()
            },
            t(5),
        );
        assert_eq!(updated, Upsert::Updated);
        let node = reg.get(id).expect("node");
        assert_eq!(node.long_name.as_deref(), Some("A"));
        assert_eq!(node.position, Some(pos));
        assert_eq!(node.first_seen, t(0));
        assert_eq!(node.last_seen, t(5));
        assert_eq!(node.packets_seen, 2);
    }

    #[test]
    fn empty_strings_do_not_clobber() {
        let mut reg = NodeRegistry::new();
        let id = NodeId(7);
        reg.upsert(
            id,
            NodeUpdate {
                long_name: Some("Base".into()),
                short_name: Some("BS".into()),
                ..Default::default()
            },
        );
        reg.upsert(
            id,
            NodeUpdate {
                long_name: Some("   ".into()),
                short_name: Some(String::new()),
                ..Default::default()
            },
        );
        let node = reg.get(id).expect("node");
        assert_eq!(node.long_name.as_deref(), Some("Base"));
        assert_eq!(node.short_name.as_deref(), Some("BS"));
    }

    #[test]
    fn delayed_packet_does_not_rewind_last_seen() {
        let mut reg = NodeRegistry::new();
        let id = NodeId(9);
        reg.upsert_at(id, NodeUpdate::default(), t(100));
        reg.upsert_at(id, NodeUpdate::default(), t(50));
        assert_eq!(reg.get(id).expect("node").last_seen, t(100));
    }

    #[test]
    fn staleness_classifies_without_removing() {
        let mut reg = NodeRegistry::new();
        reg.upsert_at(NodeId(1), NodeUpdate::default(), t(0));
        reg.upsert_at(NodeId(2), NodeUpdate::default(), t(900));
        let classes = reg
            .reader()
            .staleness_at(Duration::from_secs(600), t(1000));
        assert_eq!(
            classes,
            vec![(NodeId(1), Freshness::Stale), (NodeId(2), Freshness::Fresh)]
        );
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn reader_sees_writer_updates() {
        let mut reg = NodeRegistry::new();
        let reader = reg.reader();
        assert!(reader.is_empty());
        reg.upsert(NodeId(3), NodeUpdate::default());
        assert_eq!(reader.len(), 1);
        assert_eq!(reader.snapshot()[0].id, NodeId(3));
    }

    #[test]
    fn cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("nodes.json");
        let mut reg = NodeRegistry::new();
        reg.upsert(
            NodeId(0x1234),
            NodeUpdate {
                long_name: Some("Hilltop".into()),
                ..Default::default()
            },
        );
        NodeCache::from_nodes(reg.snapshot())
            .save_to_file(&path)
            .expect("save");

        let mut restored = NodeRegistry::new();
        assert_eq!(load_cache_into(&mut restored, &path), 1);
        assert_eq!(
            restored.get(NodeId(0x1234)).and_then(|n| n.long_name),
            Some("Hilltop".to_string())
        );
    }

    #[test]
    fn corrupt_cache_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nodes.json");
        std::fs::write(&path, "{not json").expect("write");
        let mut reg = NodeRegistry::new();
        assert_eq!(load_cache_into(&mut reg, &path), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn live_entries_win_over_cache() {
        let mut reg = NodeRegistry::new();
        reg.upsert(
            NodeId(5),
            NodeUpdate {
                long_name: Some("Live".into()),
                ..Default::default()
            },
        );
        let mut cached = Node::new(NodeId(5), t(0));
        cached.long_name = Some("Old".into());
        assert_eq!(reg.restore(vec![cached]), 0);
        assert_eq!(reg.get(NodeId(5)).and_then(|n| n.long_name), Some("Live".into()));
    }
}
