// Peer Registry & Gossip (C4): liveness and performance bookkeeping for
// known peers, the periodic gossip broadcast of that bookkeeping, and a
// reaper that drops peers that have gone quiet past their TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use libp2p::PeerId;
use serde::{Deserialize, Serialize};

/// Per-peer response-time/success bookkeeping, kept in process memory only.
#[derive(Debug, Clone)]
struct PeerMetrics {
    successful: u64,
    failed: u64,
    total_response_ms: u64,
    last_seen: Instant,
}

impl PeerMetrics {
    fn new(now: Instant) -> Self {
        Self {
            successful: 0,
            failed: 0,
            total_response_ms: 0,
            last_seen: now,
        }
    }

    fn uptime_pct(&self) -> f64 {
        let total = self.successful + self.failed;
        if total == 0 {
            return 0.0;
        }
        (self.successful as f64 / total as f64) * 100.0
    }

    fn avg_response_ms(&self) -> f64 {
        if self.successful == 0 {
            return 0.0;
        }
        self.total_response_ms as f64 / self.successful as f64
    }

    fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.last_seen)
    }
}

/// A peer's local record: identity plus derived-on-read liveness stats.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub uptime_pct: f64,
    pub avg_response_ms: f64,
    pub last_seen_secs_ago: u64,
    pub is_storage_node: bool,
}

/// Wire form of a peer's gossiped liveness info (§6), broadcast on the
/// `filezap-peers` pubsub topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerGossipInfo {
    pub peer_id: String,
    pub uptime_pct: f64,
    pub avg_response_ms: f64,
    pub reported_at: DateTime<Utc>,
    pub is_storage_node: bool,
}

#[derive(Debug, Clone)]
struct StorageNodeRecord {
    announced_at: Instant,
}

struct Inner {
    peers: HashMap<PeerId, PeerMetrics>,
    storage_nodes: HashMap<PeerId, StorageNodeRecord>,
}

pub struct PeerRegistry {
    inner: Mutex<Inner>,
    peer_ttl: Duration,
}

impl PeerRegistry {
    pub fn new(peer_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                peers: HashMap::new(),
                storage_nodes: HashMap::new(),
            }),
            peer_ttl,
        }
    }

    /// Record a successful interaction with `peer`, with its response latency.
    pub fn record_success(&self, peer: PeerId, response_time: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let m = inner.peers.entry(peer).or_insert_with(|| PeerMetrics::new(now));
        m.successful += 1;
        m.total_response_ms += response_time.as_millis() as u64;
        m.last_seen = now;
    }

    /// Record a failed interaction with `peer`.
    pub fn record_failure(&self, peer: PeerId) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let m = inner.peers.entry(peer).or_insert_with(|| PeerMetrics::new(now));
        m.failed += 1;
        m.last_seen = now;
    }

    /// Update (or create) a peer record's last-seen timestamp, e.g. on
    /// gossip receipt or rediscovery. Returns `true` if the peer was new.
    pub fn update(&self, peer: PeerId) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let existed = inner.peers.contains_key(&peer);
        let m = inner.peers.entry(peer).or_insert_with(|| PeerMetrics::new(now));
        m.last_seen = now;
        !existed
    }

    pub fn get(&self, peer: &PeerId) -> Option<PeerRecord> {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        inner.peers.get(peer).map(|m| PeerRecord {
            peer_id: *peer,
            uptime_pct: m.uptime_pct(),
            avg_response_ms: m.avg_response_ms(),
            last_seen_secs_ago: m.age(now).as_secs(),
            is_storage_node: inner.storage_nodes.contains_key(peer),
        })
    }

    pub fn get_all(&self) -> Vec<PeerRecord> {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        inner
            .peers
            .iter()
            .map(|(peer, m)| PeerRecord {
                peer_id: *peer,
                uptime_pct: m.uptime_pct(),
                avg_response_ms: m.avg_response_ms(),
                last_seen_secs_ago: m.age(now).as_secs(),
                is_storage_node: inner.storage_nodes.contains_key(peer),
            })
            .collect()
    }

    pub fn is_storage_node(&self, peer: &PeerId) -> bool {
        self.inner.lock().unwrap().storage_nodes.contains_key(peer)
    }

    pub fn announce_storage_node(&self, peer: PeerId) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        inner.peers.entry(peer).or_insert_with(|| PeerMetrics::new(now));
        inner.storage_nodes.insert(peer, StorageNodeRecord { announced_at: now });
    }

    pub fn remove_storage_node(&self, peer: &PeerId) {
        self.inner.lock().unwrap().storage_nodes.remove(peer);
    }

    /// Remove `peer` entirely (peer-registry side of a `RemovePeer` quorum decision).
    pub fn remove(&self, peer: &PeerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.peers.remove(peer);
        inner.storage_nodes.remove(peer);
    }

    /// Serializable gossip snapshot of every known peer, for broadcast.
    pub fn gossip_snapshot(&self) -> Vec<PeerGossipInfo> {
        let now = Instant::now();
        let reported_at = Utc::now();
        let inner = self.inner.lock().unwrap();
        inner
            .peers
            .iter()
            .map(|(peer, m)| PeerGossipInfo {
                peer_id: peer.to_string(),
                uptime_pct: m.uptime_pct(),
                avg_response_ms: m.avg_response_ms(),
                reported_at,
                is_storage_node: inner.storage_nodes.contains_key(peer),
            })
            .collect()
    }

    /// Drop peers whose last-seen timestamp is older than `peer_ttl`.
    /// Returns the peers that were reaped.
    pub fn reap(&self) -> Vec<PeerId> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<PeerId> = inner
            .peers
            .iter()
            .filter(|(_, m)| m.age(now) > self.peer_ttl)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &stale {
            inner.peers.remove(peer);
            inner.storage_nodes.remove(peer);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_success_updates_uptime_and_latency() {
        let reg = PeerRegistry::new(Duration::from_secs(300));
        let peer = PeerId::random();
        reg.record_success(peer, Duration::from_millis(100));
        reg.record_success(peer, Duration::from_millis(300));
        reg.record_failure(peer);
        let rec = reg.get(&peer).unwrap();
        assert!((rec.uptime_pct - (2.0 / 3.0 * 100.0)).abs() < 0.01);
        assert!((rec.avg_response_ms - 200.0).abs() < 0.01);
    }

    #[test]
    fn storage_node_flag_is_independent_of_metrics() {
        let reg = PeerRegistry::new(Duration::from_secs(300));
        let peer = PeerId::random();
        reg.announce_storage_node(peer);
        assert!(reg.is_storage_node(&peer));
        reg.remove_storage_node(&peer);
        assert!(!reg.is_storage_node(&peer));
    }

    #[test]
    fn reap_drops_only_stale_peers() {
        let reg = PeerRegistry::new(Duration::from_millis(0));
        let peer = PeerId::random();
        reg.update(peer);
        std::thread::sleep(Duration::from_millis(5));
        let reaped = reg.reap();
        assert_eq!(reaped, vec![peer]);
        assert!(reg.get(&peer).is_none());
    }

    #[test]
    fn update_reports_whether_peer_is_new() {
        let reg = PeerRegistry::new(Duration::from_secs(300));
        let peer = PeerId::random();
        assert!(reg.update(peer));
        assert!(!reg.update(peer));
    }

    #[test]
    fn gossip_snapshot_serializes_to_json() {
        let reg = PeerRegistry::new(Duration::from_secs(300));
        let peer = PeerId::random();
        reg.record_success(peer, Duration::from_millis(50));
        let snapshot = reg.gossip_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains(&peer.to_string()));
    }
}
