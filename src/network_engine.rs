// Network Engine (C9): composes C1-C8 behind the four public operations
// (`add_file`, `get_file`, `report_bad_file`, `report_bad_peer`), owns the
// libp2p swarm through `network_actor`'s actor handle, and runs the
// background loops that keep gossip, replication, and quorum bookkeeping
// current.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use libp2p::PeerId;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunk_store::ChunkStore;
use crate::chunk_validator::ChunkValidator;
use crate::config::Config;
use crate::crypto;
use crate::error::{FileZapError, FileZapResult};
use crate::key_share_manager::KeyShareManager;
use crate::logging::{log_chunk_operation, log_network_event, log_quorum_event};
use crate::manifest_registry::{Manifest, ManifestRegistry};
use crate::network::{TOPIC_MANIFESTS, TOPIC_PEERS, TOPIC_QUORUM, TOPIC_STORAGE};
use crate::network_actor::{InboundMessage, NetworkHandle};
use crate::peer_registry::{PeerGossipInfo, PeerRegistry};
use crate::quorum::{QuorumEngine, VoteType};
use crate::reputation::ReputationLedger;
use crate::traits::{PeerTransport, Pubsub};

/// Uptime below this triggers a small reputation penalty during the
/// background monitor pass (peers below it are noisy, not malicious).
const LOW_UPTIME_PCT: f64 = 50.0;
const LOW_UPTIME_PENALTY: i32 = -2;
/// Explicit operator/report reputation penalties (§4.9), distinct from the
/// validator's per-chunk penalties in `chunk_validator.rs`.
const REPORTED_BAD_PEER_PENALTY: i32 = -50;
const REPORTED_BAD_FILE_OWNER_PENALTY: i32 = -20;

/// Announces a peer's RSA public key so it can be selected as a key-share
/// holder. Broadcast on `filezap-peers` alongside `PeerGossipInfo` batches,
/// distinguished by its `kind` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyAnnouncement {
    peer_id: String,
    public_key_der: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum PeerTopicMessage {
    Gossip { peers: Vec<PeerGossipInfo> },
    KeyAnnouncement(KeyAnnouncement),
}

pub struct NetworkEngine {
    config: Config,
    handle: Arc<NetworkHandle>,
    peer_registry: Arc<PeerRegistry>,
    manifests: Arc<ManifestRegistry>,
    reputation: Arc<ReputationLedger>,
    quorum: Arc<QuorumEngine>,
    validator: Arc<ChunkValidator>,
    chunk_store: Arc<ChunkStore>,
    key_shares: Arc<KeyShareManager>,
    local_private_key: RsaPrivateKey,
    local_public_key: RsaPublicKey,
    peer_keys: Mutex<HashMap<PeerId, RsaPublicKey>>,
}

impl NetworkEngine {
    /// Construct every component in the fixed order the construction-cycle
    /// resolution in DESIGN.md requires, spawn the network actor, and start
    /// the background gossip/replication/cleanup/dispatch loops.
    pub async fn start(config: Config) -> FileZapResult<Arc<Self>> {
        let chunk_store = Arc::new(ChunkStore::new(config.storage.max_chunk_size, config.storage.max_total_size));

        let (handle, mut inbound_rx) = NetworkHandle::spawn(config.clone(), chunk_store.clone())?;
        let handle = Arc::new(handle);

        let peer_registry = Arc::new(PeerRegistry::new(Duration::from_secs(config.network.peer_ttl_secs)));
        let manifests = Arc::new(ManifestRegistry::new(handle.clone()));
        let reputation = Arc::new(ReputationLedger::new(config.quorum.auto_ban_threshold));

        let (quorum, mut channels) = QuorumEngine::new(
            peer_registry.clone(),
            reputation.clone(),
            manifests.clone(),
            config.quorum.min_quorum_size,
            config.quorum.approval_threshold_pct,
            config.quorum.base_weight,
            config.quorum.storage_node_weight,
            Duration::from_secs(config.quorum.voting_window_secs),
            Duration::from_secs(config.quorum.release_key_window_secs),
        );
        let quorum = Arc::new(quorum);
        reputation.bind_remover(quorum.clone());

        let validator = Arc::new(ChunkValidator::new(config.storage.max_chunk_size, reputation.clone(), quorum.clone()));
        let key_shares = Arc::new(KeyShareManager::new(Duration::from_secs(config.crypto.share_request_ttl_secs)));

        let mut rng = rsa::rand_core::OsRng;
        let local_private_key = RsaPrivateKey::new(&mut rng, 2048)
            .map_err(|e| FileZapError::Generic(format!("RSA keygen failed: {e}")))?;
        let local_public_key = RsaPublicKey::from(&local_private_key);

        let engine = Arc::new(Self {
            config: config.clone(),
            handle,
            peer_registry,
            manifests,
            reputation,
            quorum,
            validator,
            chunk_store,
            key_shares,
            local_private_key,
            local_public_key,
            peer_keys: Mutex::new(HashMap::new()),
        });

        engine.announce_public_key().await?;

        let crate::quorum::QuorumChannels { mut peer_banned, mut file_removed } = channels;
        tokio::spawn({
            let engine = engine.clone();
            async move {
                while let Some(peer) = peer_banned.recv().await {
                    log_quorum_event("peer_banned", &peer.to_string(), "removed by quorum approval");
                    engine.peer_keys.lock().unwrap().remove(&peer);
                    if let Err(e) = engine.handle.close_peer(peer).await {
                        warn!("failed to close connection to banned peer {peer}: {e}");
                    }
                }
            }
        });
        tokio::spawn({
            let manifests = engine.manifests.clone();
            let chunk_store = engine.chunk_store.clone();
            async move {
                while let Some(file_name) = file_removed.recv().await {
                    if let Some(manifest) = manifests.remove(&file_name) {
                        for hash in manifest.chunk_hashes {
                            chunk_store.remove(&hash);
                        }
                    }
                    log_quorum_event("file_removed", &file_name, "removed by quorum approval");
                }
            }
        });

        tokio::spawn({
            let engine = engine.clone();
            async move {
                while let Some(msg) = inbound_rx.recv().await {
                    engine.handle_inbound(msg).await;
                }
            }
        });

        engine.clone().spawn_background_loops();

        Ok(engine)
    }

    fn spawn_background_loops(self: Arc<Self>) {
        tokio::spawn({
            let engine = self.clone();
            async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(engine.config.network.gossip_interval_secs));
                loop {
                    ticker.tick().await;
                    engine.broadcast_peer_gossip().await;
                }
            }
        });

        tokio::spawn({
            let engine = self.clone();
            async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(engine.config.network.reaper_interval_secs));
                loop {
                    ticker.tick().await;
                    engine.monitor_peers();
                }
            }
        });

        tokio::spawn({
            let engine = self.clone();
            async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(engine.config.network.replication_interval_secs));
                loop {
                    ticker.tick().await;
                    engine.manifests.replicate_once().await;
                }
            }
        });

        tokio::spawn({
            let engine = self.clone();
            async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(engine.config.quorum.cleanup_interval_secs));
                loop {
                    ticker.tick().await;
                    engine.quorum.cleanup();
                }
            }
        });
    }

    /// Background monitor pass: reap TTL-expired peers, and apply a small
    /// reputation penalty to peers whose derived uptime is suspiciously low.
    fn monitor_peers(&self) {
        for peer in self.peer_registry.reap() {
            log_network_event("peer_reaped", &peer.to_string());
            self.peer_keys.lock().unwrap().remove(&peer);
        }
        for record in self.peer_registry.get_all() {
            if record.uptime_pct < LOW_UPTIME_PCT {
                self.reputation.update(record.peer_id, LOW_UPTIME_PENALTY);
            }
        }
    }

    async fn broadcast_peer_gossip(&self) {
        let snapshot = self.peer_registry.gossip_snapshot();
        let msg = PeerTopicMessage::Gossip { peers: snapshot };
        let Ok(bytes) = serde_json::to_vec(&msg) else { return };
        if let Err(e) = self.handle.publish(TOPIC_PEERS, bytes).await {
            warn!("peer gossip broadcast failed: {e}");
        }
    }

    async fn announce_public_key(&self) -> FileZapResult<()> {
        let der = self
            .local_public_key
            .to_public_key_der()
            .map_err(|e| FileZapError::Generic(format!("public key encode failed: {e}")))?
            .as_bytes()
            .to_vec();
        let msg = PeerTopicMessage::KeyAnnouncement(KeyAnnouncement {
            peer_id: self.handle.local_peer_id().to_string(),
            public_key_der: der,
        });
        let bytes = serde_json::to_vec(&msg)?;
        self.handle.publish(TOPIC_PEERS, bytes).await
    }

    async fn handle_inbound(&self, msg: InboundMessage) {
        match msg.topic.as_str() {
            t if t == TOPIC_PEERS => self.handle_peer_topic_message(&msg.data),
            t if t == TOPIC_MANIFESTS => self.handle_manifest_topic_message(&msg.data),
            t if t == TOPIC_QUORUM => self.handle_quorum_topic_message(&msg.data),
            t if t == TOPIC_STORAGE => debug!("storage announcement: {} bytes", msg.data.len()),
            other => debug!("message on unrecognized topic {other}"),
        }
    }

    fn handle_peer_topic_message(&self, data: &[u8]) {
        let Ok(msg) = serde_json::from_slice::<PeerTopicMessage>(data) else {
            return;
        };
        match msg {
            PeerTopicMessage::Gossip { peers } => {
                for info in peers {
                    if let Ok(peer) = info.peer_id.parse::<PeerId>() {
                        self.peer_registry.update(peer);
                        if info.is_storage_node {
                            self.peer_registry.announce_storage_node(peer);
                        }
                    }
                }
            }
            PeerTopicMessage::KeyAnnouncement(announcement) => {
                let Ok(peer) = announcement.peer_id.parse::<PeerId>() else { return };
                if let Ok(pubkey) = RsaPublicKey::from_public_key_der(&announcement.public_key_der) {
                    self.peer_keys.lock().unwrap().insert(peer, pubkey);
                    self.peer_registry.update(peer);
                }
            }
        }
    }

    fn handle_manifest_topic_message(&self, data: &[u8]) {
        let Ok(manifest) = serde_json::from_slice::<Manifest>(data) else {
            return;
        };
        let dht_key = format!("/filezap/{}", manifest.name);
        if ManifestRegistry::validate_record(&dht_key, data).is_ok() {
            let manifests = self.manifests.clone();
            tokio::spawn(async move {
                let _ = manifests.add(manifest).await;
            });
        }
    }

    fn handle_quorum_topic_message(&self, data: &[u8]) {
        if let Ok(vote) = serde_json::from_slice::<crate::quorum::Vote>(data) {
            log_quorum_event("vote_seen", &vote.vote_id, &vote.target);
            return;
        }
        if let Ok(response) = serde_json::from_slice::<crate::quorum::VoteResponse>(data) {
            if let Err(e) = self.quorum.record_vote(response.clone()) {
                debug!("vote response {} not applied: {e}", response.vote_id);
            }
        }
    }

    /// Encrypt, chunk, validate each chunk (C3), store locally (C1), split
    /// the file key across known peers as key-share holders (C7), and
    /// register + announce the manifest (C6).
    ///
    /// The adding node keeps the only copy at this point; other holders pull
    /// chunks on demand through `get_file`'s C2 download fallback once the
    /// manifest names this node as owner. The manifest publish is the
    /// commitment point; a storage failure partway through fails the whole
    /// call without rolling back chunks already cached locally
    /// (content-addressed storage is idempotent, per §7).
    pub async fn add_file(&self, file_name: String, data: Vec<u8>) -> FileZapResult<Manifest> {
        let key = crypto::generate_file_key();
        let ciphertext = crypto::aes_encrypt(&key, &data)?;
        let local_peer = self.handle.local_peer_id();

        let chunk_size = self.config.storage.chunk_size.max(1);
        let mut chunk_hashes = Vec::new();
        for chunk in ciphertext.chunks(chunk_size) {
            let hash = crypto::sha256_hex(chunk);
            let framed = crypto::format_chunk(chunk);
            let outcome = self.validator.validate(&hash, &framed, local_peer);
            if outcome != crate::chunk_validator::ValidationOutcome::Success {
                return Err(FileZapError::ContentMalformed(format!(
                    "chunk {hash} failed local validation: {outcome:?}"
                )));
            }
            if !self.chunk_store.store(hash.clone(), framed)? {
                return Err(FileZapError::StorageFull {
                    requested: chunk.len(),
                    capacity: self.config.storage.max_total_size,
                });
            }
            log_chunk_operation("stored", &hash, &file_name);
            chunk_hashes.push(hash);
        }

        let threshold = self.config.crypto.default_threshold;
        let holders = self.select_holders(self.config.crypto.default_holders)?;
        let shares = KeyShareManager::generate_shares(&key, holders.len(), threshold);
        self.key_shares.assign(file_name.clone(), threshold, shares, holders.clone())?;

        let manifest = Manifest {
            name: file_name.clone(),
            owner: local_peer.to_string(),
            chunk_hashes,
            size: data.len() as u64,
            replication_goal: self.config.network.replication_factor.max(1),
            updated_at: Utc::now(),
        };
        self.manifests.add(manifest.clone()).await?;

        let bytes = serde_json::to_vec(&manifest)?;
        self.handle.publish(TOPIC_MANIFESTS, bytes).await?;
        self.handle.publish(TOPIC_STORAGE, serde_json::to_vec(&manifest.name)?).await?;

        info!("added file {file_name} as {} chunks across {} holders", manifest.chunk_hashes.len(), holders.len());
        Ok(manifest)
    }

    /// Pick `n` peers with a known public key to act as key-share holders,
    /// preferring announced storage nodes. Errors if fewer than `n` are known.
    fn select_holders(&self, n: usize) -> FileZapResult<Vec<(PeerId, RsaPublicKey)>> {
        let peer_keys = self.peer_keys.lock().unwrap();
        let mut candidates: Vec<PeerId> = peer_keys.keys().copied().collect();
        candidates.sort_by_key(|p| !self.peer_registry.is_storage_node(p));
        if candidates.len() < n {
            return Err(FileZapError::InsufficientPeers { have: candidates.len(), need: n });
        }
        Ok(candidates
            .into_iter()
            .take(n)
            .map(|p| (p, peer_keys.get(&p).unwrap().clone()))
            .collect())
    }

    /// Fetch the manifest (C6); for each chunk hash, try the local store
    /// (C1) first, falling back to downloading from the manifest's owner
    /// over the chunk transfer protocol (C2); re-validate every chunk
    /// before accepting it (C3), failing fast on the first bad one.
    /// Reassembles and decrypts with a key recombined (C7) from
    /// caller-supplied shares, gathered out of band from `threshold`
    /// holders per §4.7/§6.
    pub async fn get_file(&self, file_name: &str, key_shares: &[(u8, Vec<u8>)]) -> FileZapResult<Vec<u8>> {
        let manifest = self.manifests.get(file_name).await?;
        let key = self.key_shares.recombine(file_name, key_shares)?;
        let local_peer = self.handle.local_peer_id();

        let owner: Option<PeerId> = manifest.owner.parse().ok().filter(|p| *p != local_peer);

        let mut ciphertext = Vec::new();
        for hash in &manifest.chunk_hashes {
            let framed = match self.chunk_store.get(hash) {
                Some(bytes) => bytes,
                None => {
                    let owner = owner.ok_or_else(|| FileZapError::UnknownKey(format!("chunk {hash} not held locally")))?;
                    let bytes = self.handle.download_chunk(owner, hash.clone()).await?;
                    log_chunk_operation("downloaded", hash, file_name);
                    let _ = self.chunk_store.store(hash.clone(), bytes.clone());
                    bytes
                }
            };
            let outcome = self.validator.validate(hash, &framed, owner.unwrap_or(local_peer));
            if outcome != crate::chunk_validator::ValidationOutcome::Success {
                return Err(FileZapError::HashMismatch {
                    expected: hash.clone(),
                    actual: format!("{outcome:?}"),
                });
            }
            ciphertext.extend_from_slice(crypto::chunk_payload(&framed)?);
        }

        crypto::aes_decrypt(&key, &ciphertext)
    }

    /// Fetch the manifest, propose removal of the file via quorum vote (C8),
    /// and penalize the owner's reputation (§4.9), used when a client or
    /// operator flags a manifest as bad (malicious content, spam, etc.).
    pub async fn report_bad_file(&self, file_name: &str, reason: String) -> FileZapResult<()> {
        let manifest = self.manifests.get(file_name).await?;
        let vote_id = format!("remove-file-{file_name}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        self.quorum
            .propose(vote_id.clone(), VoteType::RemoveFile, file_name.to_string(), self.handle.local_peer_id().to_string())?;
        if let Ok(owner) = manifest.owner.parse::<PeerId>() {
            self.reputation.update(owner, REPORTED_BAD_FILE_OWNER_PENALTY);
        }
        log_quorum_event("propose_remove_file", &vote_id, &format!("{file_name}: {reason}"));
        Ok(())
    }

    /// Apply an immediate reputation penalty, propose a `RemovePeer` vote for
    /// a peer reported as misbehaving, and close any open connection to it.
    pub async fn report_bad_peer(&self, peer: PeerId, reason: String) -> FileZapResult<()> {
        self.reputation.update(peer, REPORTED_BAD_PEER_PENALTY);
        let vote_id = format!("remove-peer-{peer}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        self.quorum
            .propose(vote_id.clone(), VoteType::RemovePeer, peer.to_string(), self.handle.local_peer_id().to_string())?;
        log_quorum_event("propose_remove_peer", &vote_id, &reason);
        self.handle.close_peer(peer).await?;
        Ok(())
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.handle.local_peer_id()
    }

    pub fn connected_peer_count(&self) -> usize {
        self.handle.connected_peers().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_announcement_round_trips_through_json() {
        let mut rng = rsa::rand_core::OsRng;
        let priv_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        let der = pub_key.to_public_key_der().unwrap().as_bytes().to_vec();
        let msg = PeerTopicMessage::KeyAnnouncement(KeyAnnouncement {
            peer_id: PeerId::random().to_string(),
            public_key_der: der.clone(),
        });
        let bytes = serde_json::to_vec(&msg).unwrap();
        let back: PeerTopicMessage = serde_json::from_slice(&bytes).unwrap();
        match back {
            PeerTopicMessage::KeyAnnouncement(a) => assert_eq!(a.public_key_der, der),
            _ => panic!("expected KeyAnnouncement"),
        }
    }

    #[test]
    fn gossip_message_round_trips_through_json() {
        let msg = PeerTopicMessage::Gossip { peers: vec![] };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let back: PeerTopicMessage = serde_json::from_slice(&bytes).unwrap();
        assert!(matches!(back, PeerTopicMessage::Gossip { .. }));
    }
}
