// Quorum Vote Engine (C8): weighted-majority governance votes broadcast
// over the `filezap-quorum` pubsub topic. Storage nodes carry more weight
// than ordinary peers; a vote decides once accumulated weight crosses the
// approval threshold or its deadline passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{FileZapError, FileZapResult};
use crate::manifest_registry::ManifestRegistry;
use crate::peer_registry::PeerRegistry;
use crate::reputation::ReputationLedger;
use crate::traits::RemovalProposer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteType {
    RemovePeer = 0,
    RemoveFile = 1,
    UpdateRules = 2,
    ReleaseKey = 3,
}

impl VoteType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(VoteType::RemovePeer),
            1 => Some(VoteType::RemoveFile),
            2 => Some(VoteType::UpdateRules),
            3 => Some(VoteType::ReleaseKey),
            _ => None,
        }
    }
}

/// A vote proposal, broadcast on `filezap-quorum`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub vote_id: String,
    pub vote_type: u8,
    pub target: String,
    pub proposer: String,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// A single peer's response to an in-flight vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub vote_id: String,
    pub voter: String,
    pub approve: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Pending,
    Approved,
    Rejected,
    TimedOut,
}

struct VoteState {
    vote: Vote,
    vote_type: VoteType,
    responses: HashMap<PeerId, bool>,
    deadline: Instant,
    complete: bool,
}

struct Inner {
    votes: HashMap<String, VoteState>,
}

pub struct QuorumEngine {
    inner: Mutex<Inner>,
    peer_registry: Arc<PeerRegistry>,
    reputation: Arc<ReputationLedger>,
    manifests: Arc<ManifestRegistry>,
    min_quorum_size: usize,
    approval_threshold_pct: u32,
    base_weight: u32,
    storage_node_weight: u32,
    voting_window: Duration,
    release_key_window: Duration,
    peer_banned_tx: mpsc::UnboundedSender<PeerId>,
    file_removed_tx: mpsc::UnboundedSender<String>,
}

pub struct QuorumChannels {
    pub peer_banned: mpsc::UnboundedReceiver<PeerId>,
    pub file_removed: mpsc::UnboundedReceiver<String>,
}

impl QuorumEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer_registry: Arc<PeerRegistry>,
        reputation: Arc<ReputationLedger>,
        manifests: Arc<ManifestRegistry>,
        min_quorum_size: usize,
        approval_threshold_pct: u32,
        base_weight: u32,
        storage_node_weight: u32,
        voting_window: Duration,
        release_key_window: Duration,
    ) -> (Self, QuorumChannels) {
        let (peer_banned_tx, peer_banned) = mpsc::unbounded_channel();
        let (file_removed_tx, file_removed) = mpsc::unbounded_channel();
        (
            Self {
                inner: Mutex::new(Inner { votes: HashMap::new() }),
                peer_registry,
                reputation,
                manifests,
                min_quorum_size,
                approval_threshold_pct,
                base_weight,
                storage_node_weight,
                voting_window,
                release_key_window,
                peer_banned_tx,
                file_removed_tx,
            },
            QuorumChannels { peer_banned, file_removed },
        )
    }

    fn window_for(&self, vote_type: VoteType) -> Duration {
        match vote_type {
            VoteType::ReleaseKey => self.release_key_window,
            _ => self.voting_window,
        }
    }

    /// Propose a new vote. Fails if fewer than `min_quorum_size` peers are known.
    pub fn propose(&self, vote_id: String, vote_type: VoteType, target: String, proposer: String) -> FileZapResult<Vote> {
        let known_peers = self.peer_registry.len();
        if known_peers < self.min_quorum_size {
            return Err(FileZapError::InsufficientPeers {
                have: known_peers,
                need: self.min_quorum_size,
            });
        }

        let now = Utc::now();
        let window = self.window_for(vote_type);
        let vote = Vote {
            vote_id: vote_id.clone(),
            vote_type: vote_type.as_u8(),
            target,
            proposer,
            created_at: now,
            deadline: now + chrono::Duration::from_std(window).unwrap_or_default(),
        };

        self.inner.lock().unwrap().votes.insert(
            vote_id,
            VoteState {
                vote: vote.clone(),
                vote_type,
                responses: HashMap::new(),
                deadline: Instant::now() + window,
                complete: false,
            },
        );
        Ok(vote)
    }

    fn weight_of(&self, peer: &PeerId) -> u32 {
        if self.peer_registry.is_storage_node(peer) {
            self.storage_node_weight
        } else {
            self.base_weight
        }
    }

    /// Record a peer's response to an in-flight vote. Returns the vote's
    /// outcome if this response decided it.
    pub fn record_vote(&self, response: VoteResponse) -> FileZapResult<VoteOutcome> {
        let voter: PeerId = response
            .voter
            .parse()
            .map_err(|_| FileZapError::InvalidManifest(format!("bad peer id {}", response.voter)))?;

        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .votes
            .get_mut(&response.vote_id)
            .ok_or_else(|| FileZapError::UnknownKey(response.vote_id.clone()))?;

        if state.complete {
            return Err(FileZapError::VoteExpired(response.vote_id));
        }
        if Instant::now() > state.deadline {
            state.complete = true;
            return Err(FileZapError::VoteTimeout(response.vote_id));
        }

        state.responses.insert(voter, response.approve);
        let outcome = self.tally(state);
        if outcome != VoteOutcome::Pending {
            state.complete = true;
            let vote = state.vote.clone();
            drop(inner);
            self.apply_outcome(&vote, &outcome);
        }
        Ok(outcome)
    }

    /// A session is decidable once the accumulated weight of responses
    /// reaches `ceil(n_peers * base_weight * threshold_pct / 100)` (§4.8);
    /// below that, the outcome stays `Pending` regardless of the running
    /// approval percentage, so a single early vote can't decide a session
    /// that hasn't heard from enough of the network yet.
    fn tally(&self, state: &VoteState) -> VoteOutcome {
        let mut approve_weight = 0u32;
        let mut total_weight = 0u32;
        for (peer, approve) in &state.responses {
            let w = self.weight_of(peer);
            total_weight += w;
            if *approve {
                approve_weight += w;
            }
        }
        if total_weight == 0 {
            return VoteOutcome::Pending;
        }
        let n_peers = self.peer_registry.len() as u64;
        let decidable_weight =
            (n_peers * self.base_weight as u64 * self.approval_threshold_pct as u64).div_ceil(100);
        if (total_weight as u64) < decidable_weight {
            return VoteOutcome::Pending;
        }
        let pct = (approve_weight as u64 * 100 / total_weight as u64) as u32;
        if pct >= self.approval_threshold_pct {
            VoteOutcome::Approved
        } else {
            VoteOutcome::Rejected
        }
    }

    fn apply_outcome(&self, vote: &Vote, outcome: &VoteOutcome) {
        if *outcome != VoteOutcome::Approved {
            return;
        }
        let Some(vote_type) = VoteType::from_u8(vote.vote_type) else { return };
        match vote_type {
            VoteType::RemovePeer => {
                if let Ok(peer) = vote.target.parse::<PeerId>() {
                    self.peer_registry.remove(&peer);
                    self.reputation.forget(&peer);
                    let _ = self.peer_banned_tx.send(peer);
                    info!("quorum approved removal of peer {peer}");
                }
            }
            VoteType::RemoveFile => {
                self.manifests.remove(&vote.target);
                let _ = self.file_removed_tx.send(vote.target.clone());
                info!("quorum approved removal of file {}", vote.target);
            }
            VoteType::UpdateRules | VoteType::ReleaseKey => {
                debug!("quorum approved {:?} for {}", vote_type, vote.target);
            }
        }
    }

    /// Sweep votes whose deadline has passed without reaching a decision,
    /// marking them timed out. Run periodically (every `cleanup_interval_secs`).
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        for state in inner.votes.values_mut() {
            if !state.complete && now > state.deadline {
                state.complete = true;
            }
        }
    }

    pub fn outcome_of(&self, vote_id: &str) -> Option<VoteOutcome> {
        let inner = self.inner.lock().unwrap();
        let state = inner.votes.get(vote_id)?;
        Some(self.tally(state))
    }

    /// Local auto-vote heuristic: approve a `RemovePeer` proposal if this
    /// node's own reputation ledger already has the target at or below the
    /// given ban threshold.
    pub fn validate_peer_removal(&self, target: &PeerId, auto_ban_threshold: i32) -> bool {
        self.reputation.score(target) <= auto_ban_threshold
    }

    /// Local auto-vote heuristic: approve a `RemoveFile` proposal only if
    /// the file is not locally known (already considered gone) or is
    /// explicitly flagged by the caller.
    pub fn validate_file_removal(&self, target: &str, locally_flagged_bad: bool) -> bool {
        locally_flagged_bad || !self.manifests.contains(target)
    }

    /// `UpdateRules`/`ReleaseKey` proposals have no generic local heuristic;
    /// callers supply their own predicate (config-rule compatibility, or
    /// "has this client already paid" for release-key requests).
    pub fn validate_with<F: FnOnce() -> bool>(predicate: F) -> bool {
        predicate()
    }
}

impl RemovalProposer for QuorumEngine {
    fn propose_remove_peer(&self, peer: PeerId, reason: String) -> FileZapResult<()> {
        let vote_id = format!("auto-remove-{peer}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        self.propose(vote_id, VoteType::RemovePeer, peer.to_string(), "reputation-auto".to_string())
            .map(|_| ())
            .map_err(|e| {
                debug!("could not auto-propose removal of {peer} ({reason}): {e}");
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(min_quorum: usize) -> (QuorumEngine, QuorumChannels, Arc<PeerRegistry>) {
        let peer_registry = Arc::new(PeerRegistry::new(Duration::from_secs(300)));
        let reputation = Arc::new(ReputationLedger::new(-50));
        let manifests = Arc::new(ManifestRegistry::new(Arc::new(NoopDht)));
        let (engine, channels) = QuorumEngine::new(
            peer_registry.clone(),
            reputation,
            manifests,
            min_quorum,
            67,
            1,
            3,
            Duration::from_secs(30),
            Duration::from_secs(300),
        );
        (engine, channels, peer_registry)
    }

    struct NoopDht;
    impl crate::traits::Dht for NoopDht {
        fn put(&self, _key: String, _value: Vec<u8>) -> futures::future::BoxFuture<'_, FileZapResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn get<'a>(&'a self, _key: &'a str) -> futures::future::BoxFuture<'a, FileZapResult<Vec<Vec<u8>>>> {
            Box::pin(async { Ok(vec![]) })
        }
        fn find_providers<'a>(&'a self, _key: &'a str) -> futures::future::BoxFuture<'a, FileZapResult<Vec<PeerId>>> {
            Box::pin(async { Ok(vec![]) })
        }
        fn closest_peers<'a>(&'a self, _key: &'a str) -> futures::future::BoxFuture<'a, FileZapResult<Vec<PeerId>>> {
            Box::pin(async { Ok(vec![]) })
        }
        fn provide(&self, _key: String) -> futures::future::BoxFuture<'_, FileZapResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn propose_fails_with_too_few_known_peers() {
        let (engine, _channels, _reg) = engine(5);
        let err = engine
            .propose("v1".to_string(), VoteType::RemovePeer, PeerId::random().to_string(), "p".to_string())
            .unwrap_err();
        assert!(matches!(err, FileZapError::InsufficientPeers { .. }));
    }

    #[tokio::test]
    async fn majority_approval_bans_peer_and_signals_channel() {
        let (engine, mut channels, registry) = engine(2);
        let target = PeerId::random();
        registry.update(target);
        let voter_a = PeerId::random();
        let voter_b = PeerId::random();
        registry.announce_storage_node(voter_a);
        registry.update(voter_b);

        engine
            .propose("v1".to_string(), VoteType::RemovePeer, target.to_string(), "proposer".to_string())
            .unwrap();

        let outcome_a = engine
            .record_vote(VoteResponse { vote_id: "v1".into(), voter: voter_a.to_string(), approve: true })
            .unwrap();
        assert_eq!(outcome_a, VoteOutcome::Approved);

        let banned = channels.peer_banned.recv().await.unwrap();
        assert_eq!(banned, target);
    }

    #[test]
    fn a_second_response_from_the_same_voter_overwrites_the_first() {
        // Same-voter responses are deduplicated by last-writer-wins (§5), not
        // rejected as a duplicate: a voter changing its mind before the vote
        // decides must have its later response count, not its earlier one.
        let (engine, _channels, registry) = engine(2);
        let voter_a = PeerId::random();
        let voter_b = PeerId::random();
        registry.update(voter_a);
        registry.update(voter_b);
        engine
            .propose("v1".to_string(), VoteType::RemoveFile, "f.txt".to_string(), "p".to_string())
            .unwrap();

        let first = engine
            .record_vote(VoteResponse { vote_id: "v1".into(), voter: voter_a.to_string(), approve: true })
            .unwrap();
        assert_eq!(first, VoteOutcome::Pending);

        let overwritten = engine
            .record_vote(VoteResponse { vote_id: "v1".into(), voter: voter_a.to_string(), approve: false })
            .unwrap();
        assert_eq!(overwritten, VoteOutcome::Pending);

        let outcome = engine
            .record_vote(VoteResponse { vote_id: "v1".into(), voter: voter_b.to_string(), approve: true })
            .unwrap();
        assert_eq!(outcome, VoteOutcome::Rejected, "voter_a's overwritten `false` must count, not its original `true`");
    }
}
