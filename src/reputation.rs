// Reputation Ledger (C5): a clamped per-peer score used by the chunk
// validator and the peer registry's background monitor to flag misbehaving
// or unreliable peers. Crossing the auto-ban threshold raises exactly one
// `RemovePeer` proposal per peer per time it crosses the line; rediscovering
// the peer (a fresh `PeerRegistry::update`) re-arms the trigger.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use libp2p::PeerId;
use tracing::warn;

use crate::error::FileZapResult;
use crate::traits::{LateBound, RemovalProposer, ReputationSink};

const MAX_SCORE: i32 = 100;

struct Inner {
    scores: HashMap<PeerId, i32>,
    already_proposed: HashSet<PeerId>,
}

/// Clamped `[i32::MIN, 100]` reputation score per peer, with a single-shot
/// auto-ban trigger at or below `auto_ban_threshold`.
pub struct ReputationLedger {
    inner: Mutex<Inner>,
    auto_ban_threshold: i32,
    remover: LateBound<dyn RemovalProposer>,
}

impl ReputationLedger {
    pub fn new(auto_ban_threshold: i32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                scores: HashMap::new(),
                already_proposed: HashSet::new(),
            }),
            auto_ban_threshold,
            remover: LateBound::new(),
        }
    }

    /// Wire in the quorum engine as the removal proposer. Must be called
    /// exactly once, after the quorum engine is constructed.
    pub fn bind_remover(&self, remover: Arc<dyn RemovalProposer>) {
        self.remover.bind(remover);
    }

    /// Apply a reputation delta, clamped to `[i32::MIN, 100]`. If the score
    /// crosses at or below the auto-ban threshold and a proposal for this
    /// peer hasn't already fired since its last rediscovery, raises a
    /// `RemovePeer` proposal.
    pub fn update(&self, peer: PeerId, delta: i32) -> i32 {
        let mut inner = self.inner.lock().unwrap();
        let score = inner.scores.entry(peer).or_insert(0);
        *score = score.saturating_add(delta).min(MAX_SCORE);
        let new_score = *score;

        if new_score <= self.auto_ban_threshold && !inner.already_proposed.contains(&peer) {
            inner.already_proposed.insert(peer);
            drop(inner);
            if let Some(remover) = self.remover.get() {
                if let Err(e) = remover.propose_remove_peer(
                    peer,
                    format!("reputation score {new_score} at or below threshold {}", self.auto_ban_threshold),
                ) {
                    warn!("failed to propose removal of {peer}: {e}");
                }
            }
            return new_score;
        }

        new_score
    }

    pub fn score(&self, peer: &PeerId) -> i32 {
        *self.inner.lock().unwrap().scores.get(peer).unwrap_or(&0)
    }

    /// Called when a peer is removed and may later rejoin, so a future
    /// breach of the threshold raises a fresh proposal instead of being
    /// silently dropped as a duplicate.
    pub fn forget(&self, peer: &PeerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.scores.remove(peer);
        inner.already_proposed.remove(peer);
    }
}

impl ReputationSink for ReputationLedger {
    fn record(&self, peer: &PeerId, delta: i32) {
        self.update(*peer, delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProposer {
        count: AtomicUsize,
    }

    impl RemovalProposer for CountingProposer {
        fn propose_remove_peer(&self, _peer: PeerId, _reason: String) -> FileZapResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn score_clamps_at_one_hundred() {
        let ledger = ReputationLedger::new(-50);
        let peer = PeerId::random();
        for _ in 0..20 {
            ledger.update(peer, 10);
        }
        assert_eq!(ledger.score(&peer), 100);
    }

    #[test]
    fn crossing_threshold_proposes_removal_exactly_once() {
        let ledger = ReputationLedger::new(-50);
        let proposer = Arc::new(CountingProposer { count: AtomicUsize::new(0) });
        ledger.bind_remover(proposer.clone());
        let peer = PeerId::random();

        ledger.update(peer, -60);
        ledger.update(peer, -5);
        assert_eq!(proposer.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forget_rearms_the_trigger() {
        let ledger = ReputationLedger::new(-50);
        let proposer = Arc::new(CountingProposer { count: AtomicUsize::new(0) });
        ledger.bind_remover(proposer.clone());
        let peer = PeerId::random();

        ledger.update(peer, -60);
        ledger.forget(&peer);
        ledger.update(peer, -60);
        assert_eq!(proposer.count.load(Ordering::SeqCst), 2);
    }
}
