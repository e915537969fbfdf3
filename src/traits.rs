// Small interface traits that break the construction-order cycles between
// components that need to call each other: the chunk validator (C3) and
// reputation ledger (C5) both need to raise a `RemovePeer` proposal, but the
// quorum engine (C8) that decides proposals also reads reputation scores and
// checks manifest existence. Expressing the call in each direction as a
// trait lets `NetworkEngine` wire the concrete types together after
// construction instead of the components owning each other directly.

use futures::future::BoxFuture;
use libp2p::PeerId;

use crate::error::FileZapResult;

/// Something that accumulates reputation deltas for a peer (C5's public write side).
pub trait ReputationSink: Send + Sync {
    fn record(&self, peer: &PeerId, delta: i32);
}

/// Something that can raise a `RemovePeer` vote proposal (C8's public write side,
/// as seen by C3/C5).
pub trait RemovalProposer: Send + Sync {
    fn propose_remove_peer(&self, peer: PeerId, reason: String) -> FileZapResult<()>;
}

/// External collaborator contract (§6): a DHT keyed by `/filezap/<name>`.
/// `get` returns every record libp2p's Kademlia store currently holds for
/// `key`, not a single resolved value, so callers can apply the
/// max-`updated_at`-then-byte-lexicographic selection rule themselves.
///
/// Methods return a boxed future rather than using `async fn` so `Dht` stays
/// object-safe (`Arc<dyn Dht>`) without pulling in `async-trait`.
pub trait Dht: Send + Sync {
    fn put(&self, key: String, value: Vec<u8>) -> BoxFuture<'_, FileZapResult<()>>;
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, FileZapResult<Vec<Vec<u8>>>>;
    fn find_providers<'a>(&'a self, key: &'a str) -> BoxFuture<'a, FileZapResult<Vec<PeerId>>>;
    /// The peers Kademlia considers closest (by XOR distance) to `key`,
    /// nearest first (§3/§4.6's basis for replica-set self-responsibility).
    fn closest_peers<'a>(&'a self, key: &'a str) -> BoxFuture<'a, FileZapResult<Vec<PeerId>>>;
    /// Announce this node as a provider of `key` in Kademlia's provider records.
    fn provide(&self, key: String) -> BoxFuture<'_, FileZapResult<()>>;
}

/// External collaborator contract (§6): pubsub publish/subscribe over a
/// fixed set of topics (`filezap-peers`, `filezap-manifests`,
/// `filezap-quorum`, `/filezap/storage/1.0.0`).
pub trait Pubsub: Send + Sync {
    fn publish(&self, topic: &str, data: Vec<u8>) -> BoxFuture<'_, FileZapResult<()>>;
}

/// External collaborator contract (§6): the libp2p swarm's view of its own
/// identity and currently connected peers.
pub trait PeerTransport: Send + Sync {
    fn local_peer_id(&self) -> PeerId;
    fn connected_peers(&self) -> Vec<PeerId>;
    /// Tear down any open connection to `peer` (§6's `close_peer` transport contract).
    fn close_peer(&self, peer: PeerId) -> BoxFuture<'_, FileZapResult<()>>;
}

/// A handle to a value that is supplied after its holder is constructed.
/// `bind` may only be called once; later calls are ignored, matching the
/// fixed construction order in `network_engine.rs` (see DESIGN.md).
pub struct LateBound<T: ?Sized> {
    slot: std::sync::OnceLock<std::sync::Arc<T>>,
}

impl<T: ?Sized> LateBound<T> {
    pub fn new() -> Self {
        Self { slot: std::sync::OnceLock::new() }
    }

    pub fn bind(&self, value: std::sync::Arc<T>) {
        let _ = self.slot.set(value);
    }

    pub fn get(&self) -> Option<&std::sync::Arc<T>> {
        self.slot.get()
    }
}

impl<T: ?Sized> Default for LateBound<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;
    impl RemovalProposer for Probe {
        fn propose_remove_peer(&self, _peer: PeerId, _reason: String) -> FileZapResult<()> {
            Ok(())
        }
    }

    #[test]
    fn late_bound_is_empty_until_bound() {
        let slot: LateBound<dyn RemovalProposer> = LateBound::new();
        assert!(slot.get().is_none());
        slot.bind(std::sync::Arc::new(Probe));
        assert!(slot.get().is_some());
    }

    #[test]
    fn second_bind_is_ignored() {
        let slot: LateBound<dyn RemovalProposer> = LateBound::new();
        slot.bind(std::sync::Arc::new(Probe));
        slot.bind(std::sync::Arc::new(Probe));
        assert!(slot.get().is_some());
    }
}
