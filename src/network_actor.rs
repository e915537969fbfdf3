// Network Actor: isolates the libp2p `Swarm` (not `Send`) on its own
// thread behind a `tokio::task::LocalSet`, and exposes it to the rest of
// the process through a clone-able, `Send + Sync` handle that implements
// the `Dht`/`Pubsub`/`PeerTransport` contracts the core components depend
// on. Every operation is a message with a `oneshot` response channel, so
// callers on other threads never touch the swarm directly.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::StreamExt;
use libp2p::gossipsub;
use libp2p::gossipsub::IdentTopic;
use libp2p::kad::{self, Event as KademliaEvent, GetRecordOk, QueryResult, RecordKey};
use libp2p::request_response::{self, OutboundRequestId};
use libp2p::{PeerId, Swarm};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::chunk_store::ChunkStore;
use crate::chunk_transfer::ChunkResponse;
use crate::config::Config;
use crate::error::{FileZapError, FileZapResult};
use crate::network::{self, MyBehaviour, MyBehaviourEvent};
use crate::traits::{Dht, PeerTransport, Pubsub};

const PENDING_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

type FileZapOneshot<T> = oneshot::Sender<FileZapResult<T>>;

enum NetworkMessage {
    PutRecord { key: String, value: Vec<u8>, response_tx: FileZapOneshot<()> },
    GetRecord { key: String, response_tx: FileZapOneshot<Vec<Vec<u8>>> },
    FindProviders { key: String, response_tx: FileZapOneshot<Vec<PeerId>> },
    ClosestPeers { key: String, response_tx: FileZapOneshot<Vec<PeerId>> },
    StartProviding { key: String, response_tx: FileZapOneshot<()> },
    Publish { topic: String, data: Vec<u8>, response_tx: FileZapOneshot<()> },
    DownloadChunk { peer: PeerId, hash: String, response_tx: FileZapOneshot<Vec<u8>> },
    ClosePeer { peer: PeerId, response_tx: FileZapOneshot<()> },
    Shutdown,
}

/// A gossipsub message received on one of the four FileZap pubsub topics,
/// forwarded to whatever in-process consumer is listening (see
/// `network_engine.rs`'s dispatch loop).
pub struct InboundMessage {
    pub topic: String,
    pub data: Vec<u8>,
    pub source: Option<PeerId>,
}

/// A clone-able, `Send + Sync` handle to the swarm-owning actor thread.
#[derive(Clone)]
pub struct NetworkHandle {
    tx: mpsc::UnboundedSender<NetworkMessage>,
    local_peer_id: PeerId,
    connected_peers: Arc<RwLock<Vec<PeerId>>>,
}

impl NetworkHandle {
    /// Spawn the actor on a dedicated OS thread running its own
    /// single-threaded Tokio runtime (required because `Swarm` is `!Send`),
    /// and block until the swarm reports its listen address and peer id.
    /// Returns the handle plus the receiving end of every gossipsub message
    /// the swarm observes on a subscribed topic.
    pub fn spawn(
        config: Config,
        chunk_store: Arc<ChunkStore>,
    ) -> FileZapResult<(Self, mpsc::UnboundedReceiver<InboundMessage>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connected_peers = Arc::new(RwLock::new(Vec::new()));
        let connected_peers_for_actor = connected_peers.clone();

        std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = ready_tx.send(Err(FileZapError::Generic(format!("actor runtime failed: {e}"))));
                    return;
                }
            };
            let local = tokio::task::LocalSet::new();
            local.block_on(&runtime, async move {
                let swarm = match network::build_swarm(&config) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let local_peer_id = *swarm.local_peer_id();
                let _ = ready_tx.send(Ok(local_peer_id));

                let actor = NetworkActor {
                    swarm,
                    rx,
                    connected_peers: connected_peers_for_actor,
                    inbound_tx,
                    chunk_store,
                    pending_gets: HashMap::new(),
                    pending_puts: HashMap::new(),
                    pending_providers: HashMap::new(),
                    pending_closest: HashMap::new(),
                    pending_provides: HashMap::new(),
                    pending_chunk_requests: HashMap::new(),
                };
                actor.run().await;
            });
        });

        let local_peer_id = ready_rx
            .recv()
            .map_err(|_| FileZapError::Generic("network actor died before starting".to_string()))??;

        Ok((Self { tx, local_peer_id, connected_peers }, inbound_rx))
    }

    fn call<T>(&self, build: impl FnOnce(FileZapOneshot<T>) -> NetworkMessage) -> BoxFuture<'static, FileZapResult<T>>
    where
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        let msg = build(response_tx);
        let send_result = self.tx.send(msg);
        Box::pin(async move {
            send_result.map_err(|_| FileZapError::ConnectionClosed("network actor gone".to_string()))?;
            response_rx
                .await
                .map_err(|_| FileZapError::ConnectionClosed("network actor dropped response".to_string()))?
        })
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(NetworkMessage::Shutdown);
    }

    /// Fetch a chunk by hash from `peer` over the `/filezap/chunk/1.0.0`
    /// request/response protocol.
    pub fn download_chunk(&self, peer: PeerId, hash: String) -> BoxFuture<'static, FileZapResult<Vec<u8>>> {
        self.call(|response_tx| NetworkMessage::DownloadChunk { peer, hash, response_tx })
    }
}

impl Dht for NetworkHandle {
    fn put(&self, key: String, value: Vec<u8>) -> BoxFuture<'_, FileZapResult<()>> {
        self.call(|response_tx| NetworkMessage::PutRecord { key, value, response_tx })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, FileZapResult<Vec<Vec<u8>>>> {
        let key = key.to_string();
        self.call(|response_tx| NetworkMessage::GetRecord { key, response_tx })
    }

    fn find_providers<'a>(&'a self, key: &'a str) -> BoxFuture<'a, FileZapResult<Vec<PeerId>>> {
        let key = key.to_string();
        self.call(|response_tx| NetworkMessage::FindProviders { key, response_tx })
    }

    fn closest_peers<'a>(&'a self, key: &'a str) -> BoxFuture<'a, FileZapResult<Vec<PeerId>>> {
        let key = key.to_string();
        self.call(|response_tx| NetworkMessage::ClosestPeers { key, response_tx })
    }

    fn provide(&self, key: String) -> BoxFuture<'_, FileZapResult<()>> {
        self.call(|response_tx| NetworkMessage::StartProviding { key, response_tx })
    }
}

impl Pubsub for NetworkHandle {
    fn publish(&self, topic: &str, data: Vec<u8>) -> BoxFuture<'_, FileZapResult<()>> {
        let topic = topic.to_string();
        self.call(|response_tx| NetworkMessage::Publish { topic, data, response_tx })
    }
}

impl PeerTransport for NetworkHandle {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.connected_peers.read().unwrap().clone()
    }

    fn close_peer(&self, peer: PeerId) -> BoxFuture<'_, FileZapResult<()>> {
        self.call(move |response_tx| NetworkMessage::ClosePeer { peer, response_tx })
    }
}

struct NetworkActor {
    swarm: Swarm<MyBehaviour>,
    rx: mpsc::UnboundedReceiver<NetworkMessage>,
    connected_peers: Arc<RwLock<Vec<PeerId>>>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    chunk_store: Arc<ChunkStore>,
    pending_gets: HashMap<RecordKey, (FileZapOneshot<Vec<Vec<u8>>>, Vec<Vec<u8>>, Instant)>,
    pending_puts: HashMap<RecordKey, (FileZapOneshot<()>, Instant)>,
    pending_providers: HashMap<RecordKey, (FileZapOneshot<Vec<PeerId>>, Vec<PeerId>, Instant)>,
    pending_closest: HashMap<RecordKey, (FileZapOneshot<Vec<PeerId>>, Instant)>,
    pending_provides: HashMap<RecordKey, (FileZapOneshot<()>, Instant)>,
    pending_chunk_requests: HashMap<OutboundRequestId, FileZapOneshot<Vec<u8>>>,
}

impl NetworkActor {
    async fn run(mut self) {
        let mut timeout_check = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                message = self.rx.recv() => {
                    match message {
                        Some(NetworkMessage::Shutdown) | None => {
                            info!("network actor shutting down");
                            break;
                        }
                        Some(msg) => self.handle_message(msg),
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }
                _ = timeout_check.tick() => {
                    self.expire_stale_requests();
                }
            }
        }
    }

    fn handle_message(&mut self, message: NetworkMessage) {
        match message {
            NetworkMessage::PutRecord { key, value, response_tx } => {
                let record_key = RecordKey::new(&key);
                let record = kad::Record::new(record_key.clone(), value);
                match self.swarm.behaviour_mut().kad.put_record(record, kad::Quorum::One) {
                    Ok(_) => {
                        self.pending_puts.insert(record_key, (response_tx, Instant::now()));
                    }
                    Err(e) => {
                        let _ = response_tx.send(Err(FileZapError::Generic(format!("put_record failed: {e}"))));
                    }
                }
            }
            NetworkMessage::GetRecord { key, response_tx } => {
                let record_key = RecordKey::new(&key);
                self.swarm.behaviour_mut().kad.get_record(record_key.clone());
                self.pending_gets.insert(record_key, (response_tx, Vec::new(), Instant::now()));
            }
            NetworkMessage::FindProviders { key, response_tx } => {
                let record_key = RecordKey::new(&key);
                self.swarm.behaviour_mut().kad.get_providers(record_key.clone());
                self.pending_providers.insert(record_key, (response_tx, Vec::new(), Instant::now()));
            }
            NetworkMessage::ClosestPeers { key, response_tx } => {
                let record_key = RecordKey::new(&key);
                self.swarm.behaviour_mut().kad.get_closest_peers(key.into_bytes());
                self.pending_closest.insert(record_key, (response_tx, Instant::now()));
            }
            NetworkMessage::StartProviding { key, response_tx } => {
                let record_key = RecordKey::new(&key);
                match self.swarm.behaviour_mut().kad.start_providing(record_key.clone()) {
                    Ok(_) => {
                        self.pending_provides.insert(record_key, (response_tx, Instant::now()));
                    }
                    Err(e) => {
                        let _ = response_tx.send(Err(FileZapError::Generic(format!("start_providing failed: {e}"))));
                    }
                }
            }
            NetworkMessage::Publish { topic, data, response_tx } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(IdentTopic::new(topic), data)
                    .map(|_| ())
                    .map_err(|e| FileZapError::Generic(format!("publish failed: {e}")));
                let _ = response_tx.send(result);
            }
            NetworkMessage::DownloadChunk { peer, hash, response_tx } => {
                let request_id = self.swarm.behaviour_mut().chunk.send_request(&peer, hash);
                self.pending_chunk_requests.insert(request_id, response_tx);
            }
            NetworkMessage::ClosePeer { peer, response_tx } => {
                let _ = self.swarm.disconnect_peer_id(peer);
                self.connected_peers.write().unwrap().retain(|p| *p != peer);
                let _ = response_tx.send(Ok(()));
            }
            NetworkMessage::Shutdown => {}
        }
    }

    fn handle_swarm_event(&mut self, event: libp2p::swarm::SwarmEvent<MyBehaviourEvent>) {
        match event {
            libp2p::swarm::SwarmEvent::NewListenAddr { address, .. } => {
                info!("listening on {address}");
            }
            libp2p::swarm::SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                self.connected_peers.write().unwrap().push(peer_id);
            }
            libp2p::swarm::SwarmEvent::ConnectionClosed { peer_id, .. } => {
                self.connected_peers.write().unwrap().retain(|p| *p != peer_id);
            }
            libp2p::swarm::SwarmEvent::Behaviour(MyBehaviourEvent::Kad(kad_event)) => {
                self.handle_kad_event(kad_event);
            }
            libp2p::swarm::SwarmEvent::Behaviour(MyBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                let _ = self.inbound_tx.send(InboundMessage {
                    topic: message.topic.to_string(),
                    data: message.data,
                    source: Some(propagation_source),
                });
            }
            libp2p::swarm::SwarmEvent::Behaviour(MyBehaviourEvent::Gossipsub(event)) => {
                debug!("gossipsub event: {event:?}");
            }
            libp2p::swarm::SwarmEvent::Behaviour(MyBehaviourEvent::Chunk(event)) => {
                self.handle_chunk_event(event);
            }
            _ => {}
        }
    }

    /// Serve inbound `/filezap/chunk/1.0.0` requests from the local chunk
    /// store, and resolve outbound requests' oneshot channels as their
    /// responses arrive.
    fn handle_chunk_event(&mut self, event: request_response::Event<String, ChunkResponse>) {
        match event {
            request_response::Event::Message {
                message: request_response::Message::Request { request, channel, .. },
                ..
            } => {
                let response: ChunkResponse = match self.chunk_store.get(&request) {
                    Some(bytes) => Ok(bytes),
                    None => Err(format!("chunk {request} not held locally")),
                };
                let _ = self.swarm.behaviour_mut().chunk.send_response(channel, response);
            }
            request_response::Event::Message {
                message: request_response::Message::Response { request_id, response },
                ..
            } => {
                if let Some(response_tx) = self.pending_chunk_requests.remove(&request_id) {
                    let result = response.map_err(FileZapError::ConnectionClosed);
                    let _ = response_tx.send(result);
                }
            }
            request_response::Event::OutboundFailure { request_id, error, .. } => {
                if let Some(response_tx) = self.pending_chunk_requests.remove(&request_id) {
                    let _ = response_tx.send(Err(FileZapError::Generic(format!("chunk request failed: {error}"))));
                }
            }
            request_response::Event::InboundFailure { error, .. } => {
                warn!("inbound chunk request failed: {error}");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    fn handle_kad_event(&mut self, event: KademliaEvent) {
        let KademliaEvent::OutboundQueryProgressed { result, .. } = event else { return };
        match result {
            QueryResult::GetRecord(Ok(GetRecordOk::FoundRecord(peer_record))) => {
                let key = peer_record.record.key.clone();
                if let Some((_, values, _)) = self.pending_gets.get_mut(&key) {
                    values.push(peer_record.record.value.clone());
                }
            }
            QueryResult::GetRecord(Ok(GetRecordOk::FinishedWithNoAdditionalRecord { .. })) | QueryResult::GetRecord(Err(_)) => {
                if let Some(key) = find_matching_key(&self.pending_gets, &result) {
                    if let Some((response_tx, values, _)) = self.pending_gets.remove(&key) {
                        let _ = response_tx.send(Ok(values));
                    }
                }
            }
            QueryResult::PutRecord(Ok(ok)) => {
                if let Some((response_tx, _)) = self.pending_puts.remove(&ok.key) {
                    let _ = response_tx.send(Ok(()));
                }
            }
            QueryResult::PutRecord(Err(e)) => {
                warn!("put_record failed: {e:?}");
                for (_, (response_tx, _)) in self.pending_puts.drain() {
                    let _ = response_tx.send(Err(FileZapError::Generic(format!("put_record failed: {e:?}"))));
                }
            }
            QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders { providers, .. })) => {
                let keys: Vec<RecordKey> = self.pending_providers.keys().cloned().collect();
                if let Some(key) = keys.into_iter().next() {
                    if let Some((_, found, _)) = self.pending_providers.get_mut(&key) {
                        found.extend(providers);
                    }
                }
            }
            QueryResult::GetProviders(Ok(kad::GetProvidersOk::FinishedWithNoAdditionalRecord { .. })) | QueryResult::GetProviders(Err(_)) => {
                let keys: Vec<RecordKey> = self.pending_providers.keys().cloned().collect();
                if let Some(key) = keys.into_iter().next() {
                    if let Some((response_tx, found, _)) = self.pending_providers.remove(&key) {
                        let _ = response_tx.send(Ok(found));
                    }
                }
            }
            QueryResult::GetClosestPeers(result) => {
                let keys: Vec<RecordKey> = self.pending_closest.keys().cloned().collect();
                if let Some(key) = keys.into_iter().next() {
                    if let Some((response_tx, _)) = self.pending_closest.remove(&key) {
                        let peers = match result {
                            Ok(ok) => ok.peers.into_iter().map(|p| p.peer_id).collect(),
                            Err(e) => e.peers.into_iter().map(|p| p.peer_id).collect(),
                        };
                        let _ = response_tx.send(Ok(peers));
                    }
                }
            }
            QueryResult::StartProviding(result) => {
                let keys: Vec<RecordKey> = self.pending_provides.keys().cloned().collect();
                if let Some(key) = keys.into_iter().next() {
                    if let Some((response_tx, _)) = self.pending_provides.remove(&key) {
                        let outcome = result
                            .map(|_| ())
                            .map_err(|e| FileZapError::Generic(format!("start_providing failed: {e:?}")));
                        let _ = response_tx.send(outcome);
                    }
                }
            }
            _ => {}
        }
    }

    fn expire_stale_requests(&mut self) {
        let now = Instant::now();
        self.pending_gets.retain(|_, (_, _, started)| now.duration_since(*started) <= PENDING_OPERATION_TIMEOUT);
        self.pending_puts.retain(|_, (_, started)| now.duration_since(*started) <= PENDING_OPERATION_TIMEOUT);
        self.pending_providers.retain(|_, (_, _, started)| now.duration_since(*started) <= PENDING_OPERATION_TIMEOUT);
        self.pending_closest.retain(|_, (_, started)| now.duration_since(*started) <= PENDING_OPERATION_TIMEOUT);
        self.pending_provides.retain(|_, (_, started)| now.duration_since(*started) <= PENDING_OPERATION_TIMEOUT);
    }
}

/// Kademlia's query-progressed events for GetRecord don't carry the key on
/// every variant; since only one get-record query is ever outstanding per
/// key we track, pick the (at most one) pending entry that matches by being
/// the sole candidate left to finish. With a single query in flight this
/// resolves unambiguously; concurrent identical-key queries are coalesced
/// by the caller side (`ManifestRegistry`/`KeyShareManager` dedupe by key).
fn find_matching_key(
    pending: &HashMap<RecordKey, (FileZapOneshot<Vec<Vec<u8>>>, Vec<Vec<u8>>, Instant)>,
    _result: &QueryResult,
) -> Option<RecordKey> {
    pending.keys().next().cloned()
}
