// Swarm construction: the combined libp2p behaviour (Kademlia DHT +
// gossipsub) and the builder boilerplate that wires TCP/noise/yamux
// transport underneath it.
//
// Kademlia backs the manifest registry's DHT contract; gossipsub carries
// the four pubsub topics (peer gossip, manifest announcements, quorum
// votes, storage pushes).

use std::time::Duration;

use libp2p::gossipsub;
use libp2p::kad::{store::MemoryStore, Behaviour as Kademlia, Event as KademliaEvent};
use libp2p::request_response;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{noise, tcp, yamux, Swarm, SwarmBuilder};

use crate::chunk_transfer::{ChunkCodec, ChunkProtocol};
use crate::config::Config;
use crate::error::{FileZapError, FileZapResult};

pub const TOPIC_PEERS: &str = "filezap-peers";
pub const TOPIC_MANIFESTS: &str = "filezap-manifests";
pub const TOPIC_QUORUM: &str = "filezap-quorum";
pub const TOPIC_STORAGE: &str = "/filezap/storage/1.0.0";

pub type ChunkBehaviour = request_response::Behaviour<ChunkCodec>;

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "MyBehaviourEvent")]
pub struct MyBehaviour {
    pub kad: Kademlia<MemoryStore>,
    pub gossipsub: gossipsub::Behaviour,
    pub chunk: ChunkBehaviour,
}

#[derive(Debug)]
pub enum MyBehaviourEvent {
    Kad(KademliaEvent),
    Gossipsub(gossipsub::Event),
    Chunk(request_response::Event<String, crate::chunk_transfer::ChunkResponse>),
}

impl From<KademliaEvent> for MyBehaviourEvent {
    fn from(event: KademliaEvent) -> Self {
        MyBehaviourEvent::Kad(event)
    }
}

impl From<gossipsub::Event> for MyBehaviourEvent {
    fn from(event: gossipsub::Event) -> Self {
        MyBehaviourEvent::Gossipsub(event)
    }
}

impl From<request_response::Event<String, crate::chunk_transfer::ChunkResponse>> for MyBehaviourEvent {
    fn from(event: request_response::Event<String, crate::chunk_transfer::ChunkResponse>) -> Self {
        MyBehaviourEvent::Chunk(event)
    }
}

/// Build a swarm with a fresh ed25519 identity, TCP+noise+yamux transport,
/// and the combined Kademlia+gossipsub behaviour, subscribed to all four
/// FileZap pubsub topics.
pub fn build_swarm(config: &Config) -> FileZapResult<Swarm<MyBehaviour>> {
    let mut swarm = SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)
        .map_err(|e| FileZapError::Generic(format!("transport setup failed: {e}")))?
        .with_behaviour(|key| {
            let peer_id = key.public().to_peer_id();

            let store = MemoryStore::new(peer_id);
            let mut kad = Kademlia::new(peer_id, store);
            kad.set_mode(Some(libp2p::kad::Mode::Server));

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(1))
                .validation_mode(gossipsub::ValidationMode::Strict)
                .build()
                .expect("valid gossipsub config");
            let gossipsub = gossipsub::Behaviour::new(
                gossipsub::MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .expect("valid gossipsub behaviour");

            let chunk = request_response::Behaviour::new(
                [(ChunkProtocol, request_response::ProtocolSupport::Full)],
                request_response::Config::default(),
            );

            MyBehaviour { kad, gossipsub, chunk }
        })
        .map_err(|e| FileZapError::Generic(format!("behaviour setup failed: {e}")))?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(config.connection_timeout()))
        .build();

    for topic_name in [TOPIC_PEERS, TOPIC_MANIFESTS, TOPIC_QUORUM, TOPIC_STORAGE] {
        let topic = gossipsub::IdentTopic::new(topic_name);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| FileZapError::Generic(format!("subscribe to {topic_name} failed: {e}")))?;
    }

    let listen_addr = format!("/ip4/0.0.0.0/tcp/{}", config.network.listen_port)
        .parse()
        .map_err(|e| FileZapError::Config(format!("invalid listen address: {e}")))?;
    swarm
        .listen_on(listen_addr)
        .map_err(|e| FileZapError::Generic(format!("listen failed: {e}")))?;

    Ok(swarm)
}
