// FileZap: an encrypted, quorum-governed P2P file store.
//
// Dependency order, leaves first: chunk storage and transfer (C1/C2), the
// chunk validator (C3), peer registry and reputation (C4/C5), the manifest
// registry (C6), key-share manager (C7), quorum vote engine (C8), and the
// network engine (C9) that composes all of the above behind four public
// operations: `add_file`, `get_file`, `report_bad_file`, `report_bad_peer`.

pub mod chunk_store;
pub mod chunk_transfer;
pub mod chunk_validator;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gf256;
pub mod key_share_manager;
pub mod logging;
pub mod manifest_registry;
pub mod network;
pub mod network_actor;
pub mod network_engine;
pub mod peer_registry;
pub mod quorum;
pub mod reputation;
pub mod resilience;
pub mod traits;

pub use chunk_store::ChunkStore;
pub use chunk_validator::{ChunkValidator, ValidationOutcome};
pub use config::Config;
pub use error::{EnhancedError, FileZapError, FileZapResult};
pub use key_share_manager::KeyShareManager;
pub use manifest_registry::{Manifest, ManifestRegistry};
pub use network_engine::NetworkEngine;
pub use peer_registry::PeerRegistry;
pub use quorum::{QuorumEngine, Vote, VoteResponse, VoteType};
pub use reputation::ReputationLedger;
