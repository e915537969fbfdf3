use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::FileZapResult;

/// Top-level configuration for a FileZap node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub quorum: QuorumConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port the libp2p TCP transport listens on.
    pub listen_port: u16,
    /// Multiaddrs of bootstrap peers to dial at startup.
    pub bootstrap_peers: Vec<String>,
    /// Target number of nodes that should hold each manifest (default `replication_goal`).
    pub replication_factor: usize,
    /// Interval between replicator passes over locally held manifests.
    pub replication_interval_secs: u64,
    /// Interval between outbound peer-gossip broadcasts.
    pub gossip_interval_secs: u64,
    /// Interval between peer-registry reaper passes.
    pub reaper_interval_secs: u64,
    /// Age after which a peer record is dropped by the reaper.
    pub peer_ttl_secs: u64,
    /// Connection/DHT operation timeout.
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Largest single chunk the store will accept.
    pub max_chunk_size: usize,
    /// Largest aggregate size the store will hold before evicting.
    pub max_total_size: usize,
    /// Chunk size used when splitting a file for `add_file`.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Default number of key-share holders for a newly added file.
    pub default_holders: usize,
    /// Default reconstruction threshold (must be <= default_holders).
    pub default_threshold: usize,
    /// Window after which an un-recombined key-share request expires.
    pub share_request_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuorumConfig {
    /// Length of the voting window for ordinary votes.
    pub voting_window_secs: u64,
    /// Extended window for `ReleaseKey` votes.
    pub release_key_window_secs: u64,
    /// Minimum number of gossiped peers required to propose a vote.
    pub min_quorum_size: usize,
    /// Approval threshold, as a percentage of accumulated weight.
    pub approval_threshold_pct: u32,
    /// Weight given to an ordinary peer's vote.
    pub base_weight: u32,
    /// Weight given to a storage node's vote.
    pub storage_node_weight: u32,
    /// Interval between vote-session cleanup passes.
    pub cleanup_interval_secs: u64,
    /// Reputation at/below which a peer triggers an automatic `RemovePeer` proposal.
    pub auto_ban_threshold: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub structured: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                listen_port: 0,
                bootstrap_peers: Vec::new(),
                replication_factor: 3,
                replication_interval_secs: 5 * 60,
                gossip_interval_secs: 30,
                reaper_interval_secs: 60,
                peer_ttl_secs: 5 * 60,
                connection_timeout_secs: 30,
            },
            storage: StorageConfig {
                max_chunk_size: 100 * 1024 * 1024,
                max_total_size: 1024 * 1024 * 1024,
                chunk_size: 1024 * 1024,
            },
            crypto: CryptoConfig {
                default_holders: 5,
                default_threshold: 3,
                share_request_ttl_secs: 24 * 60 * 60,
            },
            quorum: QuorumConfig {
                voting_window_secs: 30,
                release_key_window_secs: 5 * 60,
                min_quorum_size: 5,
                approval_threshold_pct: 67,
                base_weight: 1,
                storage_node_weight: 3,
                cleanup_interval_secs: 60,
                auto_ban_threshold: -50,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                structured: true,
                log_file: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults if absent.
    pub fn load_or_default(config_path: Option<PathBuf>) -> FileZapResult<Self> {
        if let Some(path) = config_path {
            if path.exists() {
                let config_str = std::fs::read_to_string(&path)?;
                let config: Config = toml::from_str(&config_str)?;
                tracing::info!("loaded configuration from {:?}", path);
                return Ok(config);
            }
        }
        tracing::info!("using default configuration");
        Ok(Config::default())
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    pub fn save(&self, config_path: &PathBuf) -> FileZapResult<()> {
        let config_str = toml::to_string_pretty(self)?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, config_str)?;
        tracing::info!("configuration saved to {:?}", config_path);
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.network.connection_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let cfg = Config::default();
        assert!(cfg.crypto.default_threshold <= cfg.crypto.default_holders);
        assert!(cfg.storage.max_chunk_size <= cfg.storage.max_total_size);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config::default();
        let s = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.network.listen_port, cfg.network.listen_port);
        assert_eq!(back.quorum.approval_threshold_pct, cfg.quorum.approval_threshold_pct);
    }

    #[test]
    fn load_or_default_falls_back_when_path_missing() {
        let cfg = Config::load_or_default(Some(PathBuf::from("/nonexistent/filezap.toml"))).unwrap();
        assert_eq!(cfg.network.listen_port, 0);
    }
}
