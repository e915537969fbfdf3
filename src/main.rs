// FileZap: an encrypted, quorum-governed P2P file store built on libp2p.
//
// A thin binary: init logging, parse the CLI, start a Network Engine, and
// dispatch to the one operation the user asked for. All the substance lives
// in the library (see `lib.rs` for the module map).

mod chunk_store;
mod chunk_transfer;
mod chunk_validator;
mod cli;
mod config;
mod crypto;
mod error;
mod gf256;
mod key_share_manager;
mod logging;
mod manifest_registry;
mod network;
mod network_actor;
mod network_engine;
mod peer_registry;
mod quorum;
mod reputation;
mod resilience;
mod traits;

use clap::Parser;

use cli::{Cli, Command};
use error::EnhancedError;
use network_engine::NetworkEngine;

#[tokio::main]
async fn main() {
    logging::init_logging_safe();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        logging::log_error_with_context("filezap", &e);
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Falls back to `$XDG_CONFIG_HOME/filezap/config.toml` (or the platform
/// equivalent) when `--config` isn't given.
fn default_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|dir| dir.join("filezap").join("config.toml"))
}

async fn run(cli: Cli) -> Result<(), EnhancedError> {
    let config_path = cli.config.clone().or_else(default_config_path);
    let mut config = config::Config::load_or_default(config_path).map_err(EnhancedError::new)?;
    if let Some(listen) = cli.listen {
        config.network.listen_port = listen;
    }
    for addr in &cli.bootstrap {
        config.network.bootstrap_peers.push(addr.to_string());
    }

    let engine = NetworkEngine::start(config)
        .await
        .map_err(|e| EnhancedError::new(e).with_context("starting network engine"))?;

    match cli.command {
        Command::Add { path, name } => {
            let data = std::fs::read(&path).map_err(|e| EnhancedError::new(e.into()).with_context("reading input file"))?;
            let file_name = name.unwrap_or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "unnamed".to_string())
            });
            let manifest = engine
                .add_file(file_name.clone(), data)
                .await
                .map_err(|e| EnhancedError::new(e).with_context(format!("add_file({file_name:?})")))?;
            println!("added {} ({} chunks, {} bytes)", manifest.name, manifest.chunk_hashes.len(), manifest.size);
        }
        Command::Get { name, output, shares } => {
            let data = engine
                .get_file(&name, &shares)
                .await
                .map_err(|e| EnhancedError::new(e).with_context(format!("get_file({name:?})")))?;
            std::fs::write(&output, &data).map_err(|e| EnhancedError::new(e.into()).with_context("writing output file"))?;
            println!("wrote {} bytes to {}", data.len(), output.display());
        }
        Command::ReportFile { name, reason } => {
            engine
                .report_bad_file(&name, reason.clone())
                .await
                .map_err(|e| EnhancedError::new(e).with_context(format!("report_bad_file({name:?})")))?;
            println!("proposed removal of {name}: {reason}");
        }
        Command::ReportPeer { peer, reason } => {
            engine
                .report_bad_peer(peer, reason.clone())
                .await
                .map_err(|e| EnhancedError::new(e).with_context(format!("report_bad_peer({peer})")))?;
            println!("proposed removal of {peer}: {reason}");
        }
    }

    Ok(())
}
