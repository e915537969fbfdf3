// Command-line surface: a thin `clap` front end over the four public
// Network Engine operations (`add_file`, `get_file`, `report_bad_file`,
// `report_bad_peer`). No interactive wizard, no key-management UX, no
// network presets beyond a single bootstrap address.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use libp2p::{Multiaddr, PeerId};

#[derive(Parser, Debug)]
#[command(name = "filezap", about = "Encrypted, quorum-governed P2P file storage")]
pub struct Cli {
    /// TCP port the libp2p transport listens on (0 for an OS-assigned port).
    #[arg(long)]
    pub listen: Option<u16>,

    /// Multiaddr of a bootstrap peer to dial at startup. Repeatable.
    #[arg(long = "bootstrap")]
    pub bootstrap: Vec<Multiaddr>,

    /// Path to a TOML config file; defaults are used for anything absent.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encrypt, chunk, and register a file under the given name.
    Add {
        /// Path to the file on disk to read and store.
        path: PathBuf,
        /// Name the file is registered under (defaults to the file's basename).
        #[arg(long)]
        name: Option<String>,
    },
    /// Reassemble and decrypt a previously added file.
    Get {
        /// Name the file was registered under.
        name: String,
        /// Path to write the decrypted file to.
        output: PathBuf,
        /// Recombined key shares as `x:hex_encrypted_share` pairs, gathered
        /// out of band from the file's key-share holders.
        #[arg(long = "share", value_parser = parse_share)]
        shares: Vec<(u8, Vec<u8>)>,
    },
    /// Propose removal of a file via the quorum vote engine.
    ReportFile {
        /// Name of the file being flagged.
        name: String,
        /// Free-text reason recorded alongside the proposal.
        reason: String,
    },
    /// Propose removal of a peer via the quorum vote engine.
    ReportPeer {
        /// Peer id being flagged.
        peer: PeerId,
        /// Free-text reason recorded alongside the proposal.
        reason: String,
    },
}

/// Parses a `--share` value of the form `x:hex`, e.g. `2:a1b2c3`.
fn parse_share(raw: &str) -> Result<(u8, Vec<u8>), String> {
    let (x, hex_bytes) = raw.split_once(':').ok_or_else(|| format!("expected x:hex, got {raw:?}"))?;
    let x: u8 = x.parse().map_err(|e| format!("invalid share index {x:?}: {e}"))?;
    let bytes = hex::decode(hex_bytes).map_err(|e| format!("invalid hex share: {e}"))?;
    Ok((x, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_default_name() {
        let cli = Cli::parse_from(["filezap", "add", "file.bin"]);
        match cli.command {
            Command::Add { path, name } => {
                assert_eq!(path, PathBuf::from("file.bin"));
                assert!(name.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_get_with_repeated_shares() {
        let cli = Cli::parse_from(["filezap", "get", "myfile", "out.bin", "--share", "1:aabb", "--share", "2:ccdd"]);
        match cli.command {
            Command::Get { name, output, shares } => {
                assert_eq!(name, "myfile");
                assert_eq!(output, PathBuf::from("out.bin"));
                assert_eq!(shares, vec![(1, vec![0xaa, 0xbb]), (2, vec![0xcc, 0xdd])]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_share() {
        let result = Cli::try_parse_from(["filezap", "get", "myfile", "out.bin", "--share", "notashare"]);
        assert!(result.is_err());
    }
}
