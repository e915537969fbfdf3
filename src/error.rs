// ===================================================================================================
// Error Handling System - Comprehensive Error Types and Management
// ===================================================================================================
//
// FileZap's error taxonomy is organized by failure kind, matching the
// component boundaries in the design: validation, capacity, transport,
// protocol, quorum and crypto errors each get their own variants so
// callers can match on the kind of failure rather than parsing strings.
//
// Background loops never propagate an error upward; they log it (see
// `logging.rs`) and continue. Every public operation has exactly one
// error channel back to its caller.
// ===================================================================================================

use std::error::Error as StdError;
use std::fmt;

/// Errors produced anywhere in FileZap's core components.
#[derive(Debug)]
pub enum FileZapError {
    // ===== VALIDATION ERRORS (C3) =====
    /// `sha256_hex(bytes) != expected_hash`.
    HashMismatch { expected: String, actual: String },
    /// Chunk bytes empty or larger than the 100 MiB chunk limit.
    SizeMismatch { len: usize },
    /// Fewer than 5 bytes, or the version byte isn't `1`.
    ContentMalformed(String),

    // ===== CAPACITY ERRORS (C1) =====
    /// `store` could not make room even after evicting everything evictable.
    StorageFull { requested: usize, capacity: usize },

    // ===== TRANSPORT ERRORS (C2) =====
    /// The stream closed (including a reset) before the expected frame.
    ConnectionClosed(String),
    /// An operation's deadline elapsed.
    DeadlineExceeded(String),
    /// The peer reset the stream mid-transfer.
    StreamReset(String),
    /// A download was requested from ourselves.
    SelfDownload,

    // ===== PROTOCOL ERRORS (C6/C7) =====
    /// A manifest failed the DHT record validator or serde validation.
    InvalidManifest(String),
    /// A DHT/key-share lookup referenced an unknown key.
    UnknownKey(String),
    /// The same voter attempted to double-register a vote response after completion.
    DuplicateVote(String),
    /// A vote or key-share request was used past its deadline.
    VoteExpired(String),

    // ===== QUORUM ERRORS (C8) =====
    /// Fewer than `MinQuorumSize` peers are known; a vote cannot be proposed.
    InsufficientPeers { have: usize, need: usize },
    /// The vote completed without reaching the approval threshold.
    VoteRejected(String),
    /// The vote's deadline passed before it became decidable.
    VoteTimeout(String),

    // ===== CRYPTO ERRORS (C7) =====
    /// AES-GCM decryption failed (bad key, tampered ciphertext, or truncated nonce).
    DecryptFailed(String),
    /// Fewer than `threshold` distinct shares were supplied to `recombine`.
    InsufficientShares { have: usize, need: usize },
    /// A key or share had the wrong length or an otherwise invalid shape.
    InvalidKey(String),

    // ===== AMBIENT ERRORS =====
    /// Filesystem I/O (config load/save, CLI file reads).
    Io(String),
    /// JSON/TOML (de)serialization outside the typed wire schemas above.
    Serialization(String),
    /// Invalid or missing configuration.
    Config(String),
    /// Catch-all for errors that don't fit a more specific category.
    Generic(String),
}

impl fmt::Display for FileZapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileZapError::HashMismatch { expected, actual } => {
                write!(f, "hash mismatch: expected {expected}, got {actual}")
            }
            FileZapError::SizeMismatch { len } => write!(f, "size mismatch: {len} bytes"),
            FileZapError::ContentMalformed(e) => write!(f, "content malformed: {e}"),
            FileZapError::StorageFull { requested, capacity } => {
                write!(f, "storage full: requested {requested} bytes, capacity {capacity}")
            }
            FileZapError::ConnectionClosed(e) => write!(f, "connection closed: {e}"),
            FileZapError::DeadlineExceeded(e) => write!(f, "deadline exceeded: {e}"),
            FileZapError::StreamReset(e) => write!(f, "stream reset: {e}"),
            FileZapError::SelfDownload => write!(f, "refused to download a chunk from self"),
            FileZapError::InvalidManifest(e) => write!(f, "invalid manifest: {e}"),
            FileZapError::UnknownKey(e) => write!(f, "unknown key: {e}"),
            FileZapError::DuplicateVote(e) => write!(f, "duplicate vote: {e}"),
            FileZapError::VoteExpired(e) => write!(f, "vote expired: {e}"),
            FileZapError::InsufficientPeers { have, need } => {
                write!(f, "insufficient peers: have {have}, need {need}")
            }
            FileZapError::VoteRejected(e) => write!(f, "vote rejected: {e}"),
            FileZapError::VoteTimeout(e) => write!(f, "vote timed out: {e}"),
            FileZapError::DecryptFailed(e) => write!(f, "decryption failed: {e}"),
            FileZapError::InsufficientShares { have, need } => {
                write!(f, "insufficient shares: have {have}, need {need}")
            }
            FileZapError::InvalidKey(e) => write!(f, "invalid key: {e}"),
            FileZapError::Io(e) => write!(f, "I/O error: {e}"),
            FileZapError::Serialization(e) => write!(f, "serialization error: {e}"),
            FileZapError::Config(e) => write!(f, "configuration error: {e}"),
            FileZapError::Generic(e) => write!(f, "error: {e}"),
        }
    }
}

impl StdError for FileZapError {}

impl From<std::io::Error> for FileZapError {
    fn from(error: std::io::Error) -> Self {
        FileZapError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for FileZapError {
    fn from(error: serde_json::Error) -> Self {
        FileZapError::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for FileZapError {
    fn from(error: toml::de::Error) -> Self {
        FileZapError::Config(format!("TOML parse error: {error}"))
    }
}

impl From<toml::ser::Error> for FileZapError {
    fn from(error: toml::ser::Error) -> Self {
        FileZapError::Config(format!("TOML serialize error: {error}"))
    }
}

impl From<aes_gcm::Error> for FileZapError {
    fn from(_: aes_gcm::Error) -> Self {
        FileZapError::DecryptFailed("AES-GCM operation failed".to_string())
    }
}

impl From<rsa::Error> for FileZapError {
    fn from(error: rsa::Error) -> Self {
        FileZapError::InvalidKey(format!("RSA error: {error}"))
    }
}

impl From<anyhow::Error> for FileZapError {
    fn from(error: anyhow::Error) -> Self {
        FileZapError::Generic(error.to_string())
    }
}

/// An error annotated with operator-facing context, used by the CLI when
/// reporting the single error summary a public operation failed with.
#[derive(Debug)]
pub struct EnhancedError {
    pub error: FileZapError,
    pub context: Option<String>,
}

impl EnhancedError {
    pub fn new(error: FileZapError) -> Self {
        Self { error, context: None }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for EnhancedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        Ok(())
    }
}

impl StdError for EnhancedError {}

/// Result type alias for FileZap operations.
pub type FileZapResult<T> = Result<T, FileZapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_specific_detail() {
        let e = FileZapError::HashMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(e.to_string().contains("aa"));
        assert!(e.to_string().contains("bb"));
    }

    #[test]
    fn enhanced_error_appends_context() {
        let e = EnhancedError::new(FileZapError::SelfDownload).with_context("get_file(\"x\")");
        assert!(e.to_string().contains("get_file"));
    }
}
