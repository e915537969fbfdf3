use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize logging system for the FileZap node.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default log level based on debug/release build
        if cfg!(debug_assertions) {
            EnvFilter::new("filezap=debug,libp2p=info")
        } else {
            EnvFilter::new("filezap=info,libp2p=warn")
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    info!("filezap logging initialized");
    Ok(())
}

/// Initialize logging with fallback behavior if setup fails.
pub fn init_logging_safe() {
    if let Err(e) = init_logging() {
        eprintln!(
            "Warning: failed to set up tracing: {}. Falling back to eprintln logging.",
            e
        );
    }
}

/// Log a networking event (dial, connect, disconnect, gossip receipt).
pub fn log_network_event(event: &str, details: &str) {
    info!(target: "filezap::network", "{}: {}", event, details);
}

/// Log a chunk-store or chunk-transfer event.
pub fn log_chunk_operation(operation: &str, chunk_hash: &str, details: &str) {
    info!(target: "filezap::chunk", "{} {}: {}", operation, chunk_hash, details);
}

/// Log a quorum vote lifecycle event.
pub fn log_quorum_event(operation: &str, vote_id: &str, details: &str) {
    info!(target: "filezap::quorum", "{} {}: {}", operation, vote_id, details);
}

/// Log an error with operator-facing context.
pub fn log_error_with_context(context: &str, error: &dyn std::error::Error) {
    error!(target: "filezap::error", "{}: {}", context, error);
}
