//! Process-wide logging setup.

use std::fs::OpenOptions;
use std::sync::Arc;

/// Initializes tracing output for a daemon. A non-empty `filename` appends
/// to that file; an empty one logs to stderr.
pub fn init(filename: &str) -> anyhow::Result<()> {
    if filename.is_empty() {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(filename)?;
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
