use std::time::Duration;

use thiserror::Error;

/// Failure of a single probe. Always caught at the probe boundary and turned
/// into a sentinel field value; never aborts a scan on its own.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected probe output: {0}")]
    Parse(String),

    #[error("probe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the scan run as a whole. Surfaces to the caller together with an
/// empty device list.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("no usable local network interface: {0}")]
    NetworkUnreachable(String),

    #[error("host discovery failed: {0}")]
    OrchestrationFault(#[source] ProbeError),
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("repository task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
