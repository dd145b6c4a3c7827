use std::path::PathBuf;
use std::time::Duration;

/// Reasons an admission was not granted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CountError {
    /// Every capacity token is held by a live admission.
    ///
    /// Only produced by the non-blocking admission path.
    #[error("Admission gate saturated; all {capacity} slots are live, retry after {retry_after:?}")]
    Saturated {
        /// The configured capacity.
        capacity: usize,
        /// Time until the earliest live admission expires.
        retry_after: Duration,
    },

    /// The caller waited the maximum allowed time without a token freeing up.
    #[error("Timed out after {waited:?} waiting for an admission slot")]
    Timeout {
        /// How long the caller was prepared to wait.
        waited: Duration,
    },

    /// The counter configuration cannot be represented.
    #[error("Invalid counter configuration: {0}")]
    Config(String),
}

/// Failure to persist a snapshot.
///
/// Loading never fails; unreadable state degrades to an empty seed.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move {} into place at {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
