//! Error taxonomy.
//!
//! Only fatal, user-visible failures are represented here; they terminate
//! the run with a nonzero exit code. The transient conditions of the update
//! protocol (optimistic-read failure, lock failure, link-tag mismatch) are
//! control flow inside the core and never surface as errors. Invariant
//! violations (free-list exhaustion, unknown work-request id, meta-file
//! mismatch) are bugs or resource exhaustion and panic instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing or unreadable files, failed mappings, failed sockets.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A completion arrived with a non-success status.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed bootstrap-channel frame or unexpected message.
    #[error("bootstrap protocol error: {0}")]
    Protocol(String),

    /// Invalid query input.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

pub type Result<T> = std::result::Result<T, Error>;
