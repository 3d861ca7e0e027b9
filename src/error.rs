//! Error handling
//!
//! Faults inside the packet hot path never surface as errors (malformed
//! packets are skipped, persistence faults are logged and swallowed at
//! the write site). The variants here exist for the store path, which is
//! the only place a failure is allowed to reach the caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Bounded persistence queue was full; the write was dropped.
    #[error("persistence queue full, write dropped")]
    QueueFull,

    /// Persistence writer has shut down.
    #[error("persistence queue closed")]
    QueueClosed,
}
