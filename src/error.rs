//! Construction and replay errors.
//!
//! The matching hot path never returns errors: semantic violations
//! surface as `Reject` events, output-ring loss is counted, and the
//! order path spins. Everything here fails loudly at construction or
//! in the replay driver.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("ring capacity must be a non-zero power of two, got {0}")]
    RingCapacity(usize),

    #[error("engine requires at least one shard")]
    ZeroShards,

    #[error("mailbox capacity must be a non-zero power of two, got {0}")]
    MailboxCapacity(usize),

    #[error("replay speed must be positive, got {0}")]
    InvalidSpeed(f64),

    #[error("failed to open feed source {path}: {source}")]
    FeedOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed feed row at line {line}: {reason}")]
    FeedParse { line: usize, reason: String },
}
