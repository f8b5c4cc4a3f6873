//! Error types for the metric tree

use thiserror::Error;

/// Result type alias for metric tree operations
pub type Result<T> = std::result::Result<T, MTreeError>;

/// Error types that can occur in metric tree operations
#[derive(Error, Debug)]
pub enum MTreeError {
    /// The page size yields node capacities the tree cannot work with.
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    /// The tree has been closed; no further operations are possible.
    #[error("Tree is not initialized")]
    NotInitialized,

    /// A permanently rejected operation (deletion, reverse kNN).
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The page file failed a magic/version/checksum check or contains
    /// pages that do not decode.
    #[error("Corrupted page file: {0}")]
    Corrupted(String),

    /// A structural self-test found a violated tree invariant. Never
    /// raised by the public operations themselves.
    #[error("Invariant violation: {0}")]
    Invariant(String),
}
