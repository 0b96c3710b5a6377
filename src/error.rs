//! Error types for Spillway
//!
//! Provides a unified error type for all internal operations. The public
//! cache operations on [`crate::StorageEngine`] never return these: they are
//! counted against a shard and degraded to a miss or a no-op.

use thiserror::Error;

use crate::codec::CodecError;

/// Result type alias using SpillError
pub type Result<T> = std::result::Result<T, SpillError>;

/// Unified error type for Spillway operations
#[derive(Debug, Error)]
pub enum SpillError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Payload Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    // -------------------------------------------------------------------------
    // Identity Errors
    // -------------------------------------------------------------------------
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SpillError {
    /// True when the payload can never be encoded and the entry should be
    /// excluded from caching.
    pub fn is_unsupported_payload(&self) -> bool {
        matches!(self, SpillError::Codec(CodecError::Unsupported(_)))
    }
}
