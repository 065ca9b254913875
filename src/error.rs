//! Error types for the cache

use thiserror::Error;

/// Main error type for the cache facade
///
/// The only variant that crosses the facade in practice is [`Disposed`]:
/// dormant-store failures are logged and swallowed by the tier-movement
/// paths, and user probes report them as "not found".
///
/// [`Disposed`]: CacheError::Disposed
#[derive(Error, Debug)]
pub enum CacheError {
    /// Operation attempted after `dispose`
    #[error("cache has been disposed")]
    Disposed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Dormant store error
    #[error("Dormant store error: {0}")]
    Dormant(#[from] DormantError),
}

/// Errors raised by dormant store implementations
#[derive(Error, Debug)]
pub enum DormantError {
    /// IO operation failed (a missing backing file surfaces here as
    /// `NotFound`)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store cannot currently be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CacheError>;
