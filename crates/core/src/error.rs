//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DomainError`] - Decoding and validation errors
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Chain RPC errors (EVM and Substrate)
//! - [`PriceError`] - USD price lookup errors
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

use crate::models::DomainId;

// =============================================================================
// Domain Errors
// =============================================================================

/// Decoding failures and domain rule violations.
///
/// A single malformed event or log surfaces as one of these and is
/// isolated to that event.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Event payload or raw log could not be decoded.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Resource identifier is not a 32-byte hex value.
    #[error("Invalid resource ID: {0}")]
    InvalidResourceId(String),

    /// Domain is not present in the registry.
    #[error("Unknown domain: {0}")]
    UnknownDomain(DomainId),

    /// Generic validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Stored value could not be mapped back to a domain model.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Chain RPC and connectivity errors.
///
/// All of these are transient from the scheduler's point of view: the
/// window being processed is retried without advancing the checkpoint.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Connection to the node failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Head subscription failed or disconnected.
    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    /// Runtime metadata or event payload could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The node does not know the requested block yet.
    #[error("Block not found: {0}")]
    BlockNotFound(u64),

    /// An RPC call did not answer within the configured timeout.
    #[error("Timeout after {after_secs}s waiting for {operation}")]
    Timeout {
        /// Name of the timed out call.
        operation: String,
        /// Configured timeout.
        after_secs: u64,
    },
}

// =============================================================================
// Price Errors
// =============================================================================

/// USD valuation errors. Never fatal to persistence.
#[derive(Debug, Error)]
pub enum PriceError {
    /// The price service could not be reached or answered with an error.
    #[error("Price lookup unavailable: {0}")]
    Unavailable(String),

    /// The price service does not quote this symbol.
    #[error("No price quoted for symbol: {0}")]
    UnknownSymbol(String),

    /// The amount string is not a decimal number.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the error type returned by the per-domain scheduler loop.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Domain logic error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Chain connectivity error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error type for control flow.
    #[error("Indexer shutdown requested")]
    ShutdownRequested,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type for price lookups.
pub type PriceResult<T> = Result<T, PriceError>;
