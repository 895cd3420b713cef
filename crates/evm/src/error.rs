//! EVM adapter errors.

use ethers::types::H256;
use thiserror::Error;

use ferry_core::error::IndexerError;

/// Why one log could not be decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LogDecodeError {
    #[error("log has no {0}")]
    MissingMetadata(&'static str),

    #[error("unknown event topic {0:#x}")]
    UnknownTopic(H256),

    #[error("ABI decoding failed for {event}: {reason}")]
    Abi { event: &'static str, reason: String },

    #[error("invalid `{field}` in {event}: {reason}")]
    InvalidField {
        event: &'static str,
        field: &'static str,
        reason: String,
    },
}

/// Setup errors of the EVM indexer.
#[derive(Error, Debug)]
pub enum EvmError {
    #[error("invalid contract address `{address}` on domain {domain}")]
    InvalidAddress { domain: String, address: String },

    #[error("invalid bridge ABI: {0}")]
    Abi(String),
}

impl From<EvmError> for IndexerError {
    fn from(e: EvmError) -> Self {
        IndexerError::ConfigError(e.to_string())
    }
}

pub type DecodeResult<T> = Result<T, LogDecodeError>;
