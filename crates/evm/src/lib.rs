//! # Ferry EVM
//!
//! EVM side of the bridge indexer.
//!
//! - [`EvmClient`]: HTTP JSON-RPC access through `ethers`
//! - [`decode_logs`]: raw bridge logs to typed events
//! - [`EvmIndexer`]: per-domain [`ChainIndexer`](ferry_core::services::ChainIndexer)
//!   reading one `eth_getLogs` range per window

pub mod abi;
pub mod client;
pub mod decoder;
pub mod error;
pub mod indexer;

#[cfg(test)]
mod testing;

pub use abi::BridgeAbi;
pub use client::{EvmClient, LogSource};
pub use decoder::{DecodedLogs, LogFailure, NATIVE_TOKEN_ADDRESS, decode_logs};
pub use error::{EvmError, LogDecodeError};
pub use indexer::EvmIndexer;
