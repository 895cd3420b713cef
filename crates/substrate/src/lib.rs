//! Substrate RPC adapter for the Ferry bridge indexer.
//!
//! This crate implements the [`SubstrateSource`] port from `ferry-core`,
//! providing connectivity to Substrate-based blockchains via WebSocket RPC.
//!
//! # Features
//!
//! - Historical block lookup by number (legacy RPC backend)
//! - Finalized or best head subscription
//! - Dynamic metadata decoding using subxt
//! - SCALE to JSON conversion for events
//! - Block timestamp from `Timestamp.Now` storage
//!
//! # Usage
//!
//! ```ignore
//! use ferry_substrate::{SubstrateClient, SubstrateClientConfig};
//!
//! let config = SubstrateClientConfig {
//!     ws_url: "ws://localhost:9944".to_string(),
//!     ..Default::default()
//! };
//!
//! let client = SubstrateClient::connect(config).await?;
//! let head = client.current_head().await?;
//! ```
//!
//! [`SubstrateSource`]: ferry_core::ports::SubstrateSource

mod client;

pub use client::{SubstrateClient, SubstrateClientConfig};
