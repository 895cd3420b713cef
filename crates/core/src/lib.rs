//! Core domain layer for the Ferry bridge indexer.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! business logic services for indexing cross-chain bridge transfers.
//! It follows hexagonal architecture principles - this is the innermost
//! layer with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ferry (binary)                        │
//! │              (config, pricing, task supervision)            │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │          ferry-evm           │       ferry-substrate        │
//! │   (log decoding, indexer)    │            (RPC)             │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                       ferry-storage                         │
//! │                        (PostgreSQL)                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  ferry-core  ← YOU ARE HERE                 │
//! │          (models, registry, ports, services)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (Domain, Transfer, Deposit, Fee, ...)
//! - [`registry`] - Domain registry built from the shared bridge config
//! - [`events`] - Normalized bridge events, chain independent
//! - [`extract`] - Substrate event extraction into bridge events
//! - [`payload`] - Deposit payload decoding
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Correlation engine and per-domain scheduling
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Indexer Lifecycle
//!
//! 1. Resume each domain from its stored checkpoint
//! 2. Catch up on history in bounded windows
//! 3. Follow new heads in fixed strides
//! 4. Decode each range into [`events::BlockEvents`]
//! 5. Correlate and persist them, then advance the checkpoint

pub mod error;
pub mod events;
pub mod extract;
pub mod metrics;
pub mod models;
pub mod payload;
pub mod ports;
pub mod registry;
pub mod services;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
