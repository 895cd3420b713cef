//! Port trait for the Substrate chain data source.
//!
//! The scheduler reads historical blocks by number and follows new heads
//! through a subscription. Implementations live in the infrastructure
//! layer (e.g., `ferry-substrate`).

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::ChainResult;
use crate::models::BlockHash;

/// Raw event data, decoded to JSON but not yet typed.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Index in block.
    pub index: u32,
    /// Extrinsic index when emitted during `ApplyExtrinsic`.
    pub extrinsic_index: Option<u32>,
    /// Pallet name.
    pub pallet: String,
    /// Event variant name.
    pub name: String,
    /// Event data as JSON.
    pub data: serde_json::Value,
}

/// Which heads the subscription follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockMode {
    #[default]
    Finalized,
    Best,
}

impl std::str::FromStr for BlockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "finalized" => Ok(BlockMode::Finalized),
            "best" => Ok(BlockMode::Best),
            other => Err(format!("unknown block mode: {other}")),
        }
    }
}

/// Stream of new head block numbers.
pub type HeadStream = Pin<Box<dyn Stream<Item = ChainResult<u64>> + Send>>;

/// Port trait for a Substrate node.
#[async_trait]
pub trait SubstrateSource: Send + Sync {
    /// Current head number (finalized or best depending on the mode).
    async fn current_head(&self) -> ChainResult<u64>;

    /// Hash of block `number`, `None` if the node does not know it yet.
    async fn block_hash(&self, number: u64) -> ChainResult<Option<BlockHash>>;

    /// All events emitted in the block.
    async fn events_at(&self, hash: &BlockHash) -> ChainResult<Vec<RawEvent>>;

    /// `Timestamp.now` of the block in milliseconds.
    async fn timestamp_at(&self, hash: &BlockHash) -> ChainResult<Option<u64>>;

    /// Subscribe to new heads.
    async fn subscribe_heads(&self) -> ChainResult<HeadStream>;
}
