//! JSON-RPC access to an EVM chain.

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Filter, Log};
use tracing::info;

use ferry_core::error::{ChainError, ChainResult};

// =============================================================================
// LogSource
// =============================================================================

/// Read access the EVM indexer needs from a node.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> ChainResult<u64>;

    /// Logs matching `filter`, in chain order.
    async fn logs(&self, filter: &Filter) -> ChainResult<Vec<Log>>;

    /// Block timestamp in seconds, `None` when the node does not know the block.
    async fn block_timestamp(&self, number: u64) -> ChainResult<Option<u64>>;
}

// =============================================================================
// EvmClient
// =============================================================================

/// HTTP JSON-RPC client.
#[derive(Debug, Clone)]
pub struct EvmClient {
    provider: Provider<Http>,
}

impl EvmClient {
    pub fn new(rpc_url: &str) -> ChainResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::ConnectionFailed(format!("{rpc_url}: {e}")))?;
        info!(url = %rpc_url, "🔌 EVM provider ready");
        Ok(Self { provider })
    }
}

#[async_trait]
impl LogSource for EvmClient {
    async fn block_number(&self) -> ChainResult<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        Ok(number.as_u64())
    }

    async fn logs(&self, filter: &Filter) -> ChainResult<Vec<Log>> {
        self.provider
            .get_logs(filter)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))
    }

    async fn block_timestamp(&self, number: u64) -> ChainResult<Option<u64>> {
        let block = self
            .provider
            .get_block(number)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        Ok(block.map(|b| b.timestamp.low_u64()))
    }
}
