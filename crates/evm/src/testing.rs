//! Scripted log source and log builders for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::{Token, encode};
use ethers::types::{Address, Filter, H256, Log, U64, U256};
use tokio::sync::Mutex;

use ferry_core::error::{ChainError, ChainResult};
use ferry_core::models::ResourceId;

use crate::abi::BridgeAbi;
use crate::client::LogSource;

#[derive(Default)]
struct ScriptState {
    heads: VecDeque<u64>,
    logs: Vec<Log>,
    timestamps: HashMap<u64, u64>,
    failing_log_calls: usize,
    failing_timestamps: usize,
    stalled_heads: bool,
    log_requests: Vec<(u64, u64)>,
    timestamp_requests: Vec<u64>,
}

/// In-memory node: serves the configured logs filtered by block range.
#[derive(Clone, Default)]
pub struct ScriptedLogSource {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedLogSource {
    pub fn new(head: u64) -> Self {
        let state = ScriptState {
            heads: VecDeque::from([head]),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Heads returned by successive `block_number` calls; the last one sticks.
    pub async fn push_heads(&self, heads: Vec<u64>) {
        self.state.lock().await.heads.extend(heads);
    }

    pub async fn add_logs(&self, logs: Vec<Log>) {
        self.state.lock().await.logs.extend(logs);
    }

    pub async fn set_timestamp(&self, block: u64, secs: u64) {
        self.state.lock().await.timestamps.insert(block, secs);
    }

    pub async fn fail_log_calls(&self, times: usize) {
        self.state.lock().await.failing_log_calls = times;
    }

    pub async fn fail_timestamps(&self, times: usize) {
        self.state.lock().await.failing_timestamps = times;
    }

    /// Make every later `block_number` call hang.
    pub async fn stall_heads(&self) {
        self.state.lock().await.stalled_heads = true;
    }

    /// Ranges requested through `logs`, in call order.
    pub async fn log_requests(&self) -> Vec<(u64, u64)> {
        self.state.lock().await.log_requests.clone()
    }

    pub async fn timestamp_requests(&self) -> Vec<u64> {
        self.state.lock().await.timestamp_requests.clone()
    }
}

#[async_trait]
impl LogSource for ScriptedLogSource {
    async fn block_number(&self) -> ChainResult<u64> {
        if self.state.lock().await.stalled_heads {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().await;
        if state.heads.len() > 1 {
            return Ok(state.heads.pop_front().unwrap_or_default());
        }
        Ok(state.heads.front().copied().unwrap_or_default())
    }

    async fn logs(&self, filter: &Filter) -> ChainResult<Vec<Log>> {
        let from = filter.get_from_block().map(|n| n.as_u64()).unwrap_or(0);
        let to = filter.get_to_block().map(|n| n.as_u64()).unwrap_or(u64::MAX);

        let mut state = self.state.lock().await;
        state.log_requests.push((from, to));
        if state.failing_log_calls > 0 {
            state.failing_log_calls -= 1;
            return Err(ChainError::RpcError("eth_getLogs failed".into()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.block_number
                    .is_some_and(|n| (from..=to).contains(&n.as_u64()))
            })
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, number: u64) -> ChainResult<Option<u64>> {
        let mut state = self.state.lock().await;
        state.timestamp_requests.push(number);
        if state.failing_timestamps > 0 {
            state.failing_timestamps -= 1;
            return Err(ChainError::RpcError("eth_getBlockByNumber failed".into()));
        }
        Ok(state.timestamps.get(&number).copied())
    }
}

// =============================================================================
// Log builders
// =============================================================================

fn bridge_abi() -> BridgeAbi {
    BridgeAbi::new().unwrap()
}

fn log(topics: Vec<H256>, data: Vec<u8>, block: u64, index: u64, tx: u8) -> Log {
    Log {
        topics,
        data: data.into(),
        block_number: Some(U64::from(block)),
        transaction_hash: Some(H256::repeat_byte(tx)),
        log_index: Some(U256::from(index)),
        ..Default::default()
    }
}

/// `Deposit` from user `0x1111…11`.
pub fn deposit_log(
    block: u64,
    index: u64,
    tx: u8,
    destination: u8,
    resource_id: ResourceId,
    nonce: u64,
    payload: &[u8],
) -> Log {
    let user = Address::repeat_byte(0x11);
    let data = encode(&[
        Token::Uint(destination.into()),
        Token::FixedBytes(resource_id.0.to_vec()),
        Token::Uint(nonce.into()),
        Token::Bytes(payload.to_vec()),
        Token::Bytes(Vec::new()),
    ]);
    log(
        vec![bridge_abi().deposit.signature(), H256::from(user)],
        data,
        block,
        index,
        tx,
    )
}

pub fn execution_log(block: u64, index: u64, tx: u8, origin: u8, nonce: u64) -> Log {
    let data = encode(&[
        Token::Uint(origin.into()),
        Token::Uint(nonce.into()),
        Token::FixedBytes(vec![0xab; 32]),
        Token::Bytes(Vec::new()),
    ]);
    log(
        vec![bridge_abi().proposal_execution.signature()],
        data,
        block,
        index,
        tx,
    )
}

pub fn failed_execution_log(
    block: u64,
    index: u64,
    tx: u8,
    origin: u8,
    nonce: u64,
    low_level_data: &[u8],
) -> Log {
    let data = encode(&[
        Token::Bytes(low_level_data.to_vec()),
        Token::Uint(origin.into()),
        Token::Uint(nonce.into()),
    ]);
    log(
        vec![bridge_abi().failed_handler_execution.signature()],
        data,
        block,
        index,
        tx,
    )
}

/// `FeeCollected` paid by `0x2222…22` from domain 1.
pub fn fee_log(
    block: u64,
    index: u64,
    tx: u8,
    destination: u8,
    resource_id: ResourceId,
    fee: u64,
    token: Address,
) -> Log {
    let data = encode(&[
        Token::Address(Address::repeat_byte(0x22)),
        Token::Uint(1u8.into()),
        Token::Uint(destination.into()),
        Token::FixedBytes(resource_id.0.to_vec()),
        Token::Uint(fee.into()),
        Token::Address(token),
    ]);
    log(
        vec![bridge_abi().fee_collected.signature()],
        data,
        block,
        index,
        tx,
    )
}
