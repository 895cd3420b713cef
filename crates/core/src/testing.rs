//! In-memory adapters for exercising the services without a node or database.
//!
//! Available in unit tests and behind the `testing` feature.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::error::{ChainError, ChainResult, PriceError, PriceResult, StorageError, StorageResult};
use crate::models::{
    BlockHash, ChainKind, Deposit, DepositTransfer, Domain, DomainId, Execution, Fee, Resource,
    ResourceId, Transfer, TransferKey, TransferStatus,
};
use crate::ports::{
    AccountRepository, DepositRepository, DomainRepository, ExecutionRepository, FeeRepository,
    HeadStream, PriceOracle, RawEvent, Repositories, SubstrateSource, TransferRepository,
};

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Default)]
pub struct StoreState {
    pub domains: BTreeMap<DomainId, (String, Option<u64>)>,
    /// Every checkpoint write, in order.
    pub checkpoint_writes: Vec<(DomainId, u64)>,
    pub transfers: BTreeMap<String, Transfer>,
    pub deposits: BTreeMap<String, Deposit>,
    pub executions: BTreeMap<String, Execution>,
    pub fees: BTreeMap<String, Fee>,
    pub accounts: HashSet<String>,
    /// Number of upcoming checkpoint writes to fail.
    pub fail_checkpoints: usize,
}

/// Store keeping everything in memory with the same idempotency rules as
/// the PostgreSQL adapter.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRepositories {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot access for assertions.
    pub async fn state(&self) -> tokio::sync::MutexGuard<'_, StoreState> {
        self.state.lock().await
    }

    pub async fn transfer(&self, key: &TransferKey) -> Option<Transfer> {
        self.state.lock().await.transfers.get(&key.transfer_id()).cloned()
    }

    /// Fail the next `n` checkpoint writes.
    pub async fn fail_next_checkpoints(&self, n: usize) {
        self.state.lock().await.fail_checkpoints = n;
    }
}

impl Repositories for InMemoryRepositories {
    fn domains(&self) -> &dyn DomainRepository {
        self
    }

    fn transfers(&self) -> &dyn TransferRepository {
        self
    }

    fn deposits(&self) -> &dyn DepositRepository {
        self
    }

    fn executions(&self) -> &dyn ExecutionRepository {
        self
    }

    fn fees(&self) -> &dyn FeeRepository {
        self
    }

    fn accounts(&self) -> &dyn AccountRepository {
        self
    }
}

#[async_trait]
impl DomainRepository for InMemoryRepositories {
    async fn upsert_domain(&self, domain_id: DomainId, name: &str) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state
            .domains
            .entry(domain_id)
            .or_insert_with(|| (name.to_string(), None));
        Ok(())
    }

    async fn last_indexed_block(&self, domain_id: DomainId) -> StorageResult<Option<u64>> {
        let state = self.state.lock().await;
        Ok(state.domains.get(&domain_id).and_then(|(_, last)| *last))
    }

    async fn update_last_indexed_block(
        &self,
        domain_id: DomainId,
        block: u64,
    ) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        if state.fail_checkpoints > 0 {
            state.fail_checkpoints -= 1;
            return Err(StorageError::QueryError("checkpoint write failed".into()));
        }
        state.checkpoint_writes.push((domain_id, block));
        let entry = state
            .domains
            .entry(domain_id)
            .or_insert_with(|| (String::new(), None));
        entry.1 = Some(entry.1.map_or(block, |last| last.max(block)));
        Ok(())
    }
}

#[async_trait]
impl TransferRepository for InMemoryRepositories {
    async fn find(&self, key: &TransferKey) -> StorageResult<Option<Transfer>> {
        Ok(self.state.lock().await.transfers.get(&key.transfer_id()).cloned())
    }

    async fn upsert_by_deposit(&self, fields: &DepositTransfer) -> StorageResult<Transfer> {
        let mut state = self.state.lock().await;
        let transfer = state
            .transfers
            .entry(fields.key.transfer_id())
            .or_insert_with(|| Transfer::placeholder(fields.key, TransferStatus::Pending, None));
        transfer.amount = Some(fields.amount.clone());
        transfer.resource_id = Some(fields.resource_id);
        transfer.sender = Some(fields.sender.clone());
        transfer.destination = Some(fields.destination.clone());
        transfer.usd_value = Some(fields.usd_value);
        transfer.timestamp = fields.timestamp.or(transfer.timestamp);
        Ok(transfer.clone())
    }

    async fn insert_from_execution(
        &self,
        key: &TransferKey,
        timestamp: Option<DateTime<Utc>>,
    ) -> StorageResult<Transfer> {
        let mut state = self.state.lock().await;
        let transfer = state.transfers.entry(key.transfer_id()).or_insert_with(|| {
            let mut t = Transfer::placeholder(*key, TransferStatus::Executed, None);
            t.timestamp = timestamp;
            t
        });
        Ok(transfer.clone())
    }

    async fn insert_failed(&self, key: &TransferKey, message: &str) -> StorageResult<Transfer> {
        let mut state = self.state.lock().await;
        let transfer = state.transfers.entry(key.transfer_id()).or_insert_with(|| {
            Transfer::placeholder(*key, TransferStatus::Failed, Some(message.to_string()))
        });
        Ok(transfer.clone())
    }

    async fn update_status(
        &self,
        status: TransferStatus,
        transfer_id: &str,
        message: &str,
    ) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let transfer = state
            .transfers
            .get_mut(transfer_id)
            .ok_or_else(|| StorageError::NotFound(format!("transfer {transfer_id}")))?;
        if transfer.status.can_transition_to(status) {
            transfer.status = status;
            transfer.message = Some(message.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl DepositRepository for InMemoryRepositories {
    async fn insert(&self, deposit: &Deposit) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state
            .deposits
            .entry(deposit.id.clone())
            .or_insert_with(|| deposit.clone());
        Ok(())
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryRepositories {
    async fn insert(&self, execution: &Execution) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state
            .executions
            .entry(execution.id.clone())
            .or_insert_with(|| execution.clone());
        Ok(())
    }

    async fn upsert(&self, execution: &Execution) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }
}

#[async_trait]
impl FeeRepository for InMemoryRepositories {
    async fn insert(&self, fee: &Fee) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state.fees.entry(fee.id.clone()).or_insert_with(|| fee.clone());
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for InMemoryRepositories {
    async fn insert_if_absent(&self, address: &str) -> StorageResult<()> {
        self.state.lock().await.accounts.insert(address.to_string());
        Ok(())
    }
}

// =============================================================================
// Scripted price oracle
// =============================================================================

/// Fixed USD unit prices per symbol; unknown symbols fail.
#[derive(Debug, Default, Clone)]
pub struct FixedPriceOracle {
    prices: HashMap<String, f64>,
}

impl FixedPriceOracle {
    pub fn new(prices: impl IntoIterator<Item = (&'static str, f64)>) -> Self {
        Self {
            prices: prices
                .into_iter()
                .map(|(s, p)| (s.to_string(), p))
                .collect(),
        }
    }

    /// Oracle that fails every lookup.
    pub fn unavailable() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn value_in_usd(&self, amount: &str, symbol: &str) -> PriceResult<f64> {
        let price = self
            .prices
            .get(symbol)
            .ok_or_else(|| PriceError::UnknownSymbol(symbol.to_string()))?;
        let amount: f64 = amount
            .parse()
            .map_err(|_| PriceError::InvalidAmount(amount.to_string()))?;
        Ok(amount * price)
    }
}

// =============================================================================
// Scripted Substrate source
// =============================================================================

#[derive(Debug, Default)]
struct ScriptState {
    head: u64,
    events: HashMap<u64, Vec<RawEvent>>,
    timestamps: HashMap<u64, u64>,
    /// Blocks whose event fetch fails, with the number of failures left.
    failures: HashMap<u64, usize>,
    /// Head sequences handed out by successive subscriptions.
    subscriptions: VecDeque<Vec<u64>>,
    /// Every block whose events were fetched, in order.
    fetched: Vec<u64>,
}

/// Substrate source backed by a scripted chain.
///
/// Block hashes encode the block number in their last 8 bytes.
#[derive(Debug, Default, Clone)]
pub struct ScriptedSubstrateSource {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSubstrateSource {
    pub fn new(head: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                head,
                ..Default::default()
            })),
        }
    }

    pub async fn set_events(&self, block: u64, events: Vec<RawEvent>) {
        self.state.lock().await.events.insert(block, events);
    }

    pub async fn set_timestamp(&self, block: u64, millis: u64) {
        self.state.lock().await.timestamps.insert(block, millis);
    }

    /// Make the next `times` event fetches for `block` fail.
    pub async fn fail_block(&self, block: u64, times: usize) {
        self.state.lock().await.failures.insert(block, times);
    }

    /// Queue the heads the next subscription will yield before ending.
    pub async fn push_subscription(&self, heads: Vec<u64>) {
        self.state.lock().await.subscriptions.push_back(heads);
    }

    pub async fn fetched_blocks(&self) -> Vec<u64> {
        self.state.lock().await.fetched.clone()
    }

    fn hash_of(number: u64) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&number.to_be_bytes());
        BlockHash(bytes)
    }

    fn number_of(hash: &BlockHash) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.0[24..]);
        u64::from_be_bytes(bytes)
    }
}

#[async_trait]
impl SubstrateSource for ScriptedSubstrateSource {
    async fn current_head(&self) -> ChainResult<u64> {
        Ok(self.state.lock().await.head)
    }

    async fn block_hash(&self, number: u64) -> ChainResult<Option<BlockHash>> {
        let state = self.state.lock().await;
        Ok((number <= state.head).then(|| Self::hash_of(number)))
    }

    async fn events_at(&self, hash: &BlockHash) -> ChainResult<Vec<RawEvent>> {
        let number = Self::number_of(hash);
        let mut state = self.state.lock().await;
        if let Some(left) = state.failures.get_mut(&number)
            && *left > 0
        {
            *left -= 1;
            return Err(ChainError::RpcError(format!("scripted failure at {number}")));
        }
        state.fetched.push(number);
        Ok(state.events.get(&number).cloned().unwrap_or_default())
    }

    async fn timestamp_at(&self, hash: &BlockHash) -> ChainResult<Option<u64>> {
        let number = Self::number_of(hash);
        Ok(self.state.lock().await.timestamps.get(&number).copied())
    }

    async fn subscribe_heads(&self) -> ChainResult<HeadStream> {
        let heads = self
            .state
            .lock()
            .await
            .subscriptions
            .pop_front()
            .ok_or_else(|| ChainError::SubscriptionError("no scripted subscription".into()))?;
        let state = self.state.clone();
        let stream = futures::stream::iter(heads).then(move |head| {
            let state = state.clone();
            async move {
                let mut state = state.lock().await;
                state.head = state.head.max(head);
                Ok(head)
            }
        });
        Ok(Box::pin(stream))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Resource id whose last byte is `tag`.
pub fn resource_id(tag: u8) -> ResourceId {
    let mut bytes = [0u8; 32];
    bytes[31] = tag;
    ResourceId(bytes)
}

/// Indexable domain with one `USDC` resource (`resource_id(1)`, 6 decimals).
pub fn test_domain(id: DomainId, kind: ChainKind) -> Domain {
    Domain {
        id,
        name: format!("domain-{id}"),
        kind,
        bridge: "0x4d878e8fb90178588cda4cf1dccdc9a6d2757089".to_string(),
        native_token_symbol: "ETH".to_string(),
        native_token_decimals: 18,
        block_confirmations: 0,
        start_block: 0,
        resources: vec![Resource {
            resource_id: resource_id(1),
            kind: "erc20".to_string(),
            address: "0x37356a2b2ebf65e5ea18bd93dea6869769099739".to_string(),
            symbol: "USDC".to_string(),
            decimals: 6,
        }],
        handlers: Vec::new(),
        fee_router: None,
        fee_handlers: Vec::new(),
        rpc_url: Some("ws://127.0.0.1:9944".to_string()),
    }
}

/// Fungible deposit payload: amount word, recipient length word, recipient.
pub fn deposit_payload(amount: u128, recipient: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; 64];
    data[16..32].copy_from_slice(&amount.to_be_bytes());
    data[56..64].copy_from_slice(&(recipient.len() as u64).to_be_bytes());
    data.extend_from_slice(recipient);
    data
}
