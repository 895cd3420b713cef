//! EVM domain indexer.
//!
//! A range is read with one `eth_getLogs` call over the bridge and fee
//! handler contracts, restricted to the four bridge topics. Decoded events
//! are correlated block by block and the checkpoint is written once for the
//! end of the range. New heads are discovered by polling.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, Filter};
use futures::stream;
use tracing::{debug, trace, warn};

use ferry_core::error::{ChainResult, IndexerResult};
use ferry_core::metrics::{record_blocks_indexed, record_decode_error};
use ferry_core::models::Domain;
use ferry_core::ports::{HeadStream, Repositories};
use ferry_core::services::{ChainIndexer, CorrelationEngine, SchedulerConfig, with_timeout};

use crate::abi::BridgeAbi;
use crate::client::LogSource;
use crate::decoder::decode_logs;
use crate::error::EvmError;

/// Indexer for one EVM domain.
pub struct EvmIndexer<L: LogSource> {
    domain: Domain,
    config: SchedulerConfig,
    source: Arc<L>,
    repositories: Arc<dyn Repositories>,
    engine: Arc<CorrelationEngine>,
    abi: BridgeAbi,
    contracts: Vec<Address>,
}

impl<L: LogSource> EvmIndexer<L> {
    pub fn new(
        domain: Domain,
        config: SchedulerConfig,
        source: Arc<L>,
        repositories: Arc<dyn Repositories>,
        engine: Arc<CorrelationEngine>,
    ) -> Result<Self, EvmError> {
        let contracts = watched_contracts(&domain)?;
        Ok(Self {
            domain,
            config,
            source,
            repositories,
            engine,
            abi: BridgeAbi::new()?,
            contracts,
        })
    }

    fn filter(&self, from: u64, to: u64) -> Filter {
        Filter::new()
            .from_block(from)
            .to_block(to)
            .address(self.contracts.clone())
            .topic0(self.abi.topics())
    }
}

/// Bridge plus fee handler addresses of `domain`.
pub fn watched_contracts(domain: &Domain) -> Result<Vec<Address>, EvmError> {
    let parse = |address: &str| {
        address
            .parse::<Address>()
            .map_err(|_| EvmError::InvalidAddress {
                domain: domain.name.clone(),
                address: address.to_string(),
            })
    };

    let mut contracts = vec![parse(&domain.bridge)?];
    for handler in &domain.fee_handlers {
        let address = parse(&handler.address)?;
        if !contracts.contains(&address) {
            contracts.push(address);
        }
    }
    Ok(contracts)
}

#[async_trait]
impl<L: LogSource + 'static> ChainIndexer for EvmIndexer<L> {
    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn repositories(&self) -> &dyn Repositories {
        self.repositories.as_ref()
    }

    async fn current_head(&self) -> ChainResult<u64> {
        self.source.block_number().await
    }

    /// Poll the block number every `poll_interval`.
    ///
    /// A stalled node yields a timeout error and the follower resubscribes.
    async fn subscribe_heads(&self) -> ChainResult<HeadStream> {
        let interval = self.config.poll_interval;
        let timeout = self.config.rpc_timeout;
        let heads = stream::unfold(self.source.clone(), move |source| async move {
            tokio::time::sleep(interval).await;
            let head = with_timeout(timeout, "block_number", source.block_number()).await;
            Some((head, source))
        });
        Ok(Box::pin(heads))
    }

    async fn process_range(&self, from: u64, to: u64) -> IndexerResult<()> {
        let timeout = self.config.rpc_timeout;
        let filter = self.filter(from, to);

        let logs = with_timeout(timeout, "get_logs", self.source.logs(&filter)).await?;
        trace!(from, to, logs = logs.len(), "Logs fetched");

        let decoded = decode_logs(self.source.as_ref(), &self.abi, &self.domain, &logs, timeout).await?;
        for failure in &decoded.errors {
            warn!(
                block = ?failure.block_number,
                log_index = ?failure.log_index,
                error = %failure.error,
                "⚠️  Failed to decode bridge log"
            );
            record_decode_error(&self.domain.name, "log");
        }

        for (number, events) in decoded.into_blocks() {
            let outcome = self.engine.process_block(&self.domain, &events).await;
            debug!(
                block = number,
                persisted = outcome.persisted,
                skipped = outcome.skipped,
                failed = outcome.failed,
                "Bridge events processed"
            );
        }

        self.commit_checkpoint(to).await?;
        record_blocks_indexed(&self.domain.name, to - from + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::sync::watch;

    use super::*;
    use crate::decoder::NATIVE_TOKEN_ADDRESS;
    use crate::testing::{
        ScriptedLogSource, deposit_log, execution_log, failed_execution_log, fee_log,
    };
    use ferry_core::error::{ChainError, IndexerError};
    use ferry_core::models::{ChainKind, HandlerContract, TransferKey, TransferStatus};
    use ferry_core::ports::DomainRepository;
    use ferry_core::services::{CorrelationPolicy, StridePolicy};
    use ferry_core::testing::{
        FixedPriceOracle, InMemoryRepositories, deposit_payload, resource_id, test_domain,
    };

    const DOMAIN: u8 = 1;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            past_events_window: 10,
            live_events_step: 5,
            retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(4),
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn indexer(
        source: &ScriptedLogSource,
        store: &InMemoryRepositories,
        config: SchedulerConfig,
    ) -> EvmIndexer<ScriptedLogSource> {
        let repositories: Arc<dyn Repositories> = Arc::new(store.clone());
        let engine = Arc::new(CorrelationEngine::new(
            repositories.clone(),
            Arc::new(FixedPriceOracle::new([("USDC", 1.0), ("ETH", 2000.0)])),
            CorrelationPolicy::default(),
        ));
        EvmIndexer::new(
            test_domain(DOMAIN, ChainKind::Evm),
            config,
            Arc::new(source.clone()),
            repositories,
            engine,
        )
        .unwrap()
    }

    fn key(nonce: u64, from: u8, to: u8) -> TransferKey {
        TransferKey {
            deposit_nonce: nonce,
            from_domain_id: from,
            to_domain_id: to,
        }
    }

    async fn checkpoint(store: &InMemoryRepositories) -> Option<u64> {
        store.last_indexed_block(DOMAIN).await.unwrap()
    }

    #[test]
    fn test_watched_contracts_include_fee_handlers() {
        let mut domain = test_domain(DOMAIN, ChainKind::Evm);
        domain.fee_handlers = vec![
            HandlerContract {
                kind: "basic".into(),
                address: format!("0x{}", "9e".repeat(20)),
            },
            HandlerContract {
                kind: "percentage".into(),
                address: domain.bridge.clone(),
            },
        ];

        let contracts = watched_contracts(&domain).unwrap();
        assert_eq!(contracts.len(), 2);
        assert_eq!(contracts[1], Address::repeat_byte(0x9e));
    }

    #[test]
    fn test_invalid_bridge_address_is_rejected() {
        let mut domain = test_domain(DOMAIN, ChainKind::Evm);
        domain.bridge = "0xnothex".into();
        assert!(matches!(
            watched_contracts(&domain),
            Err(EvmError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_process_range_persists_deposit_with_fee() {
        let source = ScriptedLogSource::new(100);
        let store = InMemoryRepositories::new();
        source.set_timestamp(40, 1_700_000_000).await;
        let payload = deposit_payload(3_000_000_000_000_000_000, &[0x33; 20]);
        source
            .add_logs(vec![
                deposit_log(40, 2, 0xaa, 2, resource_id(1), 5, &payload),
                fee_log(40, 3, 0xaa, 2, resource_id(1), 500_000_000_000_000, NATIVE_TOKEN_ADDRESS),
            ])
            .await;

        let indexer = indexer(&source, &store, config());
        indexer.process_range(35, 44).await.unwrap();

        assert_eq!(checkpoint(&store).await, Some(44));
        assert_eq!(source.log_requests().await, vec![(35, 44)]);

        let transfer = store.transfer(&key(5, DOMAIN, 2)).await.unwrap();
        assert_eq!(transfer.status, TransferStatus::Pending);
        assert_eq!(transfer.amount.as_deref(), Some("3.0"));
        assert_eq!(transfer.usd_value, Some(3.0));
        assert_eq!(transfer.timestamp.map(|t| t.timestamp()), Some(1_700_000_000));

        let state = store.state().await;
        let fee = &state.fees["1-40-3"];
        assert_eq!(fee.transfer_id, transfer.id);
        assert_eq!(fee.token_symbol, "ETH");
        assert_eq!(fee.decimals, 18);
        assert_eq!(fee.amount, "0.0005");
        assert!(!state.fees.contains_key("1-40-2-legacy"));
    }

    // Test critique: un dépôt EVM sans événement de frais reste sans frais
    #[tokio::test]
    async fn test_deposit_without_fee_gets_no_inferred_fee() {
        let source = ScriptedLogSource::new(100);
        let store = InMemoryRepositories::new();
        let payload = deposit_payload(1_000_000_000_000_000_000, &[0x33; 20]);
        source
            .add_logs(vec![deposit_log(41, 0, 0xaa, 2, resource_id(1), 7, &payload)])
            .await;

        let indexer = indexer(&source, &store, config());
        indexer.process_range(40, 41).await.unwrap();

        assert!(store.transfer(&key(7, DOMAIN, 2)).await.is_some());
        let state = store.state().await;
        assert!(state.fees.is_empty());
        assert!(!state.fees.contains_key("1-41-0-legacy"));
    }

    // Test critique: exécution et échec sur la destination
    #[tokio::test]
    async fn test_process_range_correlates_destination_events() {
        let source = ScriptedLogSource::new(100);
        let store = InMemoryRepositories::new();
        source
            .add_logs(vec![
                execution_log(50, 0, 0xbb, 3, 8),
                failed_execution_log(51, 0, 0xcc, 3, 9, b"revert"),
            ])
            .await;

        let indexer = indexer(&source, &store, config());
        indexer.process_range(50, 51).await.unwrap();

        let executed = store.transfer(&key(8, 3, DOMAIN)).await.unwrap();
        assert_eq!(executed.status, TransferStatus::Executed);
        let failed = store.transfer(&key(9, 3, DOMAIN)).await.unwrap();
        assert_eq!(failed.status, TransferStatus::Failed);
        assert_eq!(failed.message.as_deref(), Some("revert"));
    }

    #[tokio::test]
    async fn test_undecodable_log_does_not_block_checkpoint() {
        let source = ScriptedLogSource::new(100);
        let store = InMemoryRepositories::new();
        let payload = deposit_payload(1, &[0x33; 20]);
        let mut broken = deposit_log(40, 0, 0xaa, 2, resource_id(1), 1, &payload);
        broken.data = Vec::new().into();
        source
            .add_logs(vec![
                broken,
                deposit_log(41, 0, 0xbb, 2, resource_id(1), 2, &payload),
            ])
            .await;

        let indexer = indexer(&source, &store, config());
        indexer.process_range(40, 41).await.unwrap();

        assert_eq!(checkpoint(&store).await, Some(41));
        assert!(store.transfer(&key(1, DOMAIN, 2)).await.is_none());
        assert!(store.transfer(&key(2, DOMAIN, 2)).await.is_some());
    }

    // Test critique: une fenêtre en échec est rejouée sans sauter de bloc
    #[tokio::test]
    async fn test_failed_window_is_retried_from_same_block() {
        let source = ScriptedLogSource::new(25);
        let store = InMemoryRepositories::new();
        source.fail_log_calls(1).await;
        let indexer = indexer(&source, &store, config());
        let (_tx, mut rx) = watch::channel(false);

        let next = indexer.catch_up(0, &mut rx).await.unwrap();
        assert_eq!(next, 26);
        assert_eq!(
            source.log_requests().await,
            vec![(0, 9), (0, 9), (10, 19), (20, 25)]
        );
        let writes: Vec<u64> = store
            .state()
            .await
            .checkpoint_writes
            .iter()
            .map(|(_, b)| *b)
            .collect();
        assert_eq!(writes, vec![9, 19, 25]);
    }

    // Test critique: un checkpoint non écrit fait rejouer la fenêtre, sans doublon
    #[tokio::test]
    async fn test_checkpoint_failure_replays_window() {
        let source = ScriptedLogSource::new(9);
        let store = InMemoryRepositories::new();
        store.fail_next_checkpoints(1).await;
        let payload = deposit_payload(1_000_000_000_000_000_000, &[0x33; 20]);
        source
            .add_logs(vec![deposit_log(3, 0, 0xaa, 2, resource_id(1), 6, &payload)])
            .await;
        let indexer = indexer(&source, &store, config());
        let (_tx, mut rx) = watch::channel(false);

        assert_eq!(indexer.catch_up(0, &mut rx).await.unwrap(), 10);
        assert_eq!(source.log_requests().await, vec![(0, 9), (0, 9)]);

        let state = store.state().await;
        assert_eq!(state.checkpoint_writes, vec![(DOMAIN, 9)]);
        assert_eq!(state.deposits.len(), 1);
        assert!(state.deposits.contains_key("1-3-0"));
    }

    #[tokio::test]
    async fn test_timestamp_failure_retries_window() {
        let source = ScriptedLogSource::new(9);
        let store = InMemoryRepositories::new();
        source.fail_timestamps(1).await;
        source
            .add_logs(vec![execution_log(4, 0, 0xbb, 3, 8)])
            .await;
        let indexer = indexer(&source, &store, config());
        let (_tx, mut rx) = watch::channel(false);

        assert_eq!(indexer.catch_up(0, &mut rx).await.unwrap(), 10);
        assert_eq!(source.log_requests().await, vec![(0, 9), (0, 9)]);
        assert!(store.transfer(&key(8, 3, DOMAIN)).await.is_some());
    }

    // Test critique: un nœud bloqué produit un timeout au lieu de figer le suivi
    #[tokio::test]
    async fn test_stalled_head_poll_times_out() {
        let source = ScriptedLogSource::new(10);
        let store = InMemoryRepositories::new();
        source.stall_heads().await;
        let indexer = indexer(
            &source,
            &store,
            SchedulerConfig {
                rpc_timeout: Duration::from_millis(20),
                ..config()
            },
        );

        let mut heads = indexer.subscribe_heads().await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(2), heads.next())
            .await
            .expect("head poll must not hang");
        assert!(matches!(next, Some(Err(ChainError::Timeout { .. }))));
    }

    // Test critique: le suivi en direct interroge la tête et avance par pas
    #[tokio::test]
    async fn test_follow_live_polls_heads() {
        let source = ScriptedLogSource::new(10);
        let store = InMemoryRepositories::new();
        source.push_heads(vec![12, 16, 16, 23]).await;
        let indexer = indexer(
            &source,
            &store,
            SchedulerConfig {
                stride_policy: StridePolicy::AtLeast,
                ..config()
            },
        );
        let (tx, mut rx) = watch::channel(false);

        let follow = indexer.follow_live(11, &mut rx);
        let stop = async {
            while checkpoint(&store).await != Some(23) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(follow, stop);
        assert!(matches!(result, Err(IndexerError::ShutdownRequested)));

        // 12 is below the stride, 16 covers 11..=16, 23 covers 17..=23.
        assert_eq!(source.log_requests().await, vec![(11, 16), (17, 23)]);
    }
}
