//! Substrate domain indexer.
//!
//! Walks blocks one by one: fetch the hash, read the full event list,
//! extract bridge events, correlate them, then checkpoint the block.
//! The block timestamp is only read for blocks carrying bridge events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::error::{ChainError, ChainResult, IndexerResult};
use crate::extract::{extract_block, has_bridge_events};
use crate::metrics::{record_block_indexed, record_decode_error};
use crate::models::Domain;
use crate::ports::{HeadStream, Repositories, SubstrateSource};
use crate::services::{ChainIndexer, CorrelationEngine, SchedulerConfig, with_timeout};

/// Indexer for one Substrate domain.
pub struct SubstrateIndexer<S: SubstrateSource> {
    domain: Domain,
    config: SchedulerConfig,
    source: Arc<S>,
    repositories: Arc<dyn Repositories>,
    engine: Arc<CorrelationEngine>,
}

impl<S: SubstrateSource + 'static> SubstrateIndexer<S> {
    pub fn new(
        domain: Domain,
        config: SchedulerConfig,
        source: Arc<S>,
        repositories: Arc<dyn Repositories>,
        engine: Arc<CorrelationEngine>,
    ) -> Self {
        Self {
            domain,
            config,
            source,
            repositories,
            engine,
        }
    }

    /// Index a single block and checkpoint it.
    async fn process_block(&self, number: u64) -> IndexerResult<()> {
        let timeout = self.config.rpc_timeout;

        let hash = with_timeout(timeout, "block_hash", self.source.block_hash(number))
            .await?
            .ok_or(ChainError::BlockNotFound(number))?;
        let raw_events = with_timeout(timeout, "events_at", self.source.events_at(&hash)).await?;

        if has_bridge_events(&raw_events) {
            let timestamp = with_timeout(timeout, "timestamp_at", self.source.timestamp_at(&hash))
                .await?
                .and_then(|ms| i64::try_from(ms).ok())
                .and_then(DateTime::<Utc>::from_timestamp_millis);

            let (events, errors) = extract_block(number, timestamp, &raw_events);
            for e in &errors {
                warn!(block = number, error = %e, "⚠️  Failed to decode bridge event");
                record_decode_error(&self.domain.name, "event");
            }

            if !events.is_empty() {
                let outcome = self.engine.process_block(&self.domain, &events).await;
                debug!(
                    block = number,
                    persisted = outcome.persisted,
                    skipped = outcome.skipped,
                    failed = outcome.failed,
                    "Bridge events processed"
                );
            }
        } else {
            trace!(block = number, events = raw_events.len(), "No bridge events");
        }

        self.commit_checkpoint(number).await?;
        record_block_indexed(&self.domain.name);
        Ok(())
    }
}

#[async_trait]
impl<S: SubstrateSource + 'static> ChainIndexer for SubstrateIndexer<S> {
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
        self.source.current_head().await
    }

    async fn subscribe_heads(&self) -> ChainResult<HeadStream> {
        self.source.subscribe_heads().await
    }

    async fn process_range(&self, from: u64, to: u64) -> IndexerResult<()> {
        for number in from..=to {
            self.process_block(number).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::watch;

    use super::*;
    use crate::error::IndexerError;
    use crate::extract::BRIDGE_PALLET;
    use crate::models::{ChainKind, TransferKey, TransferStatus};
    use crate::ports::{DomainRepository, RawEvent};
    use crate::services::{CorrelationPolicy, StridePolicy};
    use crate::testing::{
        FixedPriceOracle, InMemoryRepositories, ScriptedSubstrateSource, deposit_payload,
        test_domain,
    };

    const DOMAIN: u8 = 3;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            past_events_window: 10,
            live_events_step: 5,
            retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(4),
            ..Default::default()
        }
    }

    fn indexer(
        source: &ScriptedSubstrateSource,
        store: &InMemoryRepositories,
        config: SchedulerConfig,
    ) -> SubstrateIndexer<ScriptedSubstrateSource> {
        let repositories: Arc<dyn Repositories> = Arc::new(store.clone());
        let engine = Arc::new(CorrelationEngine::new(
            repositories.clone(),
            Arc::new(FixedPriceOracle::new([("USDC", 1.0)])),
            CorrelationPolicy::default(),
        ));
        SubstrateIndexer::new(
            test_domain(DOMAIN, ChainKind::Substrate),
            config,
            Arc::new(source.clone()),
            repositories,
            engine,
        )
    }

    fn deposit_event(index: u32, extrinsic: u32, nonce: u64) -> RawEvent {
        let payload = deposit_payload(2_000_000_000_000_000_000, &[0x11; 20]);
        RawEvent {
            index,
            extrinsic_index: Some(extrinsic),
            pallet: BRIDGE_PALLET.to_string(),
            name: "Deposit".to_string(),
            data: json!({
                "dest_domain_id": 1,
                "resource_id": format!("0x{}01", "00".repeat(31)),
                "deposit_nonce": nonce.to_string(),
                "sender": format!("0x{}", "d4".repeat(32)),
                "transfer_type": "FungibleTransfer",
                "deposit_data": format!("0x{}", hex::encode(payload)),
                "handler_response": "0x",
            }),
        }
    }

    async fn checkpoint(store: &InMemoryRepositories) -> Option<u64> {
        store.last_indexed_block(DOMAIN).await.unwrap()
    }

    #[tokio::test]
    async fn test_process_range_indexes_bridge_events() {
        let source = ScriptedSubstrateSource::new(20);
        let store = InMemoryRepositories::new();
        source.set_events(7, vec![deposit_event(4, 2, 11)]).await;
        source.set_timestamp(7, 1_700_000_000_000).await;

        let indexer = indexer(&source, &store, config());
        indexer.process_range(5, 9).await.unwrap();

        assert_eq!(checkpoint(&store).await, Some(9));
        let key = TransferKey {
            deposit_nonce: 11,
            from_domain_id: DOMAIN,
            to_domain_id: 1,
        };
        let transfer = store.transfer(&key).await.unwrap();
        assert_eq!(transfer.status, TransferStatus::Pending);
        assert_eq!(transfer.amount.as_deref(), Some("2.0"));
        assert_eq!(transfer.timestamp.map(|t| t.timestamp()), Some(1_700_000_000));

        let state = store.state().await;
        assert_eq!(state.deposits["3-7-4"].tx_identifier, "7-2");
        // Substrate chains without fee events get an inferred fee.
        assert_eq!(state.fees["3-7-4-legacy"].amount, "50");
    }

    #[tokio::test]
    async fn test_unknown_block_fails_range() {
        let source = ScriptedSubstrateSource::new(5);
        let store = InMemoryRepositories::new();
        let indexer = indexer(&source, &store, config());

        let result = indexer.process_range(4, 6).await;
        assert!(matches!(
            result,
            Err(IndexerError::Chain(ChainError::BlockNotFound(6)))
        ));
        assert_eq!(checkpoint(&store).await, Some(5));
    }

    #[tokio::test]
    async fn test_resume_from_checkpoint() {
        let source = ScriptedSubstrateSource::new(100);
        let store = InMemoryRepositories::new();
        let mut indexer = indexer(&source, &store, config());
        indexer.domain.start_block = 10;
        let (_tx, mut rx) = watch::channel(false);

        // Aucun checkpoint: départ au bloc configuré
        assert_eq!(indexer.resume(&mut rx).await.unwrap(), 10);

        store.update_last_indexed_block(DOMAIN, 50).await.unwrap();
        assert_eq!(indexer.resume(&mut rx).await.unwrap(), 51);

        store.update_last_indexed_block(DOMAIN, 4).await.unwrap();
        assert_eq!(indexer.resume(&mut rx).await.unwrap(), 51);
    }

    #[tokio::test]
    async fn test_resume_registers_domain() {
        let source = ScriptedSubstrateSource::new(100);
        let store = InMemoryRepositories::new();
        store.update_last_indexed_block(DOMAIN, 20).await.unwrap();
        let indexer = indexer(&source, &store, config());
        let (_tx, mut rx) = watch::channel(false);

        assert_eq!(indexer.resume(&mut rx).await.unwrap(), 21);
        assert!(store.state().await.domains.contains_key(&DOMAIN));
    }

    // Test critique: une fenêtre en échec est rejouée sans sauter de bloc
    #[tokio::test]
    async fn test_failed_window_is_retried_from_same_block() {
        let source = ScriptedSubstrateSource::new(30);
        let store = InMemoryRepositories::new();
        source.fail_block(15, 1).await;
        let indexer = indexer(&source, &store, config());
        let (_tx, mut rx) = watch::channel(false);

        let next = indexer.catch_up(0, &mut rx).await.unwrap();
        assert_eq!(next, 31);
        assert_eq!(checkpoint(&store).await, Some(30));

        let fetched = source.fetched_blocks().await;
        for block in 0..=30 {
            assert!(fetched.contains(&block), "block {block} was skipped");
        }
        // Window 10..=19 replayed from its first block.
        assert_eq!(fetched.iter().filter(|b| **b == 10).count(), 2);
        assert_eq!(fetched.iter().filter(|b| **b == 15).count(), 1);

        let writes = store.state().await.checkpoint_writes.clone();
        assert_eq!(writes.iter().filter(|(_, b)| *b == 19).count(), 1);
        assert_eq!(writes.iter().filter(|(_, b)| *b == 30).count(), 1);
    }

    // Test critique: le checkpoint stocké ne recule jamais
    #[tokio::test]
    async fn test_checkpoint_is_monotonic_across_replays() {
        let source = ScriptedSubstrateSource::new(30);
        let store = InMemoryRepositories::new();
        let indexer = indexer(&source, &store, config());

        indexer.process_range(0, 20).await.unwrap();
        indexer.process_range(5, 8).await.unwrap();
        assert_eq!(checkpoint(&store).await, Some(20));
    }

    #[tokio::test]
    async fn test_catch_up_respects_confirmations() {
        let source = ScriptedSubstrateSource::new(30);
        let store = InMemoryRepositories::new();
        let mut indexer = indexer(&source, &store, config());
        indexer.domain.block_confirmations = 6;
        let (_tx, mut rx) = watch::channel(false);

        let next = indexer.catch_up(0, &mut rx).await.unwrap();
        assert_eq!(next, 25);
        assert_eq!(checkpoint(&store).await, Some(24));
    }

    #[tokio::test]
    async fn test_catch_up_stops_on_shutdown() {
        let source = ScriptedSubstrateSource::new(30);
        let store = InMemoryRepositories::new();
        let indexer = indexer(&source, &store, config());
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let result = indexer.catch_up(0, &mut rx).await;
        assert!(matches!(result, Err(IndexerError::ShutdownRequested)));
        assert_eq!(checkpoint(&store).await, None);
    }

    // Test critique: le suivi en direct avance par pas et rattrape les têtes manquées
    #[tokio::test]
    async fn test_follow_live_processes_strides() {
        let source = ScriptedSubstrateSource::new(10);
        let store = InMemoryRepositories::new();
        source.push_subscription(vec![11, 13, 15, 16, 22]).await;
        let indexer = indexer(&source, &store, config());
        let (tx, mut rx) = watch::channel(false);

        let follow = indexer.follow_live(11, &mut rx);
        let stop = async {
            // Let the scripted subscription drain, then stop the loop.
            while checkpoint(&store).await != Some(22) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(follow, stop);
        assert!(matches!(result, Err(IndexerError::ShutdownRequested)));

        let fetched = source.fetched_blocks().await;
        assert_eq!(fetched, (11..=22).collect::<Vec<_>>());
        let writes: Vec<u64> = store
            .state()
            .await
            .checkpoint_writes
            .iter()
            .map(|(_, b)| *b)
            .collect();
        assert_eq!(writes, (11..=22).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_follow_live_exact_policy_skips_misaligned_heads() {
        let source = ScriptedSubstrateSource::new(10);
        let store = InMemoryRepositories::new();
        source.push_subscription(vec![14, 16, 15, 21, 20]).await;
        let indexer = indexer(
            &source,
            &store,
            SchedulerConfig {
                stride_policy: StridePolicy::Exact,
                ..config()
            },
        );
        let (tx, mut rx) = watch::channel(false);

        let follow = indexer.follow_live(11, &mut rx);
        let stop = async {
            while checkpoint(&store).await != Some(20) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(follow, stop);
        assert!(matches!(result, Err(IndexerError::ShutdownRequested)));

        // 14, 16 and 21 never line up with a stride boundary.
        let writes: Vec<u64> = store
            .state()
            .await
            .checkpoint_writes
            .iter()
            .map(|(_, b)| *b)
            .collect();
        assert_eq!(writes, (11..=20).collect::<Vec<_>>());
    }
}
