//! Correlation & persistence engine.
//!
//! Joins deposit, execution and fee events of one block onto transfer
//! aggregates and writes them through the store. Families are processed
//! in a fixed order: proposal executions, deposits (each followed by the
//! legacy fee check), fees, failed handler executions. Legacy fees are only
//! inferred on Substrate domains; EVM bridges always emit `FeeCollected`.
//!
//! Every event is persisted independently; a failure is logged and
//! counted, and processing continues with the next event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error, instrument, trace, warn};

use crate::error::{DomainError, DomainResult};
use crate::events::{
    BlockEvents, DepositEvent, EventFamily, EventMeta, FailedHandlerExecutionEvent, FeeCollectedEvent,
    ProposalExecutionEvent,
};
use crate::metrics::{record_event_skipped, record_handler_error, record_price_lookup_failure};
use crate::models::{
    ChainKind, Deposit, DepositTransfer, Domain, DomainId, Execution, Fee, Resource, ResourceId,
    TransferKey, TransferStatus,
};
use crate::payload::{decode_amount, destination_address};
use crate::ports::{PriceOracle, Repositories};

// =============================================================================
// Configuration
// =============================================================================

/// Policy knobs of the correlation engine.
#[derive(Debug, Clone)]
pub struct CorrelationPolicy {
    /// Destination domains whose deposits and fees are skipped.
    pub blacklist: HashSet<DomainId>,
    /// Symbol recorded on fees inferred for chains without fee events.
    pub legacy_fee_symbol: String,
    /// Amount recorded on inferred fees.
    pub legacy_fee_amount: String,
}

impl Default for CorrelationPolicy {
    fn default() -> Self {
        Self {
            blacklist: HashSet::new(),
            legacy_fee_symbol: "PHA".to_string(),
            legacy_fee_amount: "50".to_string(),
        }
    }
}

impl CorrelationPolicy {
    pub fn with_blacklist(mut self, blacklist: impl IntoIterator<Item = DomainId>) -> Self {
        self.blacklist = blacklist.into_iter().collect();
        self
    }

    /// Parse a comma separated list of domain ids (`"3,5"`). Blank entries are ignored.
    pub fn parse_blacklist(raw: &str) -> DomainResult<HashSet<DomainId>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<DomainId>().map_err(|_| {
                    DomainError::ValidationError(format!("invalid blacklisted domain id: {s}"))
                })
            })
            .collect()
    }

    pub fn is_blacklisted(&self, domain_id: DomainId) -> bool {
        self.blacklist.contains(&domain_id)
    }
}

/// What happened to one block's events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    /// Events written to the store.
    pub persisted: usize,
    /// Events skipped by policy (blacklist) or ignored as stale.
    pub skipped: usize,
    /// Events whose persistence failed.
    pub failed: usize,
    /// Fees synthesized for legacy deposits.
    pub synthesized_fees: usize,
}

enum Handled {
    Persisted,
    Ignored,
}

// =============================================================================
// CorrelationEngine
// =============================================================================

pub struct CorrelationEngine {
    repositories: Arc<dyn Repositories>,
    prices: Arc<dyn PriceOracle>,
    policy: CorrelationPolicy,
}

impl CorrelationEngine {
    pub fn new(
        repositories: Arc<dyn Repositories>,
        prices: Arc<dyn PriceOracle>,
        policy: CorrelationPolicy,
    ) -> Self {
        Self {
            repositories,
            prices,
            policy,
        }
    }

    /// Correlate and persist one block's events observed on `domain`.
    ///
    /// Never fails: per-event errors are logged and counted in the outcome.
    #[instrument(skip_all, fields(domain = %domain.name, block = events.block_number))]
    pub async fn process_block(&self, domain: &Domain, events: &BlockEvents) -> BlockOutcome {
        let mut outcome = BlockOutcome::default();
        // Both maps live for this block only.
        let mut transfer_map: HashMap<String, String> = HashMap::new();
        let resource_map = domain.resource_map();

        for execution in &events.proposal_executions {
            let result = self.save_proposal_execution(domain, execution).await;
            self.tally(&mut outcome, EventFamily::ProposalExecution, result);
        }

        let legacy_fees =
            domain.kind == ChainKind::Substrate && events.fees.len() != events.deposits.len();
        let fee_txs: HashSet<&str> = events
            .fees
            .iter()
            .map(|f| f.meta.tx_identifier.as_str())
            .collect();

        for deposit in &events.deposits {
            if self.policy.is_blacklisted(deposit.destination_domain_id) {
                debug!(
                    destination = deposit.destination_domain_id,
                    nonce = deposit.deposit_nonce,
                    "Destination domain is blacklisted, skipping deposit"
                );
                record_event_skipped("blacklisted");
                outcome.skipped += 1;
                continue;
            }

            let result = self
                .save_deposit(domain, deposit, &resource_map, &mut transfer_map)
                .await;
            let persisted = result.is_ok();
            self.tally(&mut outcome, EventFamily::Deposit, result);

            if legacy_fees && persisted && !fee_txs.contains(deposit.meta.tx_identifier.as_str()) {
                let result = self.save_legacy_fee(domain, deposit, &transfer_map).await;
                if result.is_ok() {
                    outcome.synthesized_fees += 1;
                }
                self.tally(&mut outcome, EventFamily::FeeCollected, result);
            }
        }

        for fee in &events.fees {
            if self.policy.is_blacklisted(fee.destination_domain_id) {
                debug!(
                    destination = fee.destination_domain_id,
                    tx = %fee.meta.tx_identifier,
                    "Destination domain is blacklisted, skipping fee"
                );
                record_event_skipped("blacklisted");
                outcome.skipped += 1;
                continue;
            }

            let result = self.save_fee(domain, fee, &resource_map, &transfer_map).await;
            self.tally(&mut outcome, EventFamily::FeeCollected, result);
        }

        for failure in &events.failed_executions {
            let result = self.save_failed_handler_execution(domain, failure).await;
            self.tally(&mut outcome, EventFamily::FailedHandlerExecution, result);
        }

        trace!(?outcome, "Block correlated");
        outcome
    }

    fn tally(&self, outcome: &mut BlockOutcome, family: EventFamily, result: DomainResult<Handled>) {
        match result {
            Ok(Handled::Persisted) => outcome.persisted += 1,
            Ok(Handled::Ignored) => outcome.skipped += 1,
            Err(e) => {
                error!(family = family.as_str(), error = %e, "❌ Failed to persist bridge event");
                record_handler_error(family.as_str());
                outcome.failed += 1;
            }
        }
    }

    // =========================================================================
    // Event handlers
    // =========================================================================

    async fn save_proposal_execution(
        &self,
        domain: &Domain,
        event: &ProposalExecutionEvent,
    ) -> DomainResult<Handled> {
        let key = TransferKey {
            deposit_nonce: event.deposit_nonce,
            from_domain_id: event.origin_domain_id,
            to_domain_id: domain.id,
        };
        let transfers = self.repositories.transfers();

        let (transfer_id, created) = match transfers.find(&key).await? {
            None => {
                let transfer = transfers
                    .insert_from_execution(&key, event.meta.timestamp)
                    .await?;
                (transfer.id, true)
            }
            Some(transfer) => {
                if transfer.status != TransferStatus::Executed {
                    transfers
                        .update_status(TransferStatus::Executed, &transfer.id, "")
                        .await?;
                }
                (transfer.id, false)
            }
        };

        let execution = Execution {
            id: record_id(domain, &event.meta),
            transfer_id,
            tx_identifier: event.meta.tx_identifier.clone(),
            block_number: event.meta.block_number,
            timestamp: event.meta.timestamp,
        };
        if created {
            self.repositories.executions().upsert(&execution).await?;
        } else {
            self.repositories.executions().insert(&execution).await?;
        }

        debug!(transfer = %execution.transfer_id, "Proposal execution saved");
        Ok(Handled::Persisted)
    }

    async fn save_deposit(
        &self,
        domain: &Domain,
        event: &DepositEvent,
        resource_map: &HashMap<ResourceId, Resource>,
        transfer_map: &mut HashMap<String, String>,
    ) -> DomainResult<Handled> {
        let resource = resource_map.get(&event.resource_id);
        let amount = decode_amount(&event.deposit_data)?;
        let usd_value = self.usd_value(&amount, resource).await;

        let fields = DepositTransfer {
            key: TransferKey {
                deposit_nonce: event.deposit_nonce,
                from_domain_id: domain.id,
                to_domain_id: event.destination_domain_id,
            },
            amount,
            resource_id: event.resource_id,
            sender: event.sender.clone(),
            destination: destination_address(&event.deposit_data),
            usd_value,
            timestamp: event.meta.timestamp,
        };

        self.repositories
            .accounts()
            .insert_if_absent(&event.sender)
            .await?;
        let transfer = self.repositories.transfers().upsert_by_deposit(&fields).await?;

        let deposit = Deposit {
            id: record_id(domain, &event.meta),
            transfer_id: transfer.id.clone(),
            tx_identifier: event.meta.tx_identifier.clone(),
            block_number: event.meta.block_number,
            transfer_type: event.transfer_type.clone(),
            deposit_data: format!("0x{}", hex::encode(&event.deposit_data)),
            handler_response: format!("0x{}", hex::encode(&event.handler_response)),
            timestamp: event.meta.timestamp,
        };
        self.repositories.deposits().insert(&deposit).await?;

        debug!(transfer = %transfer.id, amount = %fields.amount, "Deposit saved");
        transfer_map.insert(event.meta.tx_identifier.clone(), transfer.id);
        Ok(Handled::Persisted)
    }

    async fn save_legacy_fee(
        &self,
        domain: &Domain,
        deposit: &DepositEvent,
        transfer_map: &HashMap<String, String>,
    ) -> DomainResult<Handled> {
        let fee = Fee {
            id: format!("{}-legacy", record_id(domain, &deposit.meta)),
            transfer_id: transfer_map
                .get(&deposit.meta.tx_identifier)
                .cloned()
                .unwrap_or_default(),
            token_symbol: self.policy.legacy_fee_symbol.clone(),
            token_address: String::new(),
            decimals: 0,
            amount: self.policy.legacy_fee_amount.clone(),
        };
        self.repositories.fees().insert(&fee).await?;

        trace!(transfer = %fee.transfer_id, "Legacy fee inferred");
        Ok(Handled::Persisted)
    }

    async fn save_fee(
        &self,
        domain: &Domain,
        event: &FeeCollectedEvent,
        resource_map: &HashMap<ResourceId, Resource>,
        transfer_map: &HashMap<String, String>,
    ) -> DomainResult<Handled> {
        let transfer_id = transfer_map
            .get(&event.meta.tx_identifier)
            .cloned()
            .unwrap_or_default();
        if transfer_id.is_empty() {
            warn!(tx = %event.meta.tx_identifier, "Fee has no deposit in this block");
        }

        let resource = resource_map.get(&event.resource_id);
        let fee = Fee {
            id: record_id(domain, &event.meta),
            transfer_id,
            token_symbol: event
                .token_symbol
                .clone()
                .or_else(|| resource.map(|r| r.symbol.clone()))
                .unwrap_or_default(),
            token_address: event.token_address.clone(),
            decimals: event
                .decimals
                .or_else(|| resource.map(|r| r.decimals))
                .unwrap_or(0),
            amount: event.fee_amount.clone(),
        };
        self.repositories.fees().insert(&fee).await?;

        Ok(Handled::Persisted)
    }

    async fn save_failed_handler_execution(
        &self,
        domain: &Domain,
        event: &FailedHandlerExecutionEvent,
    ) -> DomainResult<Handled> {
        let key = TransferKey {
            deposit_nonce: event.deposit_nonce,
            from_domain_id: event.origin_domain_id,
            to_domain_id: domain.id,
        };
        let transfers = self.repositories.transfers();

        let transfer_id = match transfers.find(&key).await? {
            Some(transfer) if transfer.status == TransferStatus::Executed => {
                debug!(transfer = %transfer.id, "Transfer already executed, ignoring failure");
                record_event_skipped("already_executed");
                return Ok(Handled::Ignored);
            }
            Some(transfer) => {
                transfers
                    .update_status(TransferStatus::Failed, &transfer.id, &event.error)
                    .await?;
                transfer.id
            }
            None => transfers.insert_failed(&key, &event.error).await?.id,
        };

        let execution = Execution {
            id: record_id(domain, &event.meta),
            transfer_id,
            tx_identifier: event.meta.tx_identifier.clone(),
            block_number: event.meta.block_number,
            timestamp: event.meta.timestamp,
        };
        self.repositories.executions().upsert(&execution).await?;

        debug!(transfer = %execution.transfer_id, error = %event.error, "Failed execution saved");
        Ok(Handled::Persisted)
    }

    /// USD value of `amount`, zero when the resource is unknown or pricing fails.
    async fn usd_value(&self, amount: &str, resource: Option<&Resource>) -> f64 {
        let Some(resource) = resource else {
            warn!(amount, "Unknown resource, recording zero USD value");
            record_price_lookup_failure("unknown");
            return 0.0;
        };

        match self.prices.value_in_usd(amount, &resource.symbol).await {
            Ok(value) => value,
            Err(e) => {
                warn!(symbol = %resource.symbol, error = %e, "⚠️  Price lookup failed, recording zero");
                record_price_lookup_failure(&resource.symbol);
                0.0
            }
        }
    }
}

/// Store id of an event record: `{domain}-{block}-{event_index}`.
fn record_id(domain: &Domain, meta: &EventMeta) -> String {
    format!("{}-{}", domain.id, meta.record_id())
}
