//! Typed bridge events shared by the EVM decoder and the Substrate extractor.
//!
//! Both chain kinds produce the same four event families; the correlation
//! engine only ever sees these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DomainId, ResourceId};

/// The four bridge event families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFamily {
    Deposit,
    ProposalExecution,
    FailedHandlerExecution,
    FeeCollected,
}

impl EventFamily {
    /// Every family, in the order the correlation engine processes them.
    pub const PROCESSING_ORDER: [EventFamily; 4] = [
        EventFamily::ProposalExecution,
        EventFamily::Deposit,
        EventFamily::FeeCollected,
        EventFamily::FailedHandlerExecution,
    ];

    /// On-chain event name (identical for the EVM contract and the pallet).
    pub fn event_name(&self) -> &'static str {
        match self {
            EventFamily::Deposit => "Deposit",
            EventFamily::ProposalExecution => "ProposalExecution",
            EventFamily::FailedHandlerExecution => "FailedHandlerExecution",
            EventFamily::FeeCollected => "FeeCollected",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::PROCESSING_ORDER
            .into_iter()
            .find(|f| f.event_name() == name)
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFamily::Deposit => "deposit",
            EventFamily::ProposalExecution => "proposal_execution",
            EventFamily::FailedHandlerExecution => "failed_handler_execution",
            EventFamily::FeeCollected => "fee_collected",
        }
    }
}

/// Where an event was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub block_number: u64,
    /// Log index (EVM) or event index (Substrate) within the block.
    pub event_index: u32,
    /// Transaction hash (EVM) or `{block}-{extrinsic}` (Substrate).
    pub tx_identifier: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventMeta {
    /// Deterministic record id: `{block}-{event_index}`.
    pub fn record_id(&self) -> String {
        format!("{}-{}", self.block_number, self.event_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub meta: EventMeta,
    pub destination_domain_id: DomainId,
    pub resource_id: ResourceId,
    pub deposit_nonce: u64,
    pub sender: String,
    pub transfer_type: String,
    pub deposit_data: Vec<u8>,
    pub handler_response: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalExecutionEvent {
    pub meta: EventMeta,
    pub origin_domain_id: DomainId,
    pub deposit_nonce: u64,
    pub data_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedHandlerExecutionEvent {
    pub meta: EventMeta,
    pub origin_domain_id: DomainId,
    pub deposit_nonce: u64,
    /// Human readable revert reason.
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeCollectedEvent {
    pub meta: EventMeta,
    pub destination_domain_id: DomainId,
    pub resource_id: ResourceId,
    /// Fee amount as a decimal string.
    pub fee_amount: String,
    pub fee_payer: String,
    pub token_address: String,
    /// Already resolved by the decoder (EVM native fees); otherwise taken
    /// from the resource.
    pub token_symbol: Option<String>,
    pub decimals: Option<u8>,
}

/// One decoded bridge event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeEvent {
    Deposit(DepositEvent),
    ProposalExecution(ProposalExecutionEvent),
    FailedHandlerExecution(FailedHandlerExecutionEvent),
    FeeCollected(FeeCollectedEvent),
}

impl BridgeEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            BridgeEvent::Deposit(e) => &e.meta,
            BridgeEvent::ProposalExecution(e) => &e.meta,
            BridgeEvent::FailedHandlerExecution(e) => &e.meta,
            BridgeEvent::FeeCollected(e) => &e.meta,
        }
    }

    pub fn family(&self) -> EventFamily {
        match self {
            BridgeEvent::Deposit(_) => EventFamily::Deposit,
            BridgeEvent::ProposalExecution(_) => EventFamily::ProposalExecution,
            BridgeEvent::FailedHandlerExecution(_) => EventFamily::FailedHandlerExecution,
            BridgeEvent::FeeCollected(_) => EventFamily::FeeCollected,
        }
    }
}

/// One block's bridge events partitioned by family, each in original order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockEvents {
    pub block_number: u64,
    pub proposal_executions: Vec<ProposalExecutionEvent>,
    pub deposits: Vec<DepositEvent>,
    pub fees: Vec<FeeCollectedEvent>,
    pub failed_executions: Vec<FailedHandlerExecutionEvent>,
}

impl BlockEvents {
    pub fn new(block_number: u64) -> Self {
        Self {
            block_number,
            ..Default::default()
        }
    }

    /// Partition `events` preserving their relative order within each family.
    pub fn from_events(block_number: u64, events: impl IntoIterator<Item = BridgeEvent>) -> Self {
        let mut block = Self::new(block_number);
        for event in events {
            block.push(event);
        }
        block
    }

    pub fn push(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Deposit(e) => self.deposits.push(e),
            BridgeEvent::ProposalExecution(e) => self.proposal_executions.push(e),
            BridgeEvent::FailedHandlerExecution(e) => self.failed_executions.push(e),
            BridgeEvent::FeeCollected(e) => self.fees.push(e),
        }
    }

    pub fn len(&self) -> usize {
        self.proposal_executions.len()
            + self.deposits.len()
            + self.fees.len()
            + self.failed_executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
