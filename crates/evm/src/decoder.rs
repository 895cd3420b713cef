//! Decoding of raw bridge logs into typed events.
//!
//! Every log of a window is decoded on its own future and the futures are
//! joined, so one malformed log never hides its siblings. Block timestamps
//! are fetched at most once per block and shared between the logs of that
//! block. A timestamp lookup that fails is a chain error for the whole
//! window; a log that cannot be decoded only lands in [`DecodedLogs::errors`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ethers::abi::{Log as AbiLog, ParamType, RawLog, Token, decode as abi_decode};
use ethers::types::{Address, Log, U256};
use futures::future::join_all;
use tokio::sync::OnceCell;

use ferry_core::error::ChainResult;
use ferry_core::events::{
    BlockEvents, BridgeEvent, DepositEvent, EventFamily, EventMeta, FailedHandlerExecutionEvent,
    FeeCollectedEvent, ProposalExecutionEvent,
};
use ferry_core::models::{Domain, ResourceId};
use ferry_core::payload::{error_message, format_units};
use ferry_core::services::with_timeout;

use crate::abi::BridgeAbi;
use crate::client::LogSource;
use crate::error::{DecodeResult, LogDecodeError};

/// Fee token address meaning "the chain's native token".
pub const NATIVE_TOKEN_ADDRESS: Address = Address::zero();

/// Selector of `Error(string)` revert data.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

// =============================================================================
// DecodedLogs
// =============================================================================

/// A log that could not be turned into a bridge event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFailure {
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub error: LogDecodeError,
}

/// Decoded events of one window, each family in log order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedLogs {
    pub deposits: Vec<DepositEvent>,
    pub proposal_executions: Vec<ProposalExecutionEvent>,
    pub failed_executions: Vec<FailedHandlerExecutionEvent>,
    pub fees: Vec<FeeCollectedEvent>,
    pub errors: Vec<LogFailure>,
}

impl DecodedLogs {
    fn push(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Deposit(e) => self.deposits.push(e),
            BridgeEvent::ProposalExecution(e) => self.proposal_executions.push(e),
            BridgeEvent::FailedHandlerExecution(e) => self.failed_executions.push(e),
            BridgeEvent::FeeCollected(e) => self.fees.push(e),
        }
    }

    /// Number of decoded events.
    pub fn len(&self) -> usize {
        self.deposits.len()
            + self.proposal_executions.len()
            + self.failed_executions.len()
            + self.fees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Group events by block, ascending.
    pub fn into_blocks(self) -> BTreeMap<u64, BlockEvents> {
        let mut blocks: BTreeMap<u64, BlockEvents> = BTreeMap::new();
        let mut push = |event: BridgeEvent| {
            let number = event.meta().block_number;
            blocks
                .entry(number)
                .or_insert_with(|| BlockEvents::new(number))
                .push(event);
        };

        self.proposal_executions
            .into_iter()
            .for_each(|e| push(BridgeEvent::ProposalExecution(e)));
        self.deposits
            .into_iter()
            .for_each(|e| push(BridgeEvent::Deposit(e)));
        self.fees
            .into_iter()
            .for_each(|e| push(BridgeEvent::FeeCollected(e)));
        self.failed_executions
            .into_iter()
            .for_each(|e| push(BridgeEvent::FailedHandlerExecution(e)));

        blocks
    }
}

// =============================================================================
// Window decoding
// =============================================================================

/// Decode the logs of one window.
///
/// Fails only when a block timestamp cannot be read; decoding failures are
/// collected per log.
pub async fn decode_logs<L: LogSource + ?Sized>(
    source: &L,
    abi: &BridgeAbi,
    domain: &Domain,
    logs: &[Log],
    rpc_timeout: Duration,
) -> ChainResult<DecodedLogs> {
    let timestamps: HashMap<u64, OnceCell<Option<DateTime<Utc>>>> = logs
        .iter()
        .filter_map(|log| log.block_number)
        .map(|n| (n.as_u64(), OnceCell::new()))
        .collect();

    let timestamps = &timestamps;
    let tasks = logs.iter().map(|log| async move {
        let meta = match event_meta(log) {
            Ok(meta) => meta,
            Err(error) => return Ok(Err(failure(log, error))),
        };
        let cell = timestamps.get(&meta.block_number);
        let timestamp = match cell {
            Some(cell) => *cell
                .get_or_try_init(|| async {
                    let secs = with_timeout(
                        rpc_timeout,
                        "block_timestamp",
                        source.block_timestamp(meta.block_number),
                    )
                    .await?;
                    ChainResult::Ok(
                        secs.and_then(|s| i64::try_from(s).ok())
                            .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)),
                    )
                })
                .await?,
            None => None,
        };

        let meta = EventMeta { timestamp, ..meta };
        ChainResult::Ok(decode_log(abi, domain, log, meta).map_err(|error| failure(log, error)))
    });

    let mut decoded = DecodedLogs::default();
    for result in join_all(tasks).await {
        match result? {
            Ok(event) => decoded.push(event),
            Err(failed) => decoded.errors.push(failed),
        }
    }
    Ok(decoded)
}

fn failure(log: &Log, error: LogDecodeError) -> LogFailure {
    LogFailure {
        block_number: log.block_number.map(|n| n.as_u64()),
        log_index: log.log_index.map(|i| i.low_u64()),
        error,
    }
}

/// Position of the log, without timestamp.
fn event_meta(log: &Log) -> DecodeResult<EventMeta> {
    let block_number = log
        .block_number
        .ok_or(LogDecodeError::MissingMetadata("block number"))?
        .as_u64();
    let tx_hash = log
        .transaction_hash
        .ok_or(LogDecodeError::MissingMetadata("transaction hash"))?;
    let log_index = log
        .log_index
        .ok_or(LogDecodeError::MissingMetadata("log index"))?;
    if log_index > U256::from(u32::MAX) {
        return Err(LogDecodeError::InvalidField {
            event: "log",
            field: "logIndex",
            reason: format!("{log_index} does not fit in u32"),
        });
    }

    Ok(EventMeta {
        block_number,
        event_index: log_index.low_u32(),
        tx_identifier: format!("{tx_hash:#x}"),
        timestamp: None,
    })
}

// =============================================================================
// Single log decoding
// =============================================================================

/// Decode one log whose position is already known.
pub fn decode_log(
    abi: &BridgeAbi,
    domain: &Domain,
    log: &Log,
    meta: EventMeta,
) -> DecodeResult<BridgeEvent> {
    let topic0 = log
        .topics
        .first()
        .ok_or(LogDecodeError::MissingMetadata("topic0"))?;
    let family = abi
        .family_of(topic0)
        .ok_or(LogDecodeError::UnknownTopic(*topic0))?;
    let event = family.event_name();

    let parsed = abi
        .event(family)
        .parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })
        .map_err(|e| LogDecodeError::Abi {
            event,
            reason: e.to_string(),
        })?;
    let params = Params {
        event,
        log: &parsed,
    };

    Ok(match family {
        EventFamily::Deposit => {
            let resource_id = ResourceId(params.bytes32("resourceID")?);
            let transfer_type = domain
                .resource(&resource_id)
                .map(|r| transfer_type(&r.kind))
                .unwrap_or("fungible");
            BridgeEvent::Deposit(DepositEvent {
                meta,
                destination_domain_id: params.u8("destinationDomainID")?,
                resource_id,
                deposit_nonce: params.u64("depositNonce")?,
                sender: format!("{:#x}", params.address("user")?),
                transfer_type: transfer_type.to_string(),
                deposit_data: params.bytes("data")?,
                handler_response: params.bytes("handlerResponse")?,
            })
        }
        EventFamily::ProposalExecution => {
            BridgeEvent::ProposalExecution(ProposalExecutionEvent {
                meta,
                origin_domain_id: params.u8("originDomainID")?,
                deposit_nonce: params.u64("depositNonce")?,
                data_hash: format!("0x{}", hex::encode(params.bytes32("dataHash")?)),
            })
        }
        EventFamily::FailedHandlerExecution => {
            BridgeEvent::FailedHandlerExecution(FailedHandlerExecutionEvent {
                meta,
                origin_domain_id: params.u8("originDomainID")?,
                deposit_nonce: params.u64("depositNonce")?,
                error: revert_reason(&params.bytes("lowLevelData")?),
            })
        }
        EventFamily::FeeCollected => {
            let resource_id = ResourceId(params.bytes32("resourceID")?);
            let token = params.address("tokenAddress")?;
            let fee = params.uint("fee")?;
            let (token_symbol, decimals) = if token == NATIVE_TOKEN_ADDRESS {
                (
                    Some(domain.native_token_symbol.clone()),
                    Some(domain.native_token_decimals),
                )
            } else {
                match domain.resource(&resource_id) {
                    Some(r) => (Some(r.symbol.clone()), Some(r.decimals)),
                    None => (None, None),
                }
            };
            let fee_amount = match decimals {
                Some(decimals) => {
                    let mut word = [0u8; 32];
                    fee.to_big_endian(&mut word);
                    format_units(primitive_types::U256::from_big_endian(&word), decimals)
                        .map_err(|e| params.invalid("fee", e.to_string()))?
                }
                None => fee.to_string(),
            };
            BridgeEvent::FeeCollected(FeeCollectedEvent {
                meta,
                destination_domain_id: params.u8("destinationDomainID")?,
                resource_id,
                fee_amount,
                fee_payer: format!("{:#x}", params.address("sender")?),
                token_address: format!("{token:#x}"),
                token_symbol,
                decimals,
            })
        }
    })
}

/// Transfer type of a deposit, from the resource kind.
pub fn transfer_type(resource_kind: &str) -> &'static str {
    match resource_kind {
        "erc721" => "nonfungible",
        "erc1155" => "semifungible",
        "permissionedGeneric" | "permissionlessGeneric" => "generic",
        _ => "fungible",
    }
}

/// Readable revert reason from handler low-level data.
///
/// `Error(string)` payloads are unwrapped; anything else goes through
/// [`error_message`].
pub fn revert_reason(data: &[u8]) -> String {
    if data.len() > 4 && data[..4] == ERROR_STRING_SELECTOR {
        if let Ok(tokens) = abi_decode(&[ParamType::String], &data[4..])
            && let Some(Token::String(reason)) = tokens.into_iter().next()
        {
            return reason;
        }
    }
    error_message(data)
}

/// Typed access to the parameters of a parsed log.
struct Params<'a> {
    event: &'static str,
    log: &'a AbiLog,
}

impl Params<'_> {
    fn get(&self, field: &'static str) -> DecodeResult<&Token> {
        self.log
            .params
            .iter()
            .find(|p| p.name == field)
            .map(|p| &p.value)
            .ok_or_else(|| self.invalid(field, "missing parameter".to_string()))
    }

    fn invalid(&self, field: &'static str, reason: String) -> LogDecodeError {
        LogDecodeError::InvalidField {
            event: self.event,
            field,
            reason,
        }
    }

    fn uint(&self, field: &'static str) -> DecodeResult<U256> {
        match self.get(field)? {
            Token::Uint(v) => Ok(*v),
            other => Err(self.invalid(field, format!("expected uint, got {other:?}"))),
        }
    }

    fn u64(&self, field: &'static str) -> DecodeResult<u64> {
        let v = self.uint(field)?;
        if v > U256::from(u64::MAX) {
            return Err(self.invalid(field, format!("{v} does not fit in u64")));
        }
        Ok(v.as_u64())
    }

    fn u8(&self, field: &'static str) -> DecodeResult<u8> {
        let v = self.u64(field)?;
        u8::try_from(v).map_err(|_| self.invalid(field, format!("{v} does not fit in u8")))
    }

    fn bytes32(&self, field: &'static str) -> DecodeResult<[u8; 32]> {
        match self.get(field)? {
            Token::FixedBytes(b) => <[u8; 32]>::try_from(b.as_slice())
                .map_err(|_| self.invalid(field, format!("expected 32 bytes, got {}", b.len()))),
            other => Err(self.invalid(field, format!("expected bytes32, got {other:?}"))),
        }
    }

    fn bytes(&self, field: &'static str) -> DecodeResult<Vec<u8>> {
        match self.get(field)? {
            Token::Bytes(b) => Ok(b.clone()),
            other => Err(self.invalid(field, format!("expected bytes, got {other:?}"))),
        }
    }

    fn address(&self, field: &'static str) -> DecodeResult<Address> {
        match self.get(field)? {
            Token::Address(a) => Ok(*a),
            other => Err(self.invalid(field, format!("expected address, got {other:?}"))),
        }
    }
}
