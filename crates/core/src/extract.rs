//! Substrate bridge event extraction.
//!
//! Given a block's full raw event list, select the events emitted by the
//! bridge pallet and cast them into typed [`BridgeEvent`]s. Substrate
//! events carry no transaction hash, so the pseudo transaction identifier
//! `"{block}-{extrinsic_index}"` is synthesized from the event phase.

use chrono::{DateTime, Utc};

use crate::error::{DomainError, DomainResult};
use crate::events::{
    BlockEvents, BridgeEvent, DepositEvent, EventFamily, EventMeta, FailedHandlerExecutionEvent,
    FeeCollectedEvent, ProposalExecutionEvent,
};
use crate::models::{DomainId, ResourceId};
use crate::payload::{error_message, normalize_nonce};
use crate::ports::RawEvent;

/// Pallet emitting bridge events.
pub const BRIDGE_PALLET: &str = "SygmaBridge";

/// Events of one family, in block order.
pub fn events_of_family(events: &[RawEvent], family: EventFamily) -> Vec<&RawEvent> {
    events
        .iter()
        .filter(|e| e.pallet == BRIDGE_PALLET && e.name == family.event_name())
        .collect()
}

/// Whether any event in the block belongs to the bridge pallet.
pub fn has_bridge_events(events: &[RawEvent]) -> bool {
    events
        .iter()
        .any(|e| e.pallet == BRIDGE_PALLET && EventFamily::from_event_name(&e.name).is_some())
}

/// Extract and type every bridge event of a block.
///
/// Returns the partitioned events and one error per event that failed to
/// decode; a bad event never hides its siblings.
pub fn extract_block(
    block_number: u64,
    timestamp: Option<DateTime<Utc>>,
    events: &[RawEvent],
) -> (BlockEvents, Vec<DomainError>) {
    let mut block = BlockEvents::new(block_number);
    let mut errors = Vec::new();

    for family in EventFamily::PROCESSING_ORDER {
        for raw in events_of_family(events, family) {
            match decode_event(raw, family, block_number, timestamp) {
                Ok(event) => block.push(event),
                Err(e) => errors.push(e),
            }
        }
    }

    (block, errors)
}

/// Cast one raw bridge event of `family`.
pub fn decode_event(
    raw: &RawEvent,
    family: EventFamily,
    block_number: u64,
    timestamp: Option<DateTime<Utc>>,
) -> DomainResult<BridgeEvent> {
    let extrinsic = raw.extrinsic_index.ok_or_else(|| {
        DomainError::DecodingError(format!(
            "{} event {} has no extrinsic phase",
            raw.name, raw.index
        ))
    })?;

    let meta = EventMeta {
        block_number,
        event_index: raw.index,
        tx_identifier: format!("{block_number}-{extrinsic}"),
        timestamp,
    };
    let data = &raw.data;

    let event = match family {
        EventFamily::Deposit => BridgeEvent::Deposit(DepositEvent {
            meta,
            destination_domain_id: required(data, &["dest_domain_id", "destDomainId"], 0, parse_domain_id, "dest_domain_id")?,
            resource_id: required(data, &["resource_id", "resourceId"], 1, parse_resource_id, "resource_id")?,
            deposit_nonce: required(data, &["deposit_nonce", "depositNonce"], 2, parse_nonce, "deposit_nonce")?,
            sender: required(data, &["sender"], 3, parse_address, "sender")?,
            transfer_type: extract_field(data, &["transfer_type", "transferType"], 4, parse_transfer_type)
                .unwrap_or_else(|| "fungible".to_string()),
            deposit_data: required(data, &["deposit_data", "depositData"], 5, parse_bytes, "deposit_data")?,
            handler_response: extract_field(data, &["handler_response", "handlerResponse"], 6, parse_bytes)
                .unwrap_or_default(),
        }),
        EventFamily::ProposalExecution => BridgeEvent::ProposalExecution(ProposalExecutionEvent {
            meta,
            origin_domain_id: required(data, &["origin_domain_id", "originDomainId"], 0, parse_domain_id, "origin_domain_id")?,
            deposit_nonce: required(data, &["deposit_nonce", "depositNonce"], 1, parse_nonce, "deposit_nonce")?,
            data_hash: extract_field(data, &["data_hash", "dataHash"], 2, parse_bytes)
                .map(|b| format!("0x{}", hex::encode(b)))
                .unwrap_or_default(),
        }),
        EventFamily::FailedHandlerExecution => {
            BridgeEvent::FailedHandlerExecution(FailedHandlerExecutionEvent {
                meta,
                error: extract_field(data, &["error"], 0, parse_bytes)
                    .map(|b| error_message(&b))
                    .unwrap_or_default(),
                origin_domain_id: required(data, &["origin_domain_id", "originDomainId"], 1, parse_domain_id, "origin_domain_id")?,
                deposit_nonce: required(data, &["deposit_nonce", "depositNonce"], 2, parse_nonce, "deposit_nonce")?,
            })
        }
        EventFamily::FeeCollected => BridgeEvent::FeeCollected(FeeCollectedEvent {
            meta,
            fee_payer: extract_field(data, &["fee_payer", "feePayer"], 0, parse_address)
                .unwrap_or_default(),
            destination_domain_id: required(data, &["dest_domain_id", "destDomainId"], 1, parse_domain_id, "dest_domain_id")?,
            resource_id: required(data, &["resource_id", "resourceId"], 2, parse_resource_id, "resource_id")?,
            fee_amount: required(data, &["fee_amount", "feeAmount"], 3, parse_amount, "fee_amount")?,
            token_address: field(data, &["fee_asset_id", "feeAssetId"], 4)
                .map(|v| v.to_string())
                .unwrap_or_default(),
            token_symbol: None,
            decimals: None,
        }),
    };

    Ok(event)
}

// =============================================================================
// Event field extraction
// =============================================================================

fn field<'a>(data: &'a serde_json::Value, keys: &[&str], index: usize) -> Option<&'a serde_json::Value> {
    keys.iter()
        .find_map(|key| data.get(*key))
        .or_else(|| data.get(index))
}

/// Extract a field from event data, trying multiple key names and falling back to index.
///
/// Field names follow the runtime metadata (snake_case); camelCase names
/// produced by some JSON renderers are accepted too. Unnamed events are
/// read positionally.
pub fn extract_field<T>(
    data: &serde_json::Value,
    keys: &[&str],
    index: usize,
    parser: fn(&serde_json::Value) -> Option<T>,
) -> Option<T> {
    field(data, keys, index).and_then(parser)
}

fn required<T>(
    data: &serde_json::Value,
    keys: &[&str],
    index: usize,
    parser: fn(&serde_json::Value) -> Option<T>,
    name: &str,
) -> DomainResult<T> {
    extract_field(data, keys, index, parser)
        .ok_or_else(|| DomainError::DecodingError(format!("missing or invalid field `{name}`")))
}

// =============================================================================
// Field parsers
// =============================================================================

/// Parse an integer rendered as a number or a (possibly comma separated) string.
pub fn parse_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => normalize_nonce(s).ok(),
        _ => None,
    }
}

fn parse_nonce(value: &serde_json::Value) -> Option<u64> {
    parse_u64(value)
}

pub fn parse_domain_id(value: &serde_json::Value) -> Option<DomainId> {
    parse_u64(value).and_then(|v| v.try_into().ok())
}

/// Parse a u128 amount into its decimal string.
///
/// JSON numbers are limited to u64 but balances can be u128, so string
/// representations are common.
pub fn parse_amount(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(|v| v.to_string()),
        serde_json::Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| *c != ',').collect();
            cleaned.parse::<u128>().ok().map(|v| v.to_string())
        }
        _ => None,
    }
}

/// Parse arbitrary bytes from JSON.
///
/// Handles:
/// - Hex string: `"0x1234..."`
/// - Byte array: `[b0, b1, ...]` with numeric or string elements
/// - Newtype wrapper: `[[b0, b1, ...]]`
pub fn parse_bytes(value: &serde_json::Value) -> Option<Vec<u8>> {
    match value {
        serde_json::Value::String(s) => {
            let hex_str = s.strip_prefix("0x").unwrap_or(s);
            hex::decode(hex_str).ok()
        }
        serde_json::Value::Array(arr) => {
            if let [inner @ serde_json::Value::Array(_)] = arr.as_slice() {
                return parse_bytes(inner);
            }
            arr.iter().map(parse_byte).collect()
        }
        _ => None,
    }
}

fn parse_byte(value: &serde_json::Value) -> Option<u8> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|v| v.try_into().ok()),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Parse a 32-byte resource identifier.
pub fn parse_resource_id(value: &serde_json::Value) -> Option<ResourceId> {
    let bytes: [u8; 32] = parse_bytes(value)?.try_into().ok()?;
    Some(ResourceId(bytes))
}

/// Parse an account as a 0x-prefixed hex string.
///
/// Handles hex strings, byte arrays and `{ "Id": .. }` wrappers.
pub fn parse_address(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(obj) => obj
            .get("Id")
            .or_else(|| obj.get("id"))
            .and_then(parse_address),
        other => {
            let bytes = parse_bytes(other)?;
            if bytes.is_empty() {
                return None;
            }
            Some(format!("0x{}", hex::encode(bytes)))
        }
    }
}

/// Parse the transfer type enum (`"FungibleTransfer"` or `{"FungibleTransfer": []}`).
pub fn parse_transfer_type(value: &serde_json::Value) -> Option<String> {
    let variant = match value {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(obj) if obj.len() == 1 => obj.keys().next()?.as_str(),
        _ => return None,
    };
    Some(
        match variant {
            "FungibleTransfer" => "fungible",
            "NonFungibleTransfer" => "nonfungible",
            "GenericTransfer" => "generic",
            other => other,
        }
        .to_string(),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(index: u32, extrinsic: Option<u32>, name: &str, data: serde_json::Value) -> RawEvent {
        RawEvent {
            index,
            extrinsic_index: extrinsic,
            pallet: BRIDGE_PALLET.to_string(),
            name: name.to_string(),
            data,
        }
    }

    fn resource_hex() -> String {
        format!("0x{}", "00".repeat(31) + "01")
    }

    fn deposit(index: u32, extrinsic: u32, nonce: &str) -> RawEvent {
        let mut payload = vec!["0"; 31];
        payload.push("1");
        raw(
            index,
            Some(extrinsic),
            "Deposit",
            json!({
                "dest_domain_id": "2",
                "resource_id": resource_hex(),
                "deposit_nonce": nonce,
                "sender": format!("0x{}", "d4".repeat(32)),
                "transfer_type": { "FungibleTransfer": [] },
                "deposit_data": payload,
                "handler_response": [],
            }),
        )
    }

    #[test]
    fn test_extract_preserves_order_and_tx_identifier() {
        let events = vec![
            RawEvent {
                index: 0,
                extrinsic_index: Some(0),
                pallet: "System".into(),
                name: "ExtrinsicSuccess".into(),
                data: json!({}),
            },
            deposit(1, 2, "7"),
            deposit(2, 3, "1,024"),
            raw(3, Some(3), "ProposalExecution", json!({
                "origin_domain_id": "1", "deposit_nonce": "9", "data_hash": "0xaa"
            })),
        ];

        let (block, errors) = extract_block(100, None, &events);
        assert!(errors.is_empty());

        let nonces: Vec<u64> = block.deposits.iter().map(|d| d.deposit_nonce).collect();
        assert_eq!(nonces, vec![7, 1024]);
        assert_eq!(block.deposits[0].meta.tx_identifier, "100-2");
        assert_eq!(block.deposits[1].meta.tx_identifier, "100-3");
        assert_eq!(block.deposits[0].transfer_type, "fungible");
        assert_eq!(block.deposits[0].deposit_data.len(), 32);
        assert_eq!(block.proposal_executions[0].deposit_nonce, 9);
        assert_eq!(block.proposal_executions[0].origin_domain_id, 1);
    }

    #[test]
    fn test_event_without_phase_is_decode_error() {
        let mut event = deposit(1, 0, "1");
        event.extrinsic_index = None;
        let (block, errors) = extract_block(5, None, &[event, deposit(2, 1, "2")]);
        assert_eq!(errors.len(), 1);
        assert_eq!(block.deposits.len(), 1);
        assert_eq!(block.deposits[0].deposit_nonce, 2);
    }

    #[test]
    fn test_camel_case_fields_accepted() {
        let event = raw(0, Some(1), "FeeCollected", json!({
            "feePayer": format!("0x{}", "aa".repeat(32)),
            "destDomainId": 2,
            "resourceId": resource_hex(),
            "feeAmount": "1,000",
            "feeAssetId": { "Concrete": { "parents": 0 } },
        }));
        let decoded = decode_event(&event, EventFamily::FeeCollected, 10, None).unwrap();
        let BridgeEvent::FeeCollected(fee) = decoded else {
            panic!("expected fee event");
        };
        assert_eq!(fee.fee_amount, "1000");
        assert_eq!(fee.destination_domain_id, 2);
        assert!(fee.token_address.contains("Concrete"));
    }

    #[test]
    fn test_failed_handler_execution_error_text() {
        let error: Vec<String> = b"transfer failed".iter().map(|b| b.to_string()).collect();
        let event = raw(4, Some(2), "FailedHandlerExecution", json!({
            "error": error, "origin_domain_id": "1", "deposit_nonce": "5"
        }));
        let (block, errors) = extract_block(11, None, &[event]);
        assert!(errors.is_empty());
        assert_eq!(block.failed_executions[0].error, "transfer failed");
    }

    #[test]
    fn test_positional_fields() {
        let event = raw(0, Some(1), "ProposalExecution", json!(["3", "12", "0x01"]));
        let decoded = decode_event(&event, EventFamily::ProposalExecution, 1, None).unwrap();
        assert!(matches!(
            decoded,
            BridgeEvent::ProposalExecution(ProposalExecutionEvent { origin_domain_id: 3, deposit_nonce: 12, .. })
        ));
    }

    #[test]
    fn test_missing_field_is_reported() {
        let event = raw(0, Some(1), "Deposit", json!({ "dest_domain_id": "2" }));
        let err = decode_event(&event, EventFamily::Deposit, 1, None).unwrap_err();
        assert!(err.to_string().contains("resource_id"));
    }

    #[test]
    fn test_has_bridge_events() {
        assert!(has_bridge_events(&[deposit(0, 0, "1")]));
        let mut other = deposit(0, 0, "1");
        other.pallet = "Balances".into();
        assert!(!has_bridge_events(&[other]));
    }

    #[test]
    fn test_parse_bytes_variants() {
        assert_eq!(parse_bytes(&json!("0xdeadbeef")), Some(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(parse_bytes(&json!([1, 2, 3])), Some(vec![1, 2, 3]));
        assert_eq!(parse_bytes(&json!(["1", "255"])), Some(vec![1, 255]));
        assert_eq!(parse_bytes(&json!([[4, 5]])), Some(vec![4, 5]));
        assert_eq!(parse_bytes(&json!([256])), None);
    }

    #[test]
    fn test_parse_address_wrapped_id() {
        let hex = format!("0x{}", "ef".repeat(32));
        assert_eq!(parse_address(&json!({ "Id": hex.clone() })), Some(hex));
        assert_eq!(parse_address(&json!("not_hex")), None);
    }

    #[test]
    fn test_parse_domain_id_range() {
        assert_eq!(parse_domain_id(&json!("255")), Some(255));
        assert_eq!(parse_domain_id(&json!(256)), None);
    }
}
