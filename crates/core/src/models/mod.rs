//! Domain models for indexed bridge activity.
//!
//! These models are storage-agnostic and represent the canonical
//! form of indexed data within the domain layer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Numeric bridge domain identifier (`uint8` on chain).
pub type DomainId = u8;

// =============================================================================
// 32-byte Identifier Types
// =============================================================================

/// Macro to generate 32-byte newtypes serialized as 0x-prefixed hex.
///
/// Generates:
/// - `from_hex()` - Parse from hex string (with or without 0x prefix, any case)
/// - `to_hex()` - Convert to lowercase 0x-prefixed hex string
/// - `Display` trait implementation
/// - `From<[u8; 32]>` implementation
/// - hex string `Serialize`/`Deserialize`
macro_rules! hash32_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Convert to 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hash32_newtype!(
    /// Cross-chain asset key (`bytes32` resource ID).
    ResourceId
);

hash32_newtype!(
    /// 32-byte Substrate block hash.
    BlockHash
);

// =============================================================================
// Registry Data
// =============================================================================

/// Kind of chain a domain runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainKind {
    #[serde(rename = "ethereum", alias = "evm")]
    Evm,
    #[serde(rename = "substrate")]
    Substrate,
}

impl ChainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Evm => "evm",
            ChainKind::Substrate => "substrate",
        }
    }
}

/// One bridgeable asset on one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub resource_id: ResourceId,
    /// Asset type as published ("erc20", "erc721", ...).
    pub kind: String,
    /// Chain-local token address (EVM) or asset location (Substrate).
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Handler or fee handler contract on an EVM domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerContract {
    pub kind: String,
    pub address: String,
}

/// One indexed (or referenced) chain.
///
/// Immutable at runtime; built by [`crate::registry::DomainRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub name: String,
    pub kind: ChainKind,
    /// Bridge contract address (EVM only, empty on Substrate).
    pub bridge: String,
    pub native_token_symbol: String,
    pub native_token_decimals: u8,
    /// Blocks to stay behind the reported head.
    pub block_confirmations: u64,
    pub start_block: u64,
    pub resources: Vec<Resource>,
    pub handlers: Vec<HandlerContract>,
    pub fee_router: Option<String>,
    pub fee_handlers: Vec<HandlerContract>,
    /// RPC endpoint; domains without one are referenced but not indexed.
    pub rpc_url: Option<String>,
}

impl Domain {
    /// Look up a resource by its identifier.
    pub fn resource(&self, resource_id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.resource_id == resource_id)
    }

    /// Fresh resource map for one block's processing.
    pub fn resource_map(&self) -> HashMap<ResourceId, Resource> {
        self.resources
            .iter()
            .map(|r| (r.resource_id, r.clone()))
            .collect()
    }

    pub fn is_indexable(&self) -> bool {
        self.rpc_url.is_some()
    }
}

// =============================================================================
// Transfers
// =============================================================================

/// Lifecycle status of a transfer. `Executed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Executed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Executed => "executed",
            TransferStatus::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        !matches!(self, TransferStatus::Executed) || next == TransferStatus::Executed
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "executed" => Ok(TransferStatus::Executed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(format!("unknown transfer status: {other}")),
        }
    }
}

/// Natural key of a transfer: (deposit nonce, origin, destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferKey {
    pub deposit_nonce: u64,
    pub from_domain_id: DomainId,
    pub to_domain_id: DomainId,
}

impl TransferKey {
    /// Deterministic transfer id derived from the natural key.
    pub fn transfer_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.from_domain_id, self.to_domain_id, self.deposit_nonce
        )
    }
}

/// Canonical cross-chain transfer aggregate.
///
/// Placeholders created from an execution carry only the key and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub key: TransferKey,
    pub status: TransferStatus,
    pub amount: Option<String>,
    pub resource_id: Option<ResourceId>,
    pub sender: Option<String>,
    pub destination: Option<String>,
    pub usd_value: Option<f64>,
    /// Failure message for failed transfers.
    pub message: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Transfer {
    /// Placeholder built from an execution or failed-execution sighting.
    pub fn placeholder(key: TransferKey, status: TransferStatus, message: Option<String>) -> Self {
        Self {
            id: key.transfer_id(),
            key,
            status,
            amount: None,
            resource_id: None,
            sender: None,
            destination: None,
            usd_value: None,
            message,
            timestamp: None,
        }
    }
}

/// Fields written by a deposit onto its transfer (create or complete).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositTransfer {
    pub key: TransferKey,
    pub amount: String,
    pub resource_id: ResourceId,
    pub sender: String,
    pub destination: String,
    pub usd_value: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

// =============================================================================
// Event Records
// =============================================================================

/// One on-chain deposit observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    /// `{domain}-{block}-{event_index}`.
    pub id: String,
    pub transfer_id: String,
    /// Transaction hash (EVM) or `{block}-{extrinsic}` (Substrate).
    pub tx_identifier: String,
    pub block_number: u64,
    pub transfer_type: String,
    /// Hex encoded deposit payload.
    pub deposit_data: String,
    /// Hex encoded handler response.
    pub handler_response: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One proposal execution or failed handler execution observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub transfer_id: String,
    pub tx_identifier: String,
    pub block_number: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One collected (or inferred) bridge fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub id: String,
    /// Empty when no deposit of the same transaction was seen in the block.
    pub transfer_id: String,
    pub token_symbol: String,
    pub token_address: String,
    pub decimals: u8,
    pub amount: String,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_hex_roundtrip() {
        let hex = "0x0000000000000000000000000000000000000000000000000000000000000300";
        let id = ResourceId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
    }

    #[test]
    fn resource_id_is_case_insensitive() {
        let lower = ResourceId::from_hex(&format!("0x{}", "ab".repeat(32))).unwrap();
        let upper = ResourceId::from_hex(&format!("0x{}", "AB".repeat(32))).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn resource_id_serde_as_hex_string() {
        let id = ResourceId([0x01; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "01".repeat(32)));
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn hash32_invalid_length() {
        assert!(BlockHash::from_hex("0x1234").is_err());
    }

    #[test]
    fn transfer_id_from_natural_key() {
        let key = TransferKey {
            deposit_nonce: 5,
            from_domain_id: 1,
            to_domain_id: 2,
        };
        assert_eq!(key.transfer_id(), "1-2-5");
    }

    // Test critique: executed est terminal
    #[test]
    fn executed_status_is_terminal() {
        assert!(!TransferStatus::Executed.can_transition_to(TransferStatus::Failed));
        assert!(!TransferStatus::Executed.can_transition_to(TransferStatus::Pending));
        assert!(TransferStatus::Pending.can_transition_to(TransferStatus::Executed));
        assert!(TransferStatus::Failed.can_transition_to(TransferStatus::Executed));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            TransferStatus::Pending,
            TransferStatus::Executed,
            TransferStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TransferStatus>().unwrap(), status);
        }
        assert!("unknown".parse::<TransferStatus>().is_err());
    }
}
