//! Substrate RPC client with dynamic metadata decoding.

use async_trait::async_trait;
use futures::StreamExt;
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::rpc::RpcClient;
use subxt::utils::H256;
use subxt::{OnlineClient, PolkadotConfig};
use tracing::{debug, instrument, warn};

use ferry_core::error::{ChainError, ChainResult};
use ferry_core::metrics::record_decode_error;
use ferry_core::models::BlockHash;
use ferry_core::ports::{BlockMode, HeadStream, RawEvent, SubstrateSource};

/// Configuration for the Substrate client.
#[derive(Debug, Clone)]
pub struct SubstrateClientConfig {
    /// WebSocket URL (e.g., "ws://localhost:9944").
    pub ws_url: String,
    /// Domain name, used as metrics label.
    pub domain: String,
    pub block_mode: BlockMode,
}

impl Default for SubstrateClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:9944".to_string(),
            domain: String::new(),
            block_mode: BlockMode::Finalized,
        }
    }
}

/// Substrate client adapter implementing the SubstrateSource port.
///
/// Uses the legacy RPC backend: historical blocks are addressed by number
/// through `chain_getBlockHash`, which the chainHead API does not offer.
pub struct SubstrateClient {
    client: OnlineClient<PolkadotConfig>,
    rpc: LegacyRpcMethods<PolkadotConfig>,
    config: SubstrateClientConfig,
}

impl SubstrateClient {
    /// Connect to a Substrate node.
    #[instrument(skip_all, fields(url = %config.ws_url))]
    pub async fn connect(config: SubstrateClientConfig) -> ChainResult<Self> {
        debug!("Connecting to node");

        let rpc_client = RpcClient::from_url(&config.ws_url)
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let rpc = LegacyRpcMethods::<PolkadotConfig>::new(rpc_client.clone());
        let client = OnlineClient::<PolkadotConfig>::from_rpc_client(rpc_client)
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        debug!(
            runtime = client.runtime_version().spec_version,
            "Connected successfully"
        );

        Ok(Self {
            client,
            rpc,
            config,
        })
    }
}

#[async_trait]
impl SubstrateSource for SubstrateClient {
    async fn current_head(&self) -> ChainResult<u64> {
        let at = match self.config.block_mode {
            BlockMode::Finalized => Some(
                self.rpc
                    .chain_get_finalized_head()
                    .await
                    .map_err(|e| ChainError::RpcError(e.to_string()))?,
            ),
            BlockMode::Best => None,
        };

        let header = self
            .rpc
            .chain_get_header(at)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?
            .ok_or_else(|| ChainError::RpcError("node returned no head header".to_string()))?;

        Ok(u64::from(header.number))
    }

    async fn block_hash(&self, number: u64) -> ChainResult<Option<BlockHash>> {
        let hash = self
            .rpc
            .chain_get_block_hash(Some(number.into()))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        Ok(hash.map(|h| BlockHash(h.0)))
    }

    async fn events_at(&self, hash: &BlockHash) -> ChainResult<Vec<RawEvent>> {
        let events = self
            .client
            .events()
            .at(H256(hash.0))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        Ok(decode_events(&events, H256(hash.0), &self.config.domain))
    }

    async fn timestamp_at(&self, hash: &BlockHash) -> ChainResult<Option<u64>> {
        let address = subxt::dynamic::storage("Timestamp", "Now", ());
        let value = self
            .client
            .storage()
            .at(H256(hash.0))
            .fetch(&address)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        let Some(value) = value else {
            return Ok(None);
        };
        let value = value
            .to_value()
            .map_err(|e| ChainError::DecodeError(e.to_string()))?;

        Ok(value.as_u128().and_then(|ms| u64::try_from(ms).ok()))
    }

    async fn subscribe_heads(&self) -> ChainResult<HeadStream> {
        let blocks = self.client.blocks();
        let subscription = match self.config.block_mode {
            BlockMode::Finalized => blocks.subscribe_finalized().await,
            BlockMode::Best => blocks.subscribe_best().await,
        }
        .map_err(|e| ChainError::SubscriptionError(e.to_string()))?;

        let stream = subscription.map(|result| {
            result
                .map(|block| u64::from(block.number()))
                .map_err(|e| ChainError::SubscriptionError(e.to_string()))
        });

        Ok(Box::pin(stream))
    }
}

// =============================================================================
// Event decoding helpers
// =============================================================================

/// Decode every event of a block to pallet, variant and JSON fields.
fn decode_events(
    events: &subxt::events::Events<PolkadotConfig>,
    block_hash: H256,
    domain: &str,
) -> Vec<RawEvent> {
    let mut raw_events = Vec::new();

    for (index, event) in events.iter().enumerate() {
        match event {
            Ok(ev) => {
                let data = ev
                    .field_values()
                    .map(|composite| composite_to_json(&composite))
                    .unwrap_or(serde_json::Value::Null);

                let extrinsic_index = match ev.phase() {
                    subxt::events::Phase::ApplyExtrinsic(idx) => Some(idx),
                    _ => None,
                };

                raw_events.push(RawEvent {
                    index: index as u32,
                    extrinsic_index,
                    pallet: ev.pallet_name().to_string(),
                    name: ev.variant_name().to_string(),
                    data,
                });
            }
            Err(e) => {
                warn!(
                    domain,
                    block_hash = ?block_hash,
                    index,
                    error = %e,
                    "⚠️  Failed to decode event"
                );
                record_decode_error(domain, "event");
            }
        }
    }

    raw_events
}

// =============================================================================
// SCALE Value to JSON conversion
// =============================================================================

use subxt::ext::scale_value::{Composite, Primitive, Value, ValueDef};

/// Convert a Composite to a JSON value.
fn composite_to_json<T>(composite: &Composite<T>) -> serde_json::Value {
    match composite {
        Composite::Unnamed(values) => {
            // Check if this looks like a byte array (e.g., AccountId, ResourceId)
            if let Some(hex_str) = try_as_byte_array(values) {
                return serde_json::Value::String(hex_str);
            }
            // Unwrap single-element tuples (common for newtype wrappers like AccountId)
            if values.len() == 1 {
                return value_to_json(&values[0]);
            }
            serde_json::Value::Array(values.iter().map(value_to_json).collect())
        }
        Composite::Named(fields) => {
            let obj: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(name, v)| (name.clone(), value_to_json(v)))
                .collect();
            serde_json::Value::Object(obj)
        }
    }
}

/// Try to interpret an unnamed composite as a fixed byte array.
/// Returns a hex string if the composite looks like a byte array, None otherwise.
fn try_as_byte_array<T>(values: &[Value<T>]) -> Option<String> {
    // 32 (AccountId, ResourceId, H256), 20 (EthAddress), 64 (signatures)
    let len = values.len();
    if len != 32 && len != 20 && len != 64 {
        return None;
    }

    let mut bytes = Vec::with_capacity(len);
    for value in values {
        match &value.value {
            ValueDef::Primitive(Primitive::U128(n)) if *n <= 255 => bytes.push(*n as u8),
            _ => return None,
        }
    }

    Some(format!("0x{}", hex::encode(bytes)))
}

/// Convert a Value to a JSON value.
fn value_to_json<T>(value: &Value<T>) -> serde_json::Value {
    value_def_to_json(&value.value)
}

/// Convert a ValueDef to a JSON value.
fn value_def_to_json<T>(value: &ValueDef<T>) -> serde_json::Value {
    match value {
        ValueDef::Composite(composite) => composite_to_json(composite),
        ValueDef::Variant(variant) => {
            let variant_name = &variant.name;
            let inner = composite_to_json(&variant.values);

            match variant_name.as_str() {
                "None" => serde_json::Value::Null,
                // Option and AccountId wrappers carry a single value
                "Some" | "Id" => match inner {
                    serde_json::Value::Array(mut arr) if arr.len() == 1 => arr.remove(0),
                    other => other,
                },
                _ => {
                    let mut map = serde_json::Map::new();
                    map.insert(variant_name.clone(), inner);
                    serde_json::Value::Object(map)
                }
            }
        }
        ValueDef::Primitive(primitive) => primitive_to_json(primitive),
        ValueDef::BitSequence(bits) => serde_json::Value::String(format!("{:?}", bits)),
    }
}

/// Convert a Primitive to a JSON value.
///
/// Integers are rendered as strings: balances and nonces can exceed the
/// JSON safe integer range.
fn primitive_to_json(primitive: &Primitive) -> serde_json::Value {
    match primitive {
        Primitive::Bool(b) => serde_json::Value::Bool(*b),
        Primitive::Char(c) => serde_json::Value::String(c.to_string()),
        Primitive::String(s) => serde_json::Value::String(s.clone()),
        Primitive::U128(n) => serde_json::Value::String(n.to_string()),
        Primitive::I128(n) => serde_json::Value::String(n.to_string()),
        Primitive::U256(n) => serde_json::Value::String(format!("{:?}", n)),
        Primitive::I256(n) => serde_json::Value::String(format!("{:?}", n)),
    }
}
