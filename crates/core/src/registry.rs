//! Domain/resource registry built from the shared bridge configuration.
//!
//! The shared configuration is the JSON document published for the bridge
//! (camelCase keys). RPC endpoints come from a separate list keyed by
//! domain id; a domain without an endpoint stays in the registry for
//! resource lookups but is never indexed.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{DomainError, DomainResult};
use crate::models::{ChainKind, Domain, DomainId, HandlerContract, Resource, ResourceId};

// =============================================================================
// Shared Configuration Format
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SharedConfig {
    pub domains: Vec<SharedDomain>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedDomain {
    pub id: DomainId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChainKind,
    #[serde(default)]
    pub bridge: String,
    #[serde(default)]
    pub native_token_symbol: String,
    #[serde(default = "default_native_decimals")]
    pub native_token_decimals: u8,
    #[serde(default)]
    pub block_confirmations: u64,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default)]
    pub resources: Vec<SharedResource>,
    #[serde(default)]
    pub handlers: Vec<SharedHandler>,
    #[serde(default)]
    pub fee_router: Option<String>,
    /// Published as `null` for Substrate domains.
    #[serde(default)]
    pub fee_handlers: Option<Vec<SharedHandler>>,
}

fn default_native_decimals() -> u8 {
    18
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedResource {
    pub resource_id: ResourceId,
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Substrate resources publish an asset location object instead of an address.
    #[serde(default)]
    pub address: serde_json::Value,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SharedHandler {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub address: String,
}

/// One entry of the RPC endpoint list.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcEndpoint {
    pub id: DomainId,
    pub endpoint: String,
}

// =============================================================================
// DomainRegistry
// =============================================================================

/// Static lookup of domains and their resources.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    domains: BTreeMap<DomainId, Domain>,
}

impl DomainRegistry {
    /// Build from already-parsed configuration.
    ///
    /// Fails on duplicate domain ids or a resource id repeated inside a domain.
    pub fn from_shared_config(shared: SharedConfig, rpc: &[RpcEndpoint]) -> DomainResult<Self> {
        let mut domains = BTreeMap::new();

        for d in shared.domains {
            let mut resources: Vec<Resource> = Vec::with_capacity(d.resources.len());
            for r in d.resources {
                if resources.iter().any(|known| known.resource_id == r.resource_id) {
                    return Err(DomainError::ValidationError(format!(
                        "resource {} declared twice on domain {}",
                        r.resource_id, d.id
                    )));
                }
                resources.push(Resource {
                    resource_id: r.resource_id,
                    kind: r.kind,
                    address: match r.address {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    },
                    symbol: r.symbol,
                    decimals: r.decimals,
                });
            }

            let domain = Domain {
                id: d.id,
                name: d.name,
                kind: d.kind,
                bridge: d.bridge,
                native_token_symbol: d.native_token_symbol,
                native_token_decimals: d.native_token_decimals,
                block_confirmations: d.block_confirmations,
                start_block: d.start_block,
                resources,
                handlers: d.handlers.into_iter().map(Into::into).collect(),
                fee_router: d.fee_router.filter(|s| !s.is_empty()),
                fee_handlers: d
                    .fee_handlers
                    .unwrap_or_default()
                    .into_iter()
                    .map(Into::into)
                    .collect(),
                rpc_url: rpc
                    .iter()
                    .find(|e| e.id == d.id)
                    .map(|e| e.endpoint.clone()),
            };

            if domains.insert(domain.id, domain).is_some() {
                return Err(DomainError::ValidationError(format!(
                    "domain {} declared twice",
                    d.id
                )));
            }
        }

        Ok(Self { domains })
    }

    /// Parse both JSON documents and build the registry.
    pub fn from_json(shared_config: &str, rpc_config: &str) -> DomainResult<Self> {
        let shared: SharedConfig = serde_json::from_str(shared_config)
            .map_err(|e| DomainError::DecodingError(format!("shared config: {e}")))?;
        let rpc: Vec<RpcEndpoint> = if rpc_config.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(rpc_config)
                .map_err(|e| DomainError::DecodingError(format!("rpc config: {e}")))?
        };
        Self::from_shared_config(shared, &rpc)
    }

    pub fn domain(&self, id: DomainId) -> Option<&Domain> {
        self.domains.get(&id)
    }

    /// Resource `resource_id` as declared on domain `domain_id`.
    pub fn resource(&self, domain_id: DomainId, resource_id: &ResourceId) -> Option<&Resource> {
        self.domain(domain_id)?.resource(resource_id)
    }

    /// Domains that have an RPC endpoint, in id order.
    pub fn indexable(&self) -> impl Iterator<Item = &Domain> {
        self.domains.values().filter(|d| d.is_indexable())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Domain> {
        self.domains.values()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl From<SharedHandler> for HandlerContract {
    fn from(h: SharedHandler) -> Self {
        Self {
            kind: h.kind,
            address: h.address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARED: &str = r#"{
        "domains": [
            {
                "id": 1,
                "name": "ethereum",
                "type": "ethereum",
                "bridge": "0x4D878E8Fb90178588Cda4cf1DCcdC9a6d2757089",
                "nativeTokenSymbol": "ETH",
                "nativeTokenFullName": "ether",
                "nativeTokenDecimals": 18,
                "blockConfirmations": 5,
                "startBlock": 100,
                "resources": [
                    {
                        "resourceId": "0x00000000000000000000000000000000000000000000000000000000000000AB",
                        "type": "erc20",
                        "address": "0x37356a2B2EbF65e5Ea18BD93DeA6869769099739",
                        "symbol": "USDC",
                        "decimals": 6
                    }
                ],
                "handlers": [{ "type": "erc20", "address": "0x02091EefF969b33A5CE8A729DaE325879bf76f90" }],
                "feeRouter": "0xA8254f6184b82D7307257966b95D7569BD751a90",
                "feeHandlers": [{ "type": "basic", "address": "0x9E1f5b0c2D3bEcC4f7f7E5a9D3A2f6a3aE1cF0A1" }]
            },
            {
                "id": 3,
                "name": "rococo-phala",
                "type": "substrate",
                "bridge": "",
                "nativeTokenSymbol": "PHA",
                "nativeTokenFullName": "phala",
                "nativeTokenDecimals": 12,
                "blockConfirmations": 0,
                "startBlock": 2000,
                "resources": [
                    {
                        "resourceId": "0x0000000000000000000000000000000000000000000000000000000000000001",
                        "type": "fungible",
                        "address": { "parents": 1, "interior": "Here" },
                        "symbol": "PHA",
                        "decimals": 12
                    }
                ],
                "handlers": [],
                "feeHandlers": null
            }
        ]
    }"#;

    const RPC: &str = r#"[{ "id": 3, "endpoint": "wss://rococo.example.org" }]"#;

    #[test]
    fn test_parse_shared_config() {
        let registry = DomainRegistry::from_json(SHARED, RPC).unwrap();
        assert_eq!(registry.len(), 2);

        let eth = registry.domain(1).unwrap();
        assert_eq!(eth.kind, ChainKind::Evm);
        assert_eq!(eth.block_confirmations, 5);
        assert_eq!(eth.start_block, 100);
        assert_eq!(eth.fee_handlers.len(), 1);
        assert!(eth.fee_router.is_some());

        let phala = registry.domain(3).unwrap();
        assert_eq!(phala.kind, ChainKind::Substrate);
        assert!(phala.fee_handlers.is_empty());
        let location: serde_json::Value = serde_json::from_str(&phala.resources[0].address).unwrap();
        assert_eq!(location["interior"], "Here");
    }

    #[test]
    fn test_only_domains_with_rpc_are_indexable() {
        let registry = DomainRegistry::from_json(SHARED, RPC).unwrap();
        let ids: Vec<DomainId> = registry.indexable().map(|d| d.id).collect();
        assert_eq!(ids, vec![3]);
        assert_eq!(
            registry.domain(3).unwrap().rpc_url.as_deref(),
            Some("wss://rococo.example.org")
        );
    }

    #[test]
    fn test_resource_lookup_is_case_insensitive() {
        let registry = DomainRegistry::from_json(SHARED, "").unwrap();
        let lower = ResourceId::from_hex(
            "0x00000000000000000000000000000000000000000000000000000000000000ab",
        )
        .unwrap();
        let usdc = registry.resource(1, &lower).unwrap();
        assert_eq!(usdc.symbol, "USDC");
        assert_eq!(usdc.decimals, 6);
        assert!(registry.resource(3, &lower).is_none());
        assert!(registry.resource(9, &lower).is_none());
    }

    #[test]
    fn test_duplicate_domain_rejected() {
        let shared = r#"{ "domains": [
            { "id": 1, "name": "a", "type": "ethereum" },
            { "id": 1, "name": "b", "type": "substrate" }
        ] }"#;
        let err = DomainRegistry::from_json(shared, "").unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_invalid_resource_id_rejected() {
        let shared = r#"{ "domains": [
            { "id": 1, "name": "a", "type": "ethereum",
              "resources": [{ "resourceId": "0x12", "symbol": "X" }] }
        ] }"#;
        assert!(DomainRegistry::from_json(shared, "").is_err());
    }
}
