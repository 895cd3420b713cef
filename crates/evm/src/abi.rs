//! Bridge contract events.

use ethers::abi::{Event, parse_abi};
use ethers::types::H256;

use ferry_core::events::EventFamily;

use crate::error::EvmError;

/// Human readable signatures of the indexed events.
///
/// `Deposit`, `ProposalExecution` and `FailedHandlerExecution` come from the
/// bridge contract, `FeeCollected` from the fee handlers.
pub const BRIDGE_EVENTS: [&str; 4] = [
    "event Deposit(uint8 destinationDomainID, bytes32 resourceID, uint64 depositNonce, address indexed user, bytes data, bytes handlerResponse)",
    "event ProposalExecution(uint8 originDomainID, uint64 depositNonce, bytes32 dataHash, bytes handlerResponse)",
    "event FailedHandlerExecution(bytes lowLevelData, uint8 originDomainID, uint64 depositNonce)",
    "event FeeCollected(address sender, uint8 fromDomainID, uint8 destinationDomainID, bytes32 resourceID, uint256 fee, address tokenAddress)",
];

/// Parsed bridge events, matched by their topic0.
#[derive(Debug, Clone)]
pub struct BridgeAbi {
    pub deposit: Event,
    pub proposal_execution: Event,
    pub failed_handler_execution: Event,
    pub fee_collected: Event,
}

impl BridgeAbi {
    pub fn new() -> Result<Self, EvmError> {
        let abi = parse_abi(&BRIDGE_EVENTS).map_err(|e| EvmError::Abi(e.to_string()))?;
        let event = |name: &str| {
            abi.event(name)
                .cloned()
                .map_err(|e| EvmError::Abi(e.to_string()))
        };

        Ok(Self {
            deposit: event("Deposit")?,
            proposal_execution: event("ProposalExecution")?,
            failed_handler_execution: event("FailedHandlerExecution")?,
            fee_collected: event("FeeCollected")?,
        })
    }

    pub fn event(&self, family: EventFamily) -> &Event {
        match family {
            EventFamily::Deposit => &self.deposit,
            EventFamily::ProposalExecution => &self.proposal_execution,
            EventFamily::FailedHandlerExecution => &self.failed_handler_execution,
            EventFamily::FeeCollected => &self.fee_collected,
        }
    }

    /// Family of a log from its topic0.
    pub fn family_of(&self, topic0: &H256) -> Option<EventFamily> {
        EventFamily::PROCESSING_ORDER
            .into_iter()
            .find(|family| &self.event(*family).signature() == topic0)
    }

    /// Topic0 values of all indexed events, for log filters.
    pub fn topics(&self) -> Vec<H256> {
        EventFamily::PROCESSING_ORDER
            .into_iter()
            .map(|family| self.event(family).signature())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::utils::keccak256;

    #[test]
    fn test_signatures_match_contract_topics() {
        let abi = BridgeAbi::new().unwrap();
        assert_eq!(
            abi.deposit.signature(),
            H256(keccak256("Deposit(uint8,bytes32,uint64,address,bytes,bytes)"))
        );
        assert_eq!(
            abi.fee_collected.signature(),
            H256(keccak256("FeeCollected(address,uint8,uint8,bytes32,uint256,address)"))
        );
        assert_eq!(
            abi.failed_handler_execution.signature(),
            H256(keccak256("FailedHandlerExecution(bytes,uint8,uint64)"))
        );
    }

    #[test]
    fn test_family_lookup() {
        let abi = BridgeAbi::new().unwrap();
        let topic = abi.proposal_execution.signature();
        assert_eq!(abi.family_of(&topic), Some(EventFamily::ProposalExecution));
        assert_eq!(abi.family_of(&H256::zero()), None);
        assert_eq!(abi.topics().len(), 4);
    }
}
