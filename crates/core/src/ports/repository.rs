//! Port traits for data repositories.
//!
//! These traits define the store contract used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `ferry-storage`).
//!
//! Every write is idempotent so that replaying a block after a crash
//! (before its checkpoint was written) leaves the store unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageResult;
use crate::models::{
    Deposit, DepositTransfer, DomainId, Execution, Fee, Transfer, TransferKey, TransferStatus,
};

// =============================================================================
// Repository Traits
// =============================================================================

/// Per-domain indexing progress.
#[async_trait]
pub trait DomainRepository: Send + Sync {
    /// Register a domain row (no-op when it exists).
    async fn upsert_domain(&self, domain_id: DomainId, name: &str) -> StorageResult<()>;

    /// Last checkpointed block, if any.
    async fn last_indexed_block(&self, domain_id: DomainId) -> StorageResult<Option<u64>>;

    /// Write the checkpoint. The stored value never decreases.
    async fn update_last_indexed_block(&self, domain_id: DomainId, block: u64)
    -> StorageResult<()>;
}

/// Transfer aggregates keyed by (nonce, origin, destination).
#[async_trait]
pub trait TransferRepository: Send + Sync {
    async fn find(&self, key: &TransferKey) -> StorageResult<Option<Transfer>>;

    /// Create the transfer with `pending` status, or complete an existing
    /// placeholder without touching its status.
    async fn upsert_by_deposit(&self, fields: &DepositTransfer) -> StorageResult<Transfer>;

    /// Create an `executed` placeholder.
    async fn insert_from_execution(
        &self,
        key: &TransferKey,
        timestamp: Option<DateTime<Utc>>,
    ) -> StorageResult<Transfer>;

    /// Create a `failed` placeholder carrying the failure message.
    async fn insert_failed(&self, key: &TransferKey, message: &str) -> StorageResult<Transfer>;

    /// Move a transfer to `status`. An `executed` transfer is left unchanged.
    async fn update_status(
        &self,
        status: TransferStatus,
        transfer_id: &str,
        message: &str,
    ) -> StorageResult<()>;
}

#[async_trait]
pub trait DepositRepository: Send + Sync {
    /// Insert, ignoring a record with the same id.
    async fn insert(&self, deposit: &Deposit) -> StorageResult<()>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert, ignoring a record with the same id.
    async fn insert(&self, execution: &Execution) -> StorageResult<()>;

    /// Insert or overwrite the record with the same id.
    async fn upsert(&self, execution: &Execution) -> StorageResult<()>;
}

#[async_trait]
pub trait FeeRepository: Send + Sync {
    /// Insert, ignoring a record with the same id.
    async fn insert(&self, fee: &Fee) -> StorageResult<()>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn insert_if_absent(&self, address: &str) -> StorageResult<()>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Combined repository access for the indexer.
pub trait Repositories: Send + Sync {
    fn domains(&self) -> &dyn DomainRepository;

    fn transfers(&self) -> &dyn TransferRepository;

    fn deposits(&self) -> &dyn DepositRepository;

    fn executions(&self) -> &dyn ExecutionRepository;

    fn fees(&self) -> &dyn FeeRepository;

    fn accounts(&self) -> &dyn AccountRepository;
}
