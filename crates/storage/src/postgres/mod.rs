//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `ferry-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgDomainRepository`, `PgTransferRepository`, etc.
//!
//! Every write is idempotent: natural-key upserts for transfers,
//! `ON CONFLICT DO NOTHING` for event records and accounts, and a
//! checkpoint that only moves forward.

mod database;
mod domain_repo;
mod helpers;
mod record_repo;
mod transfer_repo;

pub use database::{Database, DatabaseConfig, PurgeStats};
pub use domain_repo::PgDomainRepository;
pub use record_repo::{
    PgAccountRepository, PgDepositRepository, PgExecutionRepository, PgFeeRepository,
};
pub use transfer_repo::PgTransferRepository;

use std::sync::Arc;

use ferry_core::ports::{
    AccountRepository, DepositRepository, DomainRepository, ExecutionRepository, FeeRepository,
    Repositories, TransferRepository,
};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
pub struct PgRepositories {
    domains: PgDomainRepository,
    transfers: PgTransferRepository,
    deposits: PgDepositRepository,
    executions: PgExecutionRepository,
    fees: PgFeeRepository,
    accounts: PgAccountRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        let pool = db.pool().clone();
        Self {
            domains: PgDomainRepository::new(&db),
            transfers: PgTransferRepository::new(pool.clone()),
            deposits: PgDepositRepository::new(pool.clone()),
            executions: PgExecutionRepository::new(pool.clone()),
            fees: PgFeeRepository::new(pool.clone()),
            accounts: PgAccountRepository::new(pool),
        }
    }
}

impl Repositories for PgRepositories {
    fn domains(&self) -> &dyn DomainRepository {
        &self.domains
    }

    fn transfers(&self) -> &dyn TransferRepository {
        &self.transfers
    }

    fn deposits(&self) -> &dyn DepositRepository {
        &self.deposits
    }

    fn executions(&self) -> &dyn ExecutionRepository {
        &self.executions
    }

    fn fees(&self) -> &dyn FeeRepository {
        &self.fees
    }

    fn accounts(&self) -> &dyn AccountRepository {
        &self.accounts
    }
}
