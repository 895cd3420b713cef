//! Storage layer for the Ferry bridge indexer.
//!
//! This crate provides PostgreSQL implementations of the repository traits
//! defined in `ferry-core`. It handles all database interactions including
//! connection pooling, migrations, and idempotent writes.
//!
//! # Architecture
//!
//! The storage layer follows the repository pattern:
//!
//! - [`postgres::Database`] - Connection pool management
//! - [`postgres::PgRepositories`] - Composite repository for all entity types
//! - Individual repositories for domains, transfers, deposits, executions,
//!   fees and accounts
//!
//! # Usage
//!
//! ```ignore
//! use ferry_storage::{Database, DatabaseConfig, PgRepositories};
//!
//! // Connect to the database
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//!
//! // Run migrations
//! db.migrate().await?;
//!
//! // Create repositories
//! let repositories = Arc::new(PgRepositories::new(Arc::new(db)));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgRepositories, PurgeStats};
