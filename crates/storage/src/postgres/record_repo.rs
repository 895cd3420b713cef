//! Deposit, execution, fee and account repositories for PostgreSQL.
//!
//! Records are append-only and keyed by deterministic ids, so replaying a
//! block is a no-op.

use async_trait::async_trait;
use sqlx::PgPool;

use ferry_core::error::{StorageError, StorageResult};
use ferry_core::models::{Deposit, Execution, Fee};
use ferry_core::ports::{
    AccountRepository, DepositRepository, ExecutionRepository, FeeRepository,
};

use super::helpers::u64_to_i64;

/// PostgreSQL implementation of DepositRepository.
pub struct PgDepositRepository {
    pool: PgPool,
}

impl PgDepositRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DepositRepository for PgDepositRepository {
    async fn insert(&self, deposit: &Deposit) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deposits (
                id, transfer_id, tx_identifier, block_number,
                transfer_type, deposit_data, handler_response, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&deposit.id)
        .bind(&deposit.transfer_id)
        .bind(&deposit.tx_identifier)
        .bind(u64_to_i64(deposit.block_number, "deposit.block_number")?)
        .bind(&deposit.transfer_type)
        .bind(&deposit.deposit_data)
        .bind(&deposit.handler_response)
        .bind(deposit.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

/// PostgreSQL implementation of ExecutionRepository.
pub struct PgExecutionRepository {
    pool: PgPool,
}

impl PgExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepository for PgExecutionRepository {
    async fn insert(&self, execution: &Execution) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO executions (id, transfer_id, tx_identifier, block_number, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.transfer_id)
        .bind(&execution.tx_identifier)
        .bind(u64_to_i64(execution.block_number, "execution.block_number")?)
        .bind(execution.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn upsert(&self, execution: &Execution) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO executions (id, transfer_id, tx_identifier, block_number, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                transfer_id = EXCLUDED.transfer_id,
                tx_identifier = EXCLUDED.tx_identifier,
                block_number = EXCLUDED.block_number,
                timestamp = EXCLUDED.timestamp
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.transfer_id)
        .bind(&execution.tx_identifier)
        .bind(u64_to_i64(execution.block_number, "execution.block_number")?)
        .bind(execution.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

/// PostgreSQL implementation of FeeRepository.
pub struct PgFeeRepository {
    pool: PgPool,
}

impl PgFeeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeeRepository for PgFeeRepository {
    async fn insert(&self, fee: &Fee) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fees (id, transfer_id, token_symbol, token_address, decimals, amount)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&fee.id)
        .bind(&fee.transfer_id)
        .bind(&fee.token_symbol)
        .bind(&fee.token_address)
        .bind(fee.decimals as i16)
        .bind(&fee.amount)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

/// PostgreSQL implementation of AccountRepository.
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn insert_if_absent(&self, address: &str) -> StorageResult<()> {
        sqlx::query("INSERT INTO accounts (address) VALUES ($1) ON CONFLICT (address) DO NOTHING")
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}
