//! Transfer repository implementation for PostgreSQL.
//!
//! Transfers are keyed by `(deposit_nonce, from_domain_id, to_domain_id)`.
//! The `executed` status is terminal: no statement in this file moves a
//! row out of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use ferry_core::error::{StorageError, StorageResult};
use ferry_core::models::{
    DepositTransfer, ResourceId, Transfer, TransferKey, TransferStatus,
};
use ferry_core::ports::TransferRepository;

use super::helpers::{bytes_to_optional_hash32, i16_to_domain_id, i64_to_u64, u64_to_i64};

const TRANSFER_COLUMNS: &str = "id, deposit_nonce, from_domain_id, to_domain_id, status, \
     amount, resource_id, sender, destination, usd_value, message, timestamp";

/// PostgreSQL implementation of TransferRepository.
pub struct PgTransferRepository {
    pool: PgPool,
}

impl PgTransferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a placeholder unless the transfer exists, then return the stored row.
    async fn insert_placeholder(
        &self,
        key: &TransferKey,
        status: TransferStatus,
        message: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
    ) -> StorageResult<Transfer> {
        sqlx::query(
            r#"
            INSERT INTO transfers (
                id, deposit_nonce, from_domain_id, to_domain_id, status, message, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (deposit_nonce, from_domain_id, to_domain_id) DO NOTHING
            "#,
        )
        .bind(key.transfer_id())
        .bind(u64_to_i64(key.deposit_nonce, "transfer.deposit_nonce")?)
        .bind(key.from_domain_id as i16)
        .bind(key.to_domain_id as i16)
        .bind(status.as_str())
        .bind(message)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        self.find(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("transfer {}", key.transfer_id())))
    }
}

#[async_trait]
impl TransferRepository for PgTransferRepository {
    async fn find(&self, key: &TransferKey) -> StorageResult<Option<Transfer>> {
        let row = sqlx::query_as::<_, TransferRow>(&format!(
            r#"
            SELECT {TRANSFER_COLUMNS}
            FROM transfers
            WHERE deposit_nonce = $1 AND from_domain_id = $2 AND to_domain_id = $3
            "#
        ))
        .bind(u64_to_i64(key.deposit_nonce, "transfer.deposit_nonce")?)
        .bind(key.from_domain_id as i16)
        .bind(key.to_domain_id as i16)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(TransferRow::into_transfer).transpose()
    }

    async fn upsert_by_deposit(&self, fields: &DepositTransfer) -> StorageResult<Transfer> {
        let key = &fields.key;
        let row = sqlx::query_as::<_, TransferRow>(&format!(
            r#"
            INSERT INTO transfers (
                id, deposit_nonce, from_domain_id, to_domain_id, status,
                amount, resource_id, sender, destination, usd_value, timestamp
            )
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10)
            ON CONFLICT (deposit_nonce, from_domain_id, to_domain_id) DO UPDATE SET
                amount = EXCLUDED.amount,
                resource_id = EXCLUDED.resource_id,
                sender = EXCLUDED.sender,
                destination = EXCLUDED.destination,
                usd_value = EXCLUDED.usd_value,
                timestamp = COALESCE(EXCLUDED.timestamp, transfers.timestamp),
                updated_at = NOW()
            RETURNING {TRANSFER_COLUMNS}
            "#
        ))
        .bind(key.transfer_id())
        .bind(u64_to_i64(key.deposit_nonce, "transfer.deposit_nonce")?)
        .bind(key.from_domain_id as i16)
        .bind(key.to_domain_id as i16)
        .bind(&fields.amount)
        .bind(&fields.resource_id.0[..])
        .bind(&fields.sender)
        .bind(&fields.destination)
        .bind(fields.usd_value)
        .bind(fields.timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.into_transfer()
    }

    async fn insert_from_execution(
        &self,
        key: &TransferKey,
        timestamp: Option<DateTime<Utc>>,
    ) -> StorageResult<Transfer> {
        self.insert_placeholder(key, TransferStatus::Executed, None, timestamp)
            .await
    }

    async fn insert_failed(&self, key: &TransferKey, message: &str) -> StorageResult<Transfer> {
        self.insert_placeholder(key, TransferStatus::Failed, Some(message), None)
            .await
    }

    async fn update_status(
        &self,
        status: TransferStatus,
        transfer_id: &str,
        message: &str,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE transfers
            SET status = $1, message = $3, updated_at = NOW()
            WHERE id = $2 AND status <> 'executed'
            "#,
        )
        .bind(status.as_str())
        .bind(transfer_id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TransferRow {
    id: String,
    deposit_nonce: i64,
    from_domain_id: i16,
    to_domain_id: i16,
    status: String,
    amount: Option<String>,
    resource_id: Option<Vec<u8>>,
    sender: Option<String>,
    destination: Option<String>,
    usd_value: Option<f64>,
    message: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl TransferRow {
    fn into_transfer(self) -> StorageResult<Transfer> {
        let status = self
            .status
            .parse::<TransferStatus>()
            .map_err(StorageError::SerializationError)?;

        Ok(Transfer {
            id: self.id,
            key: TransferKey {
                deposit_nonce: i64_to_u64(self.deposit_nonce, "transfer.deposit_nonce")?,
                from_domain_id: i16_to_domain_id(self.from_domain_id, "transfer.from_domain_id")?,
                to_domain_id: i16_to_domain_id(self.to_domain_id, "transfer.to_domain_id")?,
            },
            status,
            amount: self.amount,
            resource_id: bytes_to_optional_hash32(self.resource_id, "transfer.resource_id")?
                .map(ResourceId),
            sender: self.sender,
            destination: self.destination,
            usd_value: self.usd_value,
            message: self.message,
            timestamp: self.timestamp,
        })
    }
}
