//! Domain checkpoint repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use ferry_core::error::{StorageError, StorageResult};
use ferry_core::models::DomainId;
use ferry_core::ports::DomainRepository;

use super::database::Database;
use super::helpers::{i64_to_u64, u64_to_i64};

/// PostgreSQL implementation of DomainRepository.
pub struct PgDomainRepository {
    pool: PgPool,
}

impl PgDomainRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl DomainRepository for PgDomainRepository {
    async fn upsert_domain(&self, domain_id: DomainId, name: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO domains (id, name, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(domain_id as i16)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn last_indexed_block(&self, domain_id: DomainId) -> StorageResult<Option<u64>> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT last_indexed_block FROM domains WHERE id = $1")
                .bind(domain_id as i16)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.and_then(|(block,)| block)
            .map(|b| i64_to_u64(b, "domain.last_indexed_block"))
            .transpose()
    }

    async fn update_last_indexed_block(
        &self,
        domain_id: DomainId,
        block: u64,
    ) -> StorageResult<()> {
        // GREATEST ignores NULL, so the first write always lands.
        sqlx::query(
            r#"
            INSERT INTO domains (id, name, last_indexed_block, updated_at)
            VALUES ($1, '', $2, NOW())
            ON CONFLICT (id) DO UPDATE SET
                last_indexed_block = GREATEST(domains.last_indexed_block, EXCLUDED.last_indexed_block),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(domain_id as i16)
        .bind(u64_to_i64(block, "domain.last_indexed_block")?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}
