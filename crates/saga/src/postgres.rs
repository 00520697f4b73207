use async_trait::async_trait;
use common::SagaId;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    Result,
    ledger::{LedgerStore, SagaLedger},
    state::SagaState,
};

fn row_to_ledger(row: PgRow) -> Result<SagaLedger> {
    let value: serde_json::Value = row.try_get("ledger")?;
    Ok(serde_json::from_value(value)?)
}

/// PostgreSQL-backed ledger store.
///
/// Each ledger is one JSONB document keyed by saga id. State and start time
/// are kept in their own columns so unfinished sagas can be found after a
/// restart without decoding every row.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn save(&self, ledger: &SagaLedger) -> Result<()> {
        let document = serde_json::to_value(ledger)?;
        sqlx::query(
            r#"
            INSERT INTO saga_ledgers (saga_id, state, ledger, started_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (saga_id) DO UPDATE
            SET state = EXCLUDED.state,
                ledger = EXCLUDED.ledger,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(ledger.saga_id.as_str())
        .bind(ledger.state.as_str())
        .bind(document)
        .bind(ledger.started_at)
        .bind(ledger.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, saga_id: &SagaId) -> Result<Option<SagaLedger>> {
        let row = sqlx::query("SELECT ledger FROM saga_ledgers WHERE saga_id = $1")
            .bind(saga_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_ledger).transpose()
    }

    async fn find_by_state(&self, state: SagaState) -> Result<Vec<SagaLedger>> {
        let rows = sqlx::query(
            "SELECT ledger FROM saga_ledgers WHERE state = $1 ORDER BY started_at, saga_id",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_ledger).collect()
    }
}
