mod models;

pub use models::*;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::error::LedgerError;
use crate::ledger::{IssuanceRecord, LedgerStore};

pub type DbPool = Arc<PgPool>;

pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub async fn load_issuances(pool: &PgPool) -> Result<Vec<IssuanceRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, IssuanceRow>(
        r#"
        SELECT sequence_number, issue_date, recipient_name, recipient_email, serial_number
        FROM issuances
        ORDER BY sequence_number
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(IssuanceRecord::from).collect())
}

/// Inserts one issuance. The table lock serializes concurrent appenders so
/// the count check and the insert see the same ledger length.
pub async fn insert_issuance(pool: &PgPool, record: &IssuanceRecord) -> Result<(), LedgerError> {
    let mut tx = pool.begin().await?;

    sqlx::query("LOCK TABLE issuances IN SHARE ROW EXCLUSIVE MODE")
        .execute(&mut *tx)
        .await?;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issuances")
        .fetch_one(&mut *tx)
        .await?;
    let expected = count as u32 + 1;
    if record.sequence_number != expected {
        return Err(LedgerError::SequenceMismatch {
            expected,
            found: record.sequence_number,
        });
    }

    sqlx::query(
        r#"
        INSERT INTO issuances (sequence_number, issue_date, recipient_name, recipient_email, serial_number)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(record.sequence_number as i64)
    .bind(record.issue_date)
    .bind(&record.recipient_name)
    .bind(&record.recipient_email)
    .bind(&record.serial_number)
    .execute(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            LedgerError::DuplicateSerial(record.serial_number.clone())
        }
        other => LedgerError::Database(other),
    })?;

    tx.commit().await?;
    Ok(())
}

/// Ledger kept in the `issuances` table. Appends are single-row inserts.
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = create_pool(database_url).await?;
        run_migrations(pool.as_ref())
            .await
            .map_err(|e| LedgerError::Database(e.into()))?;
        info!("Issuance table migrated");
        Ok(Self { pool })
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn load(&self) -> Result<Vec<IssuanceRecord>, LedgerError> {
        Ok(load_issuances(self.pool.as_ref()).await?)
    }

    async fn append(&self, record: &IssuanceRecord) -> Result<(), LedgerError> {
        insert_issuance(self.pool.as_ref(), record).await
    }
}
