//! Issuance ledger.
//!
//! The ledger is an ordered, append-only log of [`IssuanceRecord`]s. Backends
//! implement [`LedgerStore`]; callers never depend on how a backend persists
//! (full-file rewrite for the CSV and remote variants, a row insert for
//! PostgreSQL, a vector for the in-memory variant).

mod codec;
mod csv_file;
mod memory;
mod remote;

pub use codec::{parse_records, serialize_records, HEADER};
pub use csv_file::CsvLedger;
pub use memory::MemoryLedger;
pub use remote::{GitHubLedger, RemoteSettings, DEFAULT_API_URL};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::error::LedgerError;

/// One certificate issuance. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRecord {
    pub sequence_number: u32,
    pub issue_date: NaiveDate,
    pub recipient_name: String,
    pub recipient_email: String,
    pub serial_number: String,
}

/// Storage capability shared by every ledger backend.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Short backend name for logs and the UI.
    fn backend(&self) -> &'static str;

    /// All records in issuance order.
    async fn load(&self) -> Result<Vec<IssuanceRecord>, LedgerError>;

    /// Durably adds `record`. Rejects records that would break the
    /// sequence or serial uniqueness invariants.
    async fn append(&self, record: &IssuanceRecord) -> Result<(), LedgerError>;
}

/// The ledger as seen by one allocation.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub records: Vec<IssuanceRecord>,
    /// Set when the load failed and `records` is an empty stand-in.
    pub degraded: bool,
}

impl LedgerSnapshot {
    pub fn from_records(records: Vec<IssuanceRecord>) -> Self {
        Self {
            records,
            degraded: false,
        }
    }

    pub fn degraded() -> Self {
        Self {
            records: Vec::new(),
            degraded: true,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_serial(&self, serial: &str) -> bool {
        self.records.iter().any(|r| r.serial_number == serial)
    }
}

/// Loads the ledger, treating any storage failure as "no prior issuances".
pub async fn take_snapshot(store: &dyn LedgerStore) -> LedgerSnapshot {
    match store.load().await {
        Ok(records) => LedgerSnapshot::from_records(records),
        Err(e) => {
            warn!(backend = store.backend(), error = %e, "Ledger unreadable, continuing with an empty snapshot");
            LedgerSnapshot::degraded()
        }
    }
}

/// Checks the append invariants of `record` against the current `records`.
pub fn check_append(records: &[IssuanceRecord], record: &IssuanceRecord) -> Result<(), LedgerError> {
    let expected = records.len() as u32 + 1;
    if record.sequence_number != expected {
        return Err(LedgerError::SequenceMismatch {
            expected,
            found: record.sequence_number,
        });
    }
    if records.iter().any(|r| r.serial_number == record.serial_number) {
        return Err(LedgerError::DuplicateSerial(record.serial_number.clone()));
    }
    Ok(())
}

/// Which backend holds the ledger.
#[derive(Debug, Clone)]
pub enum LedgerBackend {
    Csv { path: PathBuf },
    GitHub(RemoteSettings),
    Memory,
    Postgres { database_url: String },
}

pub async fn open_store(backend: &LedgerBackend) -> Result<Arc<dyn LedgerStore>, LedgerError> {
    let store: Arc<dyn LedgerStore> = match backend {
        LedgerBackend::Csv { path } => Arc::new(CsvLedger::open(path)?),
        LedgerBackend::GitHub(settings) => Arc::new(GitHubLedger::new(settings.clone())?),
        LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
        LedgerBackend::Postgres { database_url } => {
            Arc::new(crate::db::PgLedger::connect(database_url).await?)
        }
    };
    info!(backend = store.backend(), "Ledger store opened");
    Ok(store)
}

#[cfg(test)]
pub(crate) fn sample_record(sequence_number: u32, serial: &str) -> IssuanceRecord {
    IssuanceRecord {
        sequence_number,
        issue_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        recipient_name: format!("Recipient {}", sequence_number),
        recipient_email: format!("recipient{}@example.com", sequence_number),
        serial_number: serial.to_string(),
    }
}
