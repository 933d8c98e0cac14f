use async_trait::async_trait;
use std::sync::Mutex;

use super::{check_append, IssuanceRecord, LedgerStore};
use crate::error::LedgerError;

/// Ledger that lives as long as its handle. Nothing is persisted.
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<IssuanceRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<IssuanceRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<IssuanceRecord>>, LedgerError> {
        self.records
            .lock()
            .map_err(|_| LedgerError::Corrupt("memory ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<Vec<IssuanceRecord>, LedgerError> {
        Ok(self.lock()?.clone())
    }

    async fn append(&self, record: &IssuanceRecord) -> Result<(), LedgerError> {
        let mut records = self.lock()?;
        check_append(&records, record)?;
        records.push(record.clone());
        Ok(())
    }
}
