use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{check_append, parse_records, serialize_records, IssuanceRecord, LedgerStore};
use crate::error::LedgerError;

/// Ledger kept in a CSV file on local disk.
///
/// Every append rewrites the whole file through a temp file in the same
/// directory, then refreshes `<stem>.backup.csv` next to it.
pub struct CsvLedger {
    path: PathBuf,
    backup_path: PathBuf,
}

impl CsvLedger {
    /// Opens the ledger at `path`, creating its directory and a header-only
    /// file when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(parent_dir(&path))?;

        if !path.exists() {
            std::fs::write(&path, serialize_records(&[])?)?;
            info!(path = %path.display(), "Created empty ledger file");
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("ledger");
        let backup_path = path.with_file_name(format!("{}.backup.csv", stem));

        Ok(Self { path, backup_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    fn read_records(&self) -> Result<Vec<IssuanceRecord>, LedgerError> {
        let bytes = std::fs::read(&self.path)?;
        parse_records(&bytes)
    }

    fn write_records(&self, records: &[IssuanceRecord]) -> Result<(), LedgerError> {
        let bytes = serialize_records(records)?;

        let mut tmp = NamedTempFile::new_in(parent_dir(&self.path))?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| LedgerError::Io(e.error))?;

        // Best effort: the ledger file is already replaced.
        if let Err(e) = std::fs::write(&self.backup_path, &bytes) {
            warn!(backup = %self.backup_path.display(), error = %e, "Ledger backup not refreshed");
        }
        debug!(path = %self.path.display(), rows = records.len(), "Ledger file rewritten");
        Ok(())
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[async_trait]
impl LedgerStore for CsvLedger {
    fn backend(&self) -> &'static str {
        "csv"
    }

    async fn load(&self) -> Result<Vec<IssuanceRecord>, LedgerError> {
        self.read_records()
    }

    async fn append(&self, record: &IssuanceRecord) -> Result<(), LedgerError> {
        let mut records = self.read_records()?;
        check_append(&records, record)?;
        records.push(record.clone());
        self.write_records(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::sample_record;

    #[test]
    fn open_creates_directory_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("certificates.csv");

        let ledger = CsvLedger::open(&path).unwrap();

        assert_eq!(ledger.path(), path.as_path());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Number,Date,Name,Email,Serial Number\n");
    }

    #[test]
    fn open_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certificates.csv");
        let existing = "Number,Date,Name,Email,Serial Number\n1,2025-01-01,Ada,ada@example.com,PY2025-0001\n";
        std::fs::write(&path, existing).unwrap();

        CsvLedger::open(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), existing);
    }

    #[tokio::test]
    async fn append_is_visible_to_next_load_and_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::open(dir.path().join("certificates.csv")).unwrap();

        let before = ledger.load().await.unwrap();
        assert!(before.is_empty());

        let record = sample_record(1, "PY2025-0001");
        ledger.append(&record).await.unwrap();

        let after = ledger.load().await.unwrap();
        assert_eq!(after.len(), before.len() + 1);
        assert!(after.contains(&record));

        let backup = std::fs::read(ledger.backup_path()).unwrap();
        assert_eq!(parse_records(&backup).unwrap(), after);
    }

    #[tokio::test]
    async fn load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::open(dir.path().join("certificates.csv")).unwrap();
        ledger.append(&sample_record(1, "PY2025-0001")).await.unwrap();
        ledger.append(&sample_record(2, "PY2025-0002")).await.unwrap();

        let first = ledger.load().await.unwrap();
        let second = ledger.load().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn reopened_ledger_reproduces_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certificates.csv");
        let records = vec![
            sample_record(1, "PY2025-0001"),
            sample_record(2, "PY2025-0002"),
        ];
        {
            let ledger = CsvLedger::open(&path).unwrap();
            for r in &records {
                ledger.append(r).await.unwrap();
            }
        }

        let reopened = CsvLedger::open(&path).unwrap();
        assert_eq!(reopened.load().await.unwrap(), records);
    }

    #[tokio::test]
    async fn append_rejects_stale_sequence_without_touching_file() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::open(dir.path().join("certificates.csv")).unwrap();
        ledger.append(&sample_record(1, "PY2025-0001")).await.unwrap();
        let before = std::fs::read(ledger.path()).unwrap();

        let err = ledger.append(&sample_record(1, "PY2025-0002")).await.unwrap_err();
        assert!(matches!(err, LedgerError::SequenceMismatch { expected: 2, found: 1 }));
        assert_eq!(std::fs::read(ledger.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn corrupt_file_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certificates.csv");
        std::fs::write(&path, "Number,Date,Name,Email,Serial Number\nx,not-a-date,A,B,C\n").unwrap();

        let ledger = CsvLedger::open(&path).unwrap();
        assert!(ledger.load().await.is_err());
    }

    #[tokio::test]
    async fn unwritable_backup_does_not_fail_append() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::open(dir.path().join("certificates.csv")).unwrap();
        std::fs::create_dir(ledger.backup_path()).unwrap();

        ledger.append(&sample_record(1, "PY2025-0001")).await.unwrap();

        let records = ledger.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].serial_number, "PY2025-0001");
    }
}
