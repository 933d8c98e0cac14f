//! CSV form of the ledger, shared by the local-file and remote backends.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::IssuanceRecord;
use crate::error::LedgerError;

pub const HEADER: [&str; 5] = ["Number", "Date", "Name", "Email", "Serial Number"];

#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    #[serde(rename = "Number", alias = "sequence")]
    number: u32,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Email")]
    email: String,
    #[serde(rename = "Serial Number")]
    serial_number: String,
}

impl From<LedgerRow> for IssuanceRecord {
    fn from(row: LedgerRow) -> Self {
        IssuanceRecord {
            sequence_number: row.number,
            issue_date: row.date,
            recipient_name: row.name,
            recipient_email: row.email,
            serial_number: row.serial_number,
        }
    }
}

impl From<&IssuanceRecord> for LedgerRow {
    fn from(record: &IssuanceRecord) -> Self {
        LedgerRow {
            number: record.sequence_number,
            date: record.issue_date,
            name: record.recipient_name.clone(),
            email: record.recipient_email.clone(),
            serial_number: record.serial_number.clone(),
        }
    }
}

/// Parses ledger CSV. Empty input is an empty ledger.
pub fn parse_records(bytes: &[u8]) -> Result<Vec<IssuanceRecord>, LedgerError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut records = Vec::new();
    for row in reader.deserialize::<LedgerRow>() {
        records.push(row?.into());
    }
    Ok(records)
}

/// Serializes the whole ledger, header first.
pub fn serialize_records(records: &[IssuanceRecord]) -> Result<Vec<u8>, LedgerError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(HEADER)?;
    for record in records {
        writer.serialize(LedgerRow::from(record))?;
    }
    writer.into_inner().map_err(|e| LedgerError::Io(e.into_error()))
}
