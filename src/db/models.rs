use chrono::NaiveDate;
use sqlx::FromRow;

use crate::ledger::IssuanceRecord;

#[derive(Debug, FromRow)]
pub struct IssuanceRow {
    pub sequence_number: i64,
    pub issue_date: NaiveDate,
    pub recipient_name: String,
    pub recipient_email: String,
    pub serial_number: String,
}

impl From<IssuanceRow> for IssuanceRecord {
    fn from(row: IssuanceRow) -> Self {
        IssuanceRecord {
            sequence_number: row.sequence_number as u32,
            issue_date: row.issue_date,
            recipient_name: row.recipient_name,
            recipient_email: row.recipient_email,
            serial_number: row.serial_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_converts_to_record() {
        let row = IssuanceRow {
            sequence_number: 3,
            issue_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            recipient_name: "Jane Doe".into(),
            recipient_email: "jane@example.com".into(),
            serial_number: "PY2025-0003".into(),
        };
        let record = IssuanceRecord::from(row);
        assert_eq!(record.sequence_number, 3);
        assert_eq!(record.serial_number, "PY2025-0003");
        assert_eq!(record.recipient_email, "jane@example.com");
    }
}
