//! The issuance pipeline.
//!
//! One issuance runs `preflight -> allocate -> render -> export -> send ->
//! commit`. Serials are reserved in memory from allocation until they are
//! either recorded in the ledger or released by a failure before delivery.

use chrono::{DateTime, Local, NaiveDate};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{error, info, warn};

use crate::error::{IssuanceError, LedgerError, ResourceError};
use crate::ledger::{take_snapshot, IssuanceRecord, LedgerStore};
use crate::mail::{DeliveryChannel, OutgoingMessage};
use crate::pdf::{self, DocumentFormat, ExportedDocument};
use crate::render::{self, CertificateAssets, CertificateFields, CertificateLayout, LayoutSource};
use crate::serial::SerialAllocator;

pub const DATE_FORMAT: &str = "%B %d, %Y";

/// Turns recipient fields into a deliverable document.
///
/// `prepare` runs before a serial is allocated so that a missing template or
/// font never consumes one. `produce` runs on the blocking pool.
pub trait CertificateRenderer: Send + Sync + 'static {
    type Prepared: Send + 'static;

    fn prepare(&self) -> Result<Self::Prepared, ResourceError>;

    fn produce(
        &self,
        prepared: Self::Prepared,
        fields: &CertificateFields,
    ) -> Result<ExportedDocument, IssuanceError>;
}

/// Renders onto the configured template and exports in one format.
pub struct TemplateRenderer {
    source: LayoutSource,
    format: DocumentFormat,
}

impl TemplateRenderer {
    pub fn new(source: LayoutSource, format: DocumentFormat) -> Self {
        Self { source, format }
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// Renders the template with placeholder text, as PNG.
    pub fn preview_png(&self) -> Result<Vec<u8>, IssuanceError> {
        let (layout, assets) = self.prepare()?;
        let fields = CertificateFields {
            name: "Recipient Name".to_string(),
            date: Local::now().date_naive().format(DATE_FORMAT).to_string(),
            serial: "PREVIEW".to_string(),
        };
        let rendered = render::render(&assets, &layout, &fields);
        Ok(pdf::export(&rendered.image, DocumentFormat::Png)?.bytes)
    }
}

impl CertificateRenderer for TemplateRenderer {
    type Prepared = (CertificateLayout, CertificateAssets);

    fn prepare(&self) -> Result<Self::Prepared, ResourceError> {
        let layout = self.source.load()?;
        let assets = CertificateAssets::load(&layout)?;
        Ok((layout, assets))
    }

    fn produce(
        &self,
        (layout, assets): Self::Prepared,
        fields: &CertificateFields,
    ) -> Result<ExportedDocument, IssuanceError> {
        let rendered = render::render(&assets, &layout, fields);
        Ok(pdf::export(&rendered.image, self.format)?)
    }
}

#[derive(Debug, Clone)]
pub struct IssuanceRequest {
    pub recipient_name: String,
    pub recipient_email: String,
    pub issue_date: NaiveDate,
}

fn looks_like_email(address: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(address))
}

impl IssuanceRequest {
    /// Trims both fields and rejects an empty name or a malformed address.
    pub fn validated(self) -> Result<Self, IssuanceError> {
        let recipient_name = self.recipient_name.trim().to_string();
        let recipient_email = self.recipient_email.trim().to_string();

        if recipient_name.is_empty() {
            return Err(IssuanceError::InvalidRequest("recipient name is required".into()));
        }
        if !looks_like_email(&recipient_email) {
            return Err(IssuanceError::InvalidRequest(format!(
                "'{}' is not a valid email address",
                recipient_email
            )));
        }
        Ok(Self {
            recipient_name,
            recipient_email,
            issue_date: self.issue_date,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IssuanceOutcome {
    Issued { record: IssuanceRecord },
    /// The certificate was sent but the ledger append failed.
    DeliveredUnrecorded { record: IssuanceRecord, error: String },
}

impl IssuanceOutcome {
    pub fn record(&self) -> &IssuanceRecord {
        match self {
            IssuanceOutcome::Issued { record } => record,
            IssuanceOutcome::DeliveredUnrecorded { record, .. } => record,
        }
    }

    pub fn warning(&self) -> Option<String> {
        match self {
            IssuanceOutcome::Issued { .. } => None,
            IssuanceOutcome::DeliveredUnrecorded { record, error } => Some(format!(
                "Certificate was emailed to {} but serial {} could not be recorded in the ledger: {}",
                record.recipient_email, record.serial_number, error
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub recorded: Vec<IssuanceRecord>,
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct ReservationBook {
    /// Allocated, not yet delivered.
    pending: BTreeSet<String>,
    /// Delivered, ledger append failed.
    unrecorded: Vec<IssuanceRecord>,
}

impl ReservationBook {
    fn taken(&self) -> BTreeSet<String> {
        self.pending
            .iter()
            .cloned()
            .chain(self.unrecorded.iter().map(|r| r.serial_number.clone()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MessageSettings {
    pub subject: String,
    pub organization: String,
}

pub struct Issuer<R: CertificateRenderer = TemplateRenderer> {
    ledger: Arc<dyn LedgerStore>,
    mailer: Arc<dyn DeliveryChannel>,
    allocator: SerialAllocator,
    renderer: Arc<R>,
    message: MessageSettings,
    clock: fn() -> DateTime<Local>,
    book: Mutex<ReservationBook>,
    run: tokio::sync::Mutex<()>,
}

impl<R: CertificateRenderer> Issuer<R> {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        mailer: Arc<dyn DeliveryChannel>,
        allocator: SerialAllocator,
        renderer: R,
        message: MessageSettings,
    ) -> Self {
        Self {
            ledger,
            mailer,
            allocator,
            renderer: Arc::new(renderer),
            message,
            clock: Local::now,
            book: Mutex::new(ReservationBook::default()),
            run: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn allocator(&self) -> &SerialAllocator {
        &self.allocator
    }

    /// Delivered certificates whose ledger append has not succeeded yet.
    pub fn unrecorded(&self) -> Vec<IssuanceRecord> {
        self.book().unrecorded.clone()
    }

    fn book(&self) -> MutexGuard<'_, ReservationBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn issue(&self, request: IssuanceRequest) -> Result<IssuanceOutcome, IssuanceError> {
        let _turn = self.run.lock().await;

        let request = request.validated()?;
        let prepared = self.renderer.prepare()?;
        self.mailer.ensure_configured()?;

        let snapshot = take_snapshot(self.ledger.as_ref()).await;
        let serial = {
            let mut book = self.book();
            let serial = self.allocator.allocate(&snapshot, &book.taken(), (self.clock)());
            book.pending.insert(serial.clone());
            serial
        };
        info!(serial = %serial, recipient = %request.recipient_email, "Serial reserved");

        let record = IssuanceRecord {
            sequence_number: snapshot.len() as u32 + 1,
            issue_date: request.issue_date,
            recipient_name: request.recipient_name.clone(),
            recipient_email: request.recipient_email.clone(),
            serial_number: serial.clone(),
        };

        if let Err(e) = self.deliver(prepared, &record).await {
            self.book().pending.remove(&serial);
            error!(serial = %serial, error = %e, "Issuance failed, serial released");
            return Err(e);
        }

        let outcome = match self.commit(record.clone()).await {
            Ok(record) => {
                self.book().pending.remove(&serial);
                info!(
                    serial = %serial,
                    sequence = record.sequence_number,
                    backend = self.ledger.backend(),
                    "Certificate issued and recorded"
                );
                IssuanceOutcome::Issued { record }
            }
            Err(e) => {
                let mut book = self.book();
                book.pending.remove(&serial);
                book.unrecorded.push(record.clone());
                warn!(serial = %serial, error = %e, "Certificate delivered but not recorded");
                IssuanceOutcome::DeliveredUnrecorded {
                    record,
                    error: e.to_string(),
                }
            }
        };
        Ok(outcome)
    }

    async fn deliver(&self, prepared: R::Prepared, record: &IssuanceRecord) -> Result<(), IssuanceError> {
        let fields = CertificateFields {
            name: record.recipient_name.clone(),
            date: record.issue_date.format(DATE_FORMAT).to_string(),
            serial: record.serial_number.clone(),
        };

        let renderer = Arc::clone(&self.renderer);
        let document = tokio::task::spawn_blocking(move || renderer.produce(prepared, &fields))
            .await
            .map_err(|e| IssuanceError::Render(e.to_string()))??;

        let message = OutgoingMessage::certificate(
            &record.recipient_name,
            &record.recipient_email,
            &self.message.subject,
            &self.message.organization,
            document,
        );
        self.mailer.send(&message).await?;
        Ok(())
    }

    /// Appends `record` at the current end of the ledger. A serial that is
    /// already present counts as recorded only when the row is this same
    /// issuance; a row for anyone else is a collision.
    async fn commit(&self, mut record: IssuanceRecord) -> Result<IssuanceRecord, LedgerError> {
        let records = self.ledger.load().await?;
        if let Some(existing) = records.iter().find(|r| r.serial_number == record.serial_number) {
            let same_issuance = existing.recipient_name == record.recipient_name
                && existing.recipient_email == record.recipient_email
                && existing.issue_date == record.issue_date;
            if same_issuance {
                return Ok(existing.clone());
            }
            return Err(LedgerError::DuplicateSerial(record.serial_number));
        }
        record.sequence_number = records.len() as u32 + 1;
        self.ledger.append(&record).await?;
        Ok(record)
    }

    /// Retries the ledger append once for every unrecorded delivery.
    pub async fn reconcile(&self) -> ReconcileReport {
        let _turn = self.run.lock().await;

        let pending = std::mem::take(&mut self.book().unrecorded);
        let mut report = ReconcileReport::default();
        let mut remaining = Vec::new();

        for record in pending {
            match self.commit(record.clone()).await {
                Ok(recorded) => {
                    info!(serial = %recorded.serial_number, "Unrecorded certificate reconciled");
                    report.recorded.push(recorded);
                }
                Err(e) => {
                    warn!(serial = %record.serial_number, error = %e, "Reconcile append failed");
                    remaining.push(record);
                }
            }
        }

        report.remaining = remaining.len();
        self.book().unrecorded.extend(remaining);
        report
    }
}
