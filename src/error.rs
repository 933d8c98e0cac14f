use thiserror::Error;

/// A required or malformed setting.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("failed to read secrets file {path}: {message}")]
    Secrets { path: String, message: String },
}

/// Template or font resources that a render cannot proceed without.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("template {path} could not be loaded: {message}")]
    Template { path: String, message: String },

    #[error("font {path} could not be loaded: {message}")]
    Font { path: String, message: String },

    #[error("layout {path} could not be loaded: {message}")]
    Layout { path: String, message: String },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger file is malformed: {0}")]
    Csv(#[from] csv::Error),

    #[error("ledger content is corrupt: {0}")]
    Corrupt(String),

    #[error("remote ledger request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote ledger returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("ledger changed since it was loaded: {0}")]
    Conflict(String),

    #[error("serial number {0} is already recorded")]
    DuplicateSerial(String),

    #[error("sequence number {found} does not follow ledger length (expected {expected})")]
    SequenceMismatch { expected: u32, found: u32 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("pdf encoding failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("compression failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("mail delivery is not configured; missing: {}", .0.join(", "))]
    NotConfigured(Vec<&'static str>),

    #[error("mail server rejected the credentials: {0}")]
    Authentication(String),

    #[error("mail transport failed: {0}")]
    Transport(String),

    #[error("invalid email address {address}: {message}")]
    InvalidAddress { address: String, message: String },

    #[error("failed to build message: {0}")]
    Message(String),
}

/// Failures that abort an issuance. A ledger write failure after a successful
/// send is not one of these; it is reported as an outcome instead.
#[derive(Error, Debug)]
pub enum IssuanceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("rendering failed: {0}")]
    Render(String),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}
