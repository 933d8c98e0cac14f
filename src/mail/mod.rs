//! Certificate delivery by email.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{error, info};

#[cfg(test)]
use mockall::automock;

use crate::error::DeliveryError;
use crate::pdf::ExportedDocument;

pub const DEFAULT_SUBJECT: &str = "Your Course Certificate";

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub sender_email: String,
    pub sender_password: String,
}

/// SMTP settings as resolved from configuration.
#[derive(Debug, Clone)]
pub enum SmtpConfig {
    Ready(SmtpSettings),
    /// Names of the settings that were not provided.
    Incomplete(Vec<&'static str>),
}

#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub recipient_name: String,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    pub attachment: ExportedDocument,
}

impl OutgoingMessage {
    pub fn certificate(
        recipient_name: &str,
        recipient_email: &str,
        subject: &str,
        organization: &str,
        attachment: ExportedDocument,
    ) -> Self {
        let body = format!(
            "Dear {},\n\n\
             Thank you for participating in our course. We are delighted to have you with us.\n\
             Please find your certificate attached.\n\n\
             Best regards,\n\
             {}",
            recipient_name, organization
        );
        Self {
            recipient_name: recipient_name.to_string(),
            recipient_email: recipient_email.to_string(),
            subject: subject.to_string(),
            body,
            attachment,
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Fails without touching the network when required settings are absent.
    fn ensure_configured(&self) -> Result<(), DeliveryError>;

    async fn send(&self, message: &OutgoingMessage) -> Result<(), DeliveryError>;
}

pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn settings(&self) -> Result<&SmtpSettings, DeliveryError> {
        match &self.config {
            SmtpConfig::Ready(settings) => Ok(settings),
            SmtpConfig::Incomplete(missing) => Err(DeliveryError::NotConfigured(missing.clone())),
        }
    }
}

fn parse_address(address: &str) -> Result<Address, DeliveryError> {
    address.parse::<Address>().map_err(|e| DeliveryError::InvalidAddress {
        address: address.to_string(),
        message: e.to_string(),
    })
}

/// Builds the multipart message: plain-text body plus the certificate.
pub fn build_message(sender_email: &str, message: &OutgoingMessage) -> Result<Message, DeliveryError> {
    let from = Mailbox::new(None, parse_address(sender_email)?);
    let to = Mailbox::new(
        Some(message.recipient_name.clone()),
        parse_address(&message.recipient_email)?,
    );

    let content_type = ContentType::parse(&message.attachment.content_type())
        .map_err(|e| DeliveryError::Message(e.to_string()))?;
    let attachment = Attachment::new(message.attachment.filename())
        .body(message.attachment.bytes.clone(), content_type);

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.clone())
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(message.body.clone()))
                .singlepart(attachment),
        )
        .map_err(|e| DeliveryError::Message(e.to_string()))
}

/// Splits SMTP failures into rejected credentials and everything else.
fn classify(err: lettre::transport::smtp::Error) -> DeliveryError {
    let rejected_credentials = err
        .status()
        .map(|code| matches!(code.to_string().as_str(), "530" | "534" | "535"))
        .unwrap_or(false);

    if rejected_credentials {
        DeliveryError::Authentication(err.to_string())
    } else {
        DeliveryError::Transport(err.to_string())
    }
}

#[async_trait]
impl DeliveryChannel for SmtpMailer {
    fn ensure_configured(&self) -> Result<(), DeliveryError> {
        self.settings().map(|_| ())
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        let settings = self.settings()?;
        let email = build_message(&settings.sender_email, message)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)
            .map_err(classify)?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.sender_email.clone(),
                settings.sender_password.clone(),
            ))
            .timeout(Some(Duration::from_secs(30)))
            .build();

        match transport.send(email).await {
            Ok(_) => {
                info!(
                    recipient = %message.recipient_email,
                    attachment = %message.attachment.filename(),
                    "Certificate email sent"
                );
                Ok(())
            }
            Err(e) => {
                let err = classify(e);
                error!(recipient = %message.recipient_email, error = %err, "Certificate email failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::DocumentFormat;

    fn message() -> OutgoingMessage {
        OutgoingMessage::certificate(
            "Jane Doe",
            "jane@example.com",
            DEFAULT_SUBJECT,
            "Acme Academy",
            ExportedDocument {
                format: DocumentFormat::Pdf,
                bytes: b"%PDF-1.5 fake".to_vec(),
            },
        )
    }

    #[test]
    fn body_greets_recipient_and_signs_with_organization() {
        let m = message();
        assert!(m.body.starts_with("Dear Jane Doe,"));
        assert!(m.body.ends_with("Acme Academy"));
        assert_eq!(m.subject, "Your Course Certificate");
    }

    #[test]
    fn message_carries_named_pdf_attachment() {
        let built = build_message("issuer@example.com", &message()).unwrap();
        let raw = String::from_utf8(built.formatted()).unwrap();

        assert!(raw.contains("Subject: Your Course Certificate"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("application/pdf"));
        assert!(raw.contains("certificate.pdf"));
        assert!(raw.contains("jane@example.com"));
    }

    #[test]
    fn invalid_recipient_is_rejected_before_sending() {
        let mut m = message();
        m.recipient_email = "not-an-address".to_string();
        let err = build_message("issuer@example.com", &m).unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn incomplete_config_fails_before_connecting() {
        let mailer = SmtpMailer::new(SmtpConfig::Incomplete(vec!["SMTP_SERVER", "SENDER_PASSWORD"]));

        let err = mailer.ensure_configured().unwrap_err();
        assert!(err.to_string().contains("SMTP_SERVER"));
        assert!(err.to_string().contains("SENDER_PASSWORD"));

        let err = mailer.send(&message()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::NotConfigured(_)));
    }
}
