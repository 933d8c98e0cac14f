mod config;
mod db;
mod error;
mod issuance;
mod ledger;
mod mail;
mod pdf;
mod render;
mod routes;
mod serial;
mod state;
mod templates;

use std::sync::Arc;

use crate::issuance::{Issuer, MessageSettings, TemplateRenderer};
use crate::mail::SmtpMailer;
use crate::serial::SerialAllocator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "certifier=info,tower_http=info".into()),
        )
        .init();

    let config = config::Config::from_env()?;

    let ledger = ledger::open_store(&config.ledger).await?;
    if let mail::SmtpConfig::Incomplete(missing) = &config.smtp {
        tracing::warn!(missing = ?missing, "Mail delivery is not configured; issuance will fail until it is");
    }

    let issuer = Issuer::new(
        ledger,
        Arc::new(SmtpMailer::new(config.smtp.clone())),
        SerialAllocator::new(config.serial_scheme, config.serial_prefix.clone()),
        TemplateRenderer::new(config.layout.clone(), config.format),
        MessageSettings {
            subject: config.subject.clone(),
            organization: config.organization.clone(),
        },
    );

    let config = Arc::new(config);
    let state = Arc::new(state::AppState {
        issuer: Arc::new(issuer),
        config: config.clone(),
    });

    let app = routes::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(
        scheme = %config.serial_scheme,
        format = %config.format,
        "Certifier listening on http://{}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
