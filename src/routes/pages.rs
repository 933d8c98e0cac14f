use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    Form,
};
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use std::sync::Arc;
use tera::Context;

use crate::error::{DeliveryError, IssuanceError};
use crate::issuance::IssuanceRequest;
use crate::state::AppState;

pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut ctx = Context::new();
    ctx.insert("organization", &state.config.organization);
    ctx.insert("backend", state.issuer.ledger().backend());
    ctx.insert("scheme", &state.issuer.allocator().scheme().to_string());
    ctx.insert("today", &Local::now().date_naive().format("%Y-%m-%d").to_string());
    ctx.insert("password_required", &state.config.access_password.is_some());
    ctx.insert("unrecorded", &state.issuer.unrecorded().len());
    render_template("index.html", ctx)
}

#[derive(Deserialize)]
pub struct IssueForm {
    password: Option<String>,
    name: String,
    email: String,
    date: Option<String>,
}

pub async fn issue_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<IssueForm>,
) -> impl IntoResponse {
    if !state.authorized(form.password.as_deref()) {
        tracing::warn!("Issuance rejected: incorrect password");
        return error_page(StatusCode::UNAUTHORIZED, "Incorrect password.".to_string());
    }

    let issue_date = match form.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        None => Local::now().date_naive(),
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => {
                return error_page(
                    StatusCode::BAD_REQUEST,
                    format!("'{}' is not a valid date.", raw),
                )
            }
        },
    };

    let request = IssuanceRequest {
        recipient_name: form.name,
        recipient_email: form.email,
        issue_date,
    };

    match state.issuer.issue(request).await {
        Ok(outcome) => {
            let mut ctx = Context::new();
            ctx.insert("record", outcome.record());
            ctx.insert("warning", &outcome.warning());
            ctx.insert("error", &Option::<String>::None);
            (StatusCode::OK, render_template("result.html", ctx))
        }
        Err(e) => {
            tracing::error!("Issuance failed: {}", e);
            error_page(status_for(&e), e.to_string())
        }
    }
}

fn status_for(err: &IssuanceError) -> StatusCode {
    match err {
        IssuanceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        IssuanceError::Delivery(DeliveryError::InvalidAddress { .. }) => StatusCode::BAD_REQUEST,
        IssuanceError::Delivery(DeliveryError::NotConfigured(_)) => StatusCode::SERVICE_UNAVAILABLE,
        IssuanceError::Delivery(_) => StatusCode::BAD_GATEWAY,
        IssuanceError::Resource(_) | IssuanceError::Render(_) | IssuanceError::Export(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_page(status: StatusCode, message: String) -> (StatusCode, Html<String>) {
    let mut ctx = Context::new();
    ctx.insert("record", &Option::<String>::None);
    ctx.insert("warning", &Option::<String>::None);
    ctx.insert("error", &message);
    (status, render_template("result.html", ctx))
}

fn render_template(name: &str, ctx: Context) -> Html<String> {
    let tera = crate::templates::get_tera();
    let rendered = tera.render(name, &ctx).unwrap_or_else(|e| {
        tracing::error!("Template {} failed to render: {}", name, e);
        format!("Template error: {}", name)
    });
    Html(rendered)
}
