use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Form, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::ledger::{serialize_records, LedgerStore};
use crate::state::AppState;

pub async fn ledger_json(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ledger = state.issuer.ledger();
    match ledger.load().await {
        Ok(records) => Json(serde_json::json!({
            "backend": ledger.backend(),
            "records": records,
            "unrecorded": state.issuer.unrecorded(),
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(backend = ledger.backend(), error = %e, "Ledger listing failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "error",
                    "message": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

pub async fn download_ledger(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let bytes = match state.issuer.ledger().load().await {
        Ok(records) => serialize_records(&records),
        Err(e) => Err(e),
    };

    match bytes {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"certificates.csv\""),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Ledger download failed");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

pub async fn template_preview(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let issuer = state.issuer.clone();
    let preview = tokio::task::spawn_blocking(move || issuer.renderer().preview_png()).await;

    match preview {
        Ok(Ok(png)) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Ok(Err(e)) => {
            tracing::error!("Template preview failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
pub struct ReconcileForm {
    password: Option<String>,
}

pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ReconcileForm>,
) -> impl IntoResponse {
    if !state.authorized(form.password.as_deref()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "status": "error",
                "message": "Incorrect password.",
            })),
        )
            .into_response();
    }

    let report = state.issuer.reconcile().await;
    Json(report).into_response()
}
