mod api;
mod pages;

pub use api::{download_ledger, ledger_json, reconcile, template_preview};
pub use pages::{index, issue_handler};

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/issue", post(issue_handler))
        .route("/template/preview", get(template_preview))
        .route("/api/ledger", get(ledger_json))
        .route("/download/ledger", get(download_ledger))
        .route("/api/reconcile", post(reconcile))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
