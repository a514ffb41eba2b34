//! Sync client control routes.
//!
//! Only meaningful when the server fronts a remote quarry server; otherwise
//! every route answers with a `sync_disabled` error.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use quarry_engine::ReplayReport;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::sync::SyncControl;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TableStatus {
    pub online: bool,
    pub pending: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/connectivity", post(connectivity))
        .route("/sync/reconcile", post(reconcile))
        .route("/sync/dead-letters", get(dead_letters))
        .route("/sync/status", get(status))
}

fn controls(state: &AppState) -> Result<&[Arc<dyn SyncControl>]> {
    if state.sync.is_empty() {
        Err(AppError::SyncDisabled)
    } else {
        Ok(&state.sync)
    }
}

/// POST /sync/connectivity - report a connectivity change.
///
/// Coming back online starts a replay in the background.
async fn connectivity(
    State(state): State<AppState>,
    Json(request): Json<ConnectivityRequest>,
) -> Result<Json<BTreeMap<String, TableStatus>>> {
    for control in controls(&state)? {
        Arc::clone(control).set_online(request.online);
    }
    collect_status(&state).await.map(Json)
}

/// POST /sync/reconcile - replay queued mutations now.
async fn reconcile(State(state): State<AppState>) -> Result<Json<BTreeMap<String, ReplayReport>>> {
    let mut reports = BTreeMap::new();
    for control in controls(&state)? {
        reports.insert(control.table_name().to_string(), control.replay().await?);
    }
    Ok(Json(reports))
}

/// GET /sync/dead-letters
async fn dead_letters(State(state): State<AppState>) -> Result<Json<BTreeMap<String, Vec<Value>>>> {
    let mut letters = BTreeMap::new();
    for control in controls(&state)? {
        letters.insert(
            control.table_name().to_string(),
            control.dead_letter_documents().await?,
        );
    }
    Ok(Json(letters))
}

/// GET /sync/status
async fn status(State(state): State<AppState>) -> Result<Json<BTreeMap<String, TableStatus>>> {
    collect_status(&state).await.map(Json)
}

async fn collect_status(state: &AppState) -> Result<BTreeMap<String, TableStatus>> {
    let mut status = BTreeMap::new();
    for control in controls(state)? {
        status.insert(
            control.table_name().to_string(),
            TableStatus {
                online: control.online(),
                pending: control.queued().await?,
            },
        );
    }
    Ok(status)
}
