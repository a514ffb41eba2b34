//! CRUD routes for one record table.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use quarry_engine::{ChangeEvent, Entity, MutationKind, QueryFilter, RecordKey};
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::storage::{not_found, Repository};
use crate::websocket::ChangeHub;

/// Handler state for the routes of one table.
pub struct TableState<R: Entity> {
    pub repo: Arc<dyn Repository<R>>,
    pub hub: Arc<ChangeHub>,
    /// Whether the routes announce their own changes; off when the
    /// repository announces changes itself
    pub publish: bool,
}

impl<R: Entity> Clone for TableState<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            hub: Arc::clone(&self.hub),
            publish: self.publish,
        }
    }
}

impl<R: Entity> TableState<R> {
    fn announce(&self, key: Option<&R::Key>, kind: MutationKind) {
        if self.publish {
            let key = key.map(RecordKey::to_key_value);
            self.hub.publish(ChangeEvent::new(self.repo.table(), key, kind));
        }
    }
}

#[derive(Debug, Serialize)]
struct Deleted {
    deleted: bool,
}

/// Routes under `/api/<table>`.
pub fn routes<R: Entity>(state: TableState<R>) -> Router {
    let base = format!("/api/{}", state.repo.table());
    Router::new()
        .route(
            &base,
            get(list::<R>)
                .post(insert::<R>)
                .put(update::<R>)
                .delete(delete_all::<R>),
        )
        .route(&format!("{base}/query"), post(query::<R>))
        .route(&format!("{base}/{{id}}"), get(fetch::<R>).delete(delete::<R>))
        .with_state(state)
}

/// GET /api/<table>
async fn list<R: Entity>(State(state): State<TableState<R>>) -> Result<Json<Vec<R>>> {
    Ok(Json(state.repo.fetch_all().await?))
}

/// POST /api/<table>/query - filtered and projected records.
async fn query<R: Entity>(
    State(state): State<TableState<R>>,
    Json(filter): Json<QueryFilter>,
) -> Result<Json<Vec<Value>>> {
    Ok(Json(state.repo.fetch_projected(&filter).await?))
}

/// GET /api/<table>/{id}
async fn fetch<R: Entity>(
    State(state): State<TableState<R>>,
    Path(id): Path<String>,
) -> Result<Json<R>> {
    let key = R::Key::parse_key(&id)?;
    match state.repo.fetch_by_id(&key).await? {
        Some(record) => Ok(Json(record)),
        None => Err(AppError::Engine(not_found::<R>(state.repo.table(), &key))),
    }
}

/// POST /api/<table>
async fn insert<R: Entity>(
    State(state): State<TableState<R>>,
    Json(record): Json<R>,
) -> Result<(StatusCode, Json<R>)> {
    let stored = state.repo.insert(record).await?;
    tracing::debug!(table = %state.repo.table(), key = %stored.key(), "Inserted record");
    state.announce(Some(&stored.key()), MutationKind::Insert);
    Ok((StatusCode::CREATED, Json(stored)))
}

/// PUT /api/<table>
async fn update<R: Entity>(
    State(state): State<TableState<R>>,
    Json(record): Json<R>,
) -> Result<Json<R>> {
    let stored = state.repo.update(record).await?;
    state.announce(Some(&stored.key()), MutationKind::Update);
    Ok(Json(stored))
}

/// DELETE /api/<table>/{id}
async fn delete<R: Entity>(
    State(state): State<TableState<R>>,
    Path(id): Path<String>,
) -> Result<Json<Deleted>> {
    let key = R::Key::parse_key(&id)?;
    let deleted = state.repo.delete_by_id(&key).await?;
    if deleted {
        state.announce(Some(&key), MutationKind::Delete);
    }
    Ok(Json(Deleted { deleted }))
}

/// DELETE /api/<table>
async fn delete_all<R: Entity>(State(state): State<TableState<R>>) -> Result<StatusCode> {
    state.repo.delete_all().await?;
    tracing::info!(table = %state.repo.table(), "Cleared table");
    state.announce(None, MutationKind::DeleteAll);
    Ok(StatusCode::NO_CONTENT)
}
