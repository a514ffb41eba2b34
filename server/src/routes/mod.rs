//! HTTP route definitions.

mod health;
pub mod records;
pub mod sync;

pub use health::HealthResponse;
pub use records::TableState;

use crate::AppState;
use axum::Router;

/// Routes shared by every table: health, notifications and sync control.
pub fn create_routes() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(sync::routes())
}
