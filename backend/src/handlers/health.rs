//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

/// Reports whether the ledger database answers queries
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();

    Json(HealthResponse {
        status: if reachable { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database: if reachable { "connected" } else { "disconnected" },
    })
}
