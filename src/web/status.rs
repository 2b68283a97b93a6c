//! Health and status handlers.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::trace;
use ts_rs::TS;

use crate::state::{AppState, ServiceStatus};

#[derive(Serialize, TS)]
#[ts(export)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    database: ServiceStatus,
    services: BTreeMap<String, ServiceStatus>,
}

/// Liveness probe.
pub(super) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": chrono::Utc::now() }))
}

/// Status endpoint showing per-service and database health.
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let services: BTreeMap<String, ServiceStatus> =
        state.service_statuses.all().into_iter().collect();

    let database = match crate::data::health::ping(&state.db_pool).await {
        Ok(latency) => {
            trace!(?latency, "database ping");
            ServiceStatus::Active
        }
        Err(_) => ServiceStatus::Error,
    };

    let overall = if database == ServiceStatus::Error
        || services.values().any(|s| *s == ServiceStatus::Error)
    {
        ServiceStatus::Error
    } else if services.values().any(|s| *s == ServiceStatus::Starting) {
        ServiceStatus::Starting
    } else {
        ServiceStatus::Active
    };

    Json(StatusResponse {
        status: overall,
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_HASH").to_string(),
        database,
        services,
    })
}
