//! Built-in API routes.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Debug, Clone)]
struct AppInfo {
    environment: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

/// Router exposing `GET /v1/healthcheck`.
pub fn routes(environment: &str) -> Router {
    Router::new()
        .route("/v1/healthcheck", get(healthcheck))
        .with_state(AppInfo {
            environment: environment.to_string(),
        })
}

async fn healthcheck(State(info): State<AppInfo>) -> Json<Health> {
    Json(Health {
        status: "available",
        system_info: SystemInfo {
            environment: info.environment,
            version: env!("CARGO_PKG_VERSION"),
        },
    })
}
