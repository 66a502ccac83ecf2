//! Axum server setup and router configuration.

use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use poolscan_sdk::objects::ChainStatus;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    chains: Vec<ChainStatus>,
}

impl HealthResponse {
    /// Healthy once every running pipeline reports healthy. No pipelines yet
    /// counts as starting.
    fn from_statuses(chains: Vec<ChainStatus>) -> (StatusCode, Self) {
        let (code, status) = if chains.is_empty() {
            (StatusCode::SERVICE_UNAVAILABLE, "starting")
        } else if chains.iter().all(|chain| chain.is_healthy) {
            (StatusCode::OK, "healthy")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        };
        let response = Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            chains,
        };
        (code, response)
    }
}

/// Per-chain pipeline health.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let statuses = state.coordinator.statuses().await;
    let (code, response) = HealthResponse::from_statuses(statuses);
    (code, Json(response))
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    database: &'static str,
}

/// Database reachability.
async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                database: "connected",
            }),
        ),
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    status: "not_ready",
                    database: "unreachable",
                }),
            )
        }
    }
}

/// Run the server with graceful shutdown support.
pub async fn run_server(router: Router, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
