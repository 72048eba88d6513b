pub mod bookings;
pub mod routes;
pub mod workers;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;

use crate::dashboard::DashboardStats;
use crate::error::AppError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(bookings::router())
        .merge(workers::router())
        .merge(routes::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .route("/ws", get(ws::bookings_feed))
        .route("/ws/workers/:id", get(ws::worker_feed))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    bookings: usize,
    workers: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    let bookings = state.store.subscribe().borrow().len();
    let workers = state.locations.snapshot().await?.len();

    Ok(Json(HealthResponse {
        status: "ok",
        bookings,
        workers,
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<DashboardStats>, AppError> {
    Ok(Json(state.dashboard.stats().await?))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
