use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::booking::BookingStatus;
use crate::models::worker::{GeoPoint, WorkerLocationRecord};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/workers", get(list_workers))
        .route("/workers/nearby", get(nearby_workers))
        .route("/workers/:id/location", get(worker_location))
        .route("/workers/:id/online", post(go_online))
        .route("/workers/:id/offline", post(go_offline))
        .route("/workers/:id/trip-status", post(set_trip_status))
        .route("/workers/:id/playback", post(start_playback))
        .route("/workers/:id/playback/stop", post(stop_playback))
}

#[derive(Deserialize)]
pub struct TripStatusRequest {
    pub status: Option<BookingStatus>,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_nearby_count")]
    pub count: usize,
}

fn default_nearby_count() -> usize {
    4
}

#[derive(Deserialize)]
pub struct PlaybackRequest {
    pub polyline: Vec<GeoPoint>,
}

async fn list_workers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WorkerLocationRecord>>, AppError> {
    Ok(Json(state.locations.snapshot().await?))
}

async fn worker_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkerLocationRecord>, AppError> {
    let record = state.locations.subscribe(id).borrow().clone();
    record
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("worker {id} has never published")))
}

async fn go_online(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkerLocationRecord>, AppError> {
    state.presence(id).go_online().await?;
    refresh_online_gauge(&state).await?;
    info!(worker_id = %id, "worker online");
    current_record(&state, id)
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkerLocationRecord>, AppError> {
    state.presence(id).go_offline().await?;
    refresh_online_gauge(&state).await?;
    info!(worker_id = %id, "worker offline");
    current_record(&state, id)
}

async fn set_trip_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TripStatusRequest>,
) -> Result<Json<WorkerLocationRecord>, AppError> {
    state
        .presence(id)
        .set_active_trip_status(payload.status)
        .await?;
    current_record(&state, id)
}

async fn start_playback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PlaybackRequest>,
) -> Result<Json<WorkerLocationRecord>, AppError> {
    if payload.polyline.is_empty() {
        return Err(AppError::BadRequest("polyline cannot be empty".to_string()));
    }
    state.presence(id).start_playback(payload.polyline);
    current_record(&state, id)
}

async fn stop_playback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkerLocationRecord>, AppError> {
    state.presence(id).stop_playback();
    current_record(&state, id)
}

async fn nearby_workers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Json<Vec<GeoPoint>> {
    let center = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };
    Json(state.resolver.nearby_workers(center, query.count))
}

fn current_record(
    state: &AppState,
    worker_id: Uuid,
) -> Result<Json<WorkerLocationRecord>, AppError> {
    state
        .locations
        .subscribe(worker_id)
        .borrow()
        .clone()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("worker {worker_id} has never published")))
}

async fn refresh_online_gauge(state: &AppState) -> Result<(), AppError> {
    let online = state
        .locations
        .snapshot()
        .await?
        .iter()
        .filter(|record| record.is_online)
        .count();
    state.metrics.workers_online.set(online as i64);
    Ok(())
}
