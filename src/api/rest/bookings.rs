use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::lifecycle::TransitionOutcome;
use crate::models::booking::{Booking, BookingDraft, CargoDetails, TripPreference};
use crate::models::route::{RoutePreference, RouteSource};
use crate::models::worker::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/accept", post(accept_booking))
        .route("/bookings/:id/cancel", post(cancel_booking))
        .route("/bookings/:id/arrive", post(mark_arrived))
        .route("/bookings/:id/begin", post(begin_trip))
        .route("/bookings/:id/complete", post(complete_trip))
        .route("/bookings/:id/rating", put(rate_booking))
}

#[derive(Deserialize)]
pub struct CreateBookingRequest {
    pub service: String,
    pub cargo: CargoDetails,
    pub preference: TripPreference,
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    pub pickup: GeoPoint,
    pub drop_off: GeoPoint,
    #[serde(default)]
    pub route_preference: Option<RoutePreference>,
}

#[derive(Deserialize)]
pub struct AcceptRequest {
    pub worker_id: Uuid,
}

#[derive(Deserialize)]
pub struct RatingRequest {
    pub rating: f64,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<Json<Booking>, AppError> {
    if payload.service.trim().is_empty() {
        return Err(AppError::BadRequest("service cannot be empty".to_string()));
    }

    let preference = payload.route_preference.unwrap_or(RoutePreference::Fastest);
    let fetch = state
        .resolver
        .fetch_route(payload.pickup, payload.drop_off, preference)
        .await;

    let source = match fetch.source {
        RouteSource::Service => "service",
        RouteSource::Fallback => "fallback",
    };
    state
        .metrics
        .route_fetches_total
        .with_label_values(&[source])
        .inc();

    let draft = BookingDraft {
        service: payload.service,
        cargo: payload.cargo,
        preference: payload.preference,
        scheduled_time: payload.scheduled_time,
        pickup: payload.pickup,
        drop_off: payload.drop_off,
        route: Some(fetch.info),
    };

    let id = state.lifecycle.create(draft).await?;
    state.metrics.bookings_created_total.inc();
    info!(booking_id = %id, route_source = source, "booking created");

    let booking = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("booking {id} vanished after create")))?;
    Ok(Json(booking))
}

async fn list_bookings(State(state): State<Arc<AppState>>) -> Json<Vec<Booking>> {
    Json(state.store.subscribe().borrow().clone())
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {id} not found")))?;
    Ok(Json(booking))
}

async fn accept_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptRequest>,
) -> Result<Json<Booking>, AppError> {
    let outcome = state.lifecycle.accept(id, payload.worker_id).await?;
    respond(&state, "accept", id, outcome).await
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let outcome = state.lifecycle.cancel(id).await?;
    respond(&state, "cancel", id, outcome).await
}

async fn mark_arrived(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let outcome = state.lifecycle.mark_arrived(id).await?;
    respond(&state, "arrive", id, outcome).await
}

async fn begin_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let outcome = state.lifecycle.begin_trip(id).await?;
    respond(&state, "begin", id, outcome).await
}

async fn complete_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let outcome = state.lifecycle.complete(id).await?;
    respond(&state, "complete", id, outcome).await
}

async fn rate_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RatingRequest>,
) -> Result<Json<Booking>, AppError> {
    if !(0.0..=5.0).contains(&payload.rating) {
        return Err(AppError::BadRequest(
            "rating must be between 0 and 5".to_string(),
        ));
    }

    let outcome = state.lifecycle.rate(id, payload.rating).await?;
    respond(&state, "rate", id, outcome).await
}

fn outcome_label(outcome: TransitionOutcome) -> &'static str {
    match outcome {
        TransitionOutcome::Applied => "applied",
        TransitionOutcome::Rejected => "rejected",
        TransitionOutcome::NotFound => "not_found",
        TransitionOutcome::Conflict => "conflict",
    }
}

async fn respond(
    state: &AppState,
    transition: &str,
    id: Uuid,
    outcome: TransitionOutcome,
) -> Result<Json<Booking>, AppError> {
    state
        .metrics
        .booking_transitions_total
        .with_label_values(&[transition, outcome_label(outcome)])
        .inc();

    match outcome {
        TransitionOutcome::Applied => {
            let booking = state
                .store
                .get(id)
                .await?
                .ok_or_else(|| AppError::Internal(format!("booking {id} vanished")))?;
            Ok(Json(booking))
        }
        TransitionOutcome::NotFound => {
            Err(AppError::NotFound(format!("booking {id} not found")))
        }
        TransitionOutcome::Rejected => Err(AppError::Conflict(format!(
            "transition {transition} not allowed from current status"
        ))),
        TransitionOutcome::Conflict => Err(AppError::Conflict(
            "booking was taken by another worker".to_string(),
        )),
    }
}
