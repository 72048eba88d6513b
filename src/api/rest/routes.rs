use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::models::route::{PlaceCandidate, RouteFetch, RoutePreference};
use crate::models::worker::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/routes/preview", post(preview_route))
        .route("/geocode/search", get(search_location))
        .route("/geocode/reverse", get(reverse_geocode))
        .route(
            "/geocode/recent",
            get(recent_searches).post(remember_search),
        )
}

#[derive(Deserialize)]
pub struct RoutePreviewRequest {
    pub start: GeoPoint,
    pub end: GeoPoint,
    #[serde(default)]
    pub preference: Option<RoutePreference>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

#[derive(Deserialize)]
pub struct ReverseQuery {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_lang")]
    pub lang: String,
}

fn default_lang() -> String {
    "en".to_string()
}

async fn preview_route(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RoutePreviewRequest>,
) -> Json<RouteFetch> {
    let preference = payload.preference.unwrap_or(RoutePreference::Fastest);
    let fetch = state
        .resolver
        .fetch_route(payload.start, payload.end, preference)
        .await;

    let source = match fetch.source {
        crate::models::route::RouteSource::Service => "service",
        crate::models::route::RouteSource::Fallback => "fallback",
    };
    state
        .metrics
        .route_fetches_total
        .with_label_values(&[source])
        .inc();

    Json(fetch)
}

async fn search_location(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<PlaceCandidate>> {
    Json(state.resolver.search_location(&query.q, &query.lang).await)
}

async fn reverse_geocode(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReverseQuery>,
) -> Json<Option<String>> {
    let point = GeoPoint {
        lat: query.lat,
        lng: query.lon,
    };
    Json(state.resolver.reverse_geocode(point, &query.lang).await)
}

async fn recent_searches(State(state): State<Arc<AppState>>) -> Json<Vec<PlaceCandidate>> {
    Json(state.resolver.recent_searches())
}

async fn remember_search(
    State(state): State<Arc<AppState>>,
    Json(candidate): Json<PlaceCandidate>,
) -> StatusCode {
    state.resolver.remember_search(candidate);
    StatusCode::NO_CONTENT
}
