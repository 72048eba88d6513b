use serde::{Deserialize, Serialize};

use crate::models::worker::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutePreference {
    Fastest,
    Shortest,
}

impl RoutePreference {
    pub fn other(&self) -> RoutePreference {
        match self {
            RoutePreference::Fastest => RoutePreference::Shortest,
            RoutePreference::Shortest => RoutePreference::Fastest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutePreference::Fastest => "fastest",
            RoutePreference::Shortest => "shortest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub distance_km: f64,
    pub duration_min: f64,
    pub polyline: Vec<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    /// Resolved by the external routing service.
    Service,
    /// Synthetic straight-line interpolation; the reliability backstop.
    Fallback,
}

/// Informational signal accompanying a resolved route: either which
/// preference is being shown, or that both preferences are effectively the
/// same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSignal {
    Showing(RoutePreference),
    Identical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteFetch {
    pub info: RouteInfo,
    pub source: RouteSource,
    pub preference: RoutePreference,
    pub signal: RouteSignal,
    /// Per-session fetch sequence number; results carrying a stale sequence
    /// should be discarded by the caller.
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceCandidate {
    pub display_name: String,
    pub lat: f64,
    pub lon: f64,
}
