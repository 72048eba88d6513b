use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::route::RouteInfo;
use crate::models::worker::GeoPoint;

pub const FARE_PER_KM: f64 = 0.5;
pub const FARE_BASE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Accepted,
        BookingStatus::Arrived,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Arrived => "arrived",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(BookingStatus::Pending),
            "accepted" => Ok(BookingStatus::Accepted),
            "arrived" => Ok(BookingStatus::Arrived),
            "in_progress" => Ok(BookingStatus::InProgress),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CargoDetails {
    pub cargo_type: String,
    pub size: String,
    pub weight: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TripPreference {
    FastDelivery,
    SafePackaging,
    ScheduleTrip,
}

/// A transport request as the requester submits it. The store assigns the
/// id, creation timestamp, and initial status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDraft {
    pub service: String,
    pub cargo: CargoDetails,
    pub preference: TripPreference,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub pickup: GeoPoint,
    pub drop_off: GeoPoint,
    pub route: Option<RouteInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub service: String,
    pub cargo: CargoDetails,
    pub preference: TripPreference,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub pickup: GeoPoint,
    pub drop_off: GeoPoint,
    pub route: Option<RouteInfo>,
    pub created_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub worker_id: Option<Uuid>,
    pub rating: Option<f64>,
}

impl Booking {
    /// Materializes a draft into a pending booking. UUID v7 keeps ids
    /// creation-ordered.
    pub fn from_draft(draft: BookingDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            service: draft.service,
            cargo: draft.cargo,
            preference: draft.preference,
            scheduled_time: draft.scheduled_time,
            pickup: draft.pickup,
            drop_off: draft.drop_off,
            route: draft.route,
            created_at,
            status: BookingStatus::Pending,
            worker_id: None,
            rating: None,
        }
    }

    /// Fare derived from the resolved route; `None` until a route exists.
    pub fn fare(&self) -> Option<f64> {
        self.route
            .as_ref()
            .map(|route| round2(route.distance_km * FARE_PER_KM + FARE_BASE))
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> BookingDraft {
        BookingDraft {
            service: "furniture".to_string(),
            cargo: CargoDetails {
                cargo_type: "boxes".to_string(),
                size: "medium".to_string(),
                weight: "120kg".to_string(),
            },
            preference: TripPreference::FastDelivery,
            scheduled_time: None,
            pickup: GeoPoint {
                lat: 15.3694,
                lng: 44.191,
            },
            drop_off: GeoPoint {
                lat: 15.3547,
                lng: 44.2066,
            },
            route: None,
        }
    }

    #[test]
    fn draft_materializes_as_pending_without_worker() {
        let booking = Booking::from_draft(draft(), Utc::now());
        assert_eq!(booking.status, BookingStatus::Pending);
        assert!(booking.worker_id.is_none());
        assert!(booking.rating.is_none());
    }

    #[test]
    fn fare_follows_linear_formula() {
        let mut booking = Booking::from_draft(draft(), Utc::now());
        assert_eq!(booking.fare(), None);

        booking.route = Some(RouteInfo {
            distance_km: 10.0,
            duration_min: 15.0,
            polyline: vec![],
        });
        assert_eq!(booking.fare(), Some(7.0));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
    }
}
