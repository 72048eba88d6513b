use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::models::booking::BookingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// What a worker is currently doing, as broadcast alongside its position.
/// While a booking is active the presence status mirrors the booking status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Offline,
    Idle,
    Trip(BookingStatus),
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Offline => "offline",
            PresenceStatus::Idle => "idle",
            PresenceStatus::Trip(status) => status.as_str(),
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "offline" => Ok(PresenceStatus::Offline),
            "idle" => Ok(PresenceStatus::Idle),
            other => other
                .parse::<BookingStatus>()
                .map(PresenceStatus::Trip)
                .map_err(|_| format!("unknown presence status: {other}")),
        }
    }
}

impl Serialize for PresenceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PresenceStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// One current-position record per worker. Writes merge: fields a publish
/// leaves unset keep their previous values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLocationRecord {
    pub worker_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub is_online: bool,
    pub status: PresenceStatus,
    pub updated_at: DateTime<Utc>,
}

/// Partial upsert for a worker's location record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub position: Option<GeoPoint>,
    pub is_online: Option<bool>,
    pub status: Option<PresenceStatus>,
    /// Publisher-supplied timestamp; the channel stamps receipt time when
    /// unset.
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationUpdate {
    pub fn position(point: GeoPoint) -> Self {
        Self {
            position: Some(point),
            ..Self::default()
        }
    }

    pub fn with_online(mut self, is_online: bool) -> Self {
        self.is_online = Some(is_online);
        self
    }

    pub fn with_status(mut self, status: PresenceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Applies this update on top of `current`, or materializes a fresh
    /// record when the worker has never published before.
    pub fn merge_into(
        &self,
        worker_id: Uuid,
        current: Option<&WorkerLocationRecord>,
        now: DateTime<Utc>,
    ) -> WorkerLocationRecord {
        let mut record = current.cloned().unwrap_or(WorkerLocationRecord {
            worker_id,
            lat: 0.0,
            lng: 0.0,
            is_online: false,
            status: PresenceStatus::Offline,
            updated_at: now,
        });

        if let Some(point) = self.position {
            record.lat = point.lat;
            record.lng = point.lng;
        }
        if let Some(is_online) = self.is_online {
            record.is_online = is_online;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        record.updated_at = self.timestamp.unwrap_or(now);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_retains_unspecified_fields() {
        let worker = Uuid::new_v4();
        let now = Utc::now();

        let first = LocationUpdate::position(GeoPoint {
            lat: 15.35,
            lng: 44.2,
        })
        .with_online(true)
        .with_status(PresenceStatus::Idle)
        .merge_into(worker, None, now);

        let second = LocationUpdate::default()
            .with_online(false)
            .with_status(PresenceStatus::Offline)
            .merge_into(worker, Some(&first), now);

        assert_eq!(second.lat, 15.35);
        assert_eq!(second.lng, 44.2);
        assert!(!second.is_online);
        assert_eq!(second.status, PresenceStatus::Offline);
    }

    #[test]
    fn presence_status_round_trips_through_strings() {
        for status in [
            PresenceStatus::Offline,
            PresenceStatus::Idle,
            PresenceStatus::Trip(BookingStatus::InProgress),
        ] {
            let parsed: PresenceStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }

        assert!("warping".parse::<PresenceStatus>().is_err());
    }
}
