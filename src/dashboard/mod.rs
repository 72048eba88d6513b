use std::sync::Arc;

use serde::Serialize;

use crate::error::AppError;
use crate::models::booking::{round2, BookingStatus};
use crate::store::{LocationChannel, TripStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_revenue: f64,
    pub total_trips: usize,
    pub active_workers: usize,
    pub completed_trips: usize,
}

/// Read-only statistics for the observer. Recomputed from the full booking
/// and worker snapshots on every call; O(n), fine at this scale.
pub struct DashboardAggregator {
    store: Arc<dyn TripStore>,
    locations: Arc<dyn LocationChannel>,
}

impl DashboardAggregator {
    pub fn new(store: Arc<dyn TripStore>, locations: Arc<dyn LocationChannel>) -> Self {
        Self { store, locations }
    }

    pub async fn stats(&self) -> Result<DashboardStats, AppError> {
        let bookings = self.store.subscribe().borrow().clone();
        let workers = self.locations.snapshot().await?;

        let completed_trips = bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Completed)
            .count();
        let total_revenue = round2(
            bookings
                .iter()
                .filter(|b| b.status == BookingStatus::Completed)
                .filter_map(|b| b.fare())
                .sum::<f64>(),
        );

        Ok(DashboardStats {
            total_revenue,
            total_trips: bookings.len(),
            active_workers: workers.iter().filter(|w| w.is_online).count(),
            completed_trips,
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::booking::{BookingDraft, CargoDetails, TripPreference};
    use crate::models::route::RouteInfo;
    use crate::models::worker::{GeoPoint, LocationUpdate, PresenceStatus};
    use crate::store::memory::{MemoryLocationChannel, MemoryTripStore};

    fn draft_with_distance(distance_km: f64) -> BookingDraft {
        BookingDraft {
            service: "furniture".to_string(),
            cargo: CargoDetails {
                cargo_type: "boxes".to_string(),
                size: "small".to_string(),
                weight: "10kg".to_string(),
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
            route: Some(RouteInfo {
                distance_km,
                duration_min: distance_km / 40.0 * 60.0,
                polyline: vec![],
            }),
        }
    }

    #[tokio::test]
    async fn stats_count_only_completed_revenue() {
        let store = Arc::new(MemoryTripStore::new());
        let locations = Arc::new(MemoryLocationChannel::new());

        let completed = store.create(draft_with_distance(10.0)).await.unwrap();
        store
            .update_status(completed, BookingStatus::Completed, None)
            .await
            .unwrap();
        store.create(draft_with_distance(5.0)).await.unwrap();

        let dashboard = DashboardAggregator::new(store, locations);
        let stats = dashboard.stats().await.unwrap();

        assert_eq!(stats.completed_trips, 1);
        assert_eq!(stats.total_trips, 2);
        assert_eq!(stats.total_revenue, 7.0);
        assert_eq!(stats.active_workers, 0);
    }

    #[tokio::test]
    async fn active_workers_counts_online_records() {
        let store = Arc::new(MemoryTripStore::new());
        let locations = Arc::new(MemoryLocationChannel::new());

        locations
            .publish(
                Uuid::new_v4(),
                LocationUpdate::position(GeoPoint { lat: 1.0, lng: 1.0 })
                    .with_online(true)
                    .with_status(PresenceStatus::Idle),
            )
            .await
            .unwrap();
        locations
            .publish(
                Uuid::new_v4(),
                LocationUpdate::position(GeoPoint { lat: 2.0, lng: 2.0 })
                    .with_online(false)
                    .with_status(PresenceStatus::Offline),
            )
            .await
            .unwrap();

        let dashboard = DashboardAggregator::new(store, locations);
        let stats = dashboard.stats().await.unwrap();
        assert_eq!(stats.active_workers, 1);
    }

    #[tokio::test]
    async fn empty_dataset_yields_zeroed_stats() {
        let dashboard = DashboardAggregator::new(
            Arc::new(MemoryTripStore::new()),
            Arc::new(MemoryLocationChannel::new()),
        );
        let stats = dashboard.stats().await.unwrap();
        assert_eq!(
            stats,
            DashboardStats {
                total_revenue: 0.0,
                total_trips: 0,
                active_workers: 0,
                completed_trips: 0,
            }
        );
    }
}
