use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::booking::{Booking, BookingDraft, BookingStatus};
use crate::models::worker::{LocationUpdate, WorkerLocationRecord};
use crate::store::{sort_newest_first, LocationChannel, TripStore, WriteOutcome};

/// Centralized push-based strategy: every handle in the process shares one
/// record set, and subscribers are served directly from the snapshot channel.
pub struct MemoryTripStore {
    bookings: Mutex<Vec<Booking>>,
    snapshot_tx: Arc<watch::Sender<Vec<Booking>>>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        let (snapshot_tx, _snapshot_rx) = watch::channel(Vec::new());
        Self {
            bookings: Mutex::new(Vec::new()),
            snapshot_tx: Arc::new(snapshot_tx),
        }
    }

    fn publish_snapshot(&self, mut bookings: Vec<Booking>) {
        sort_newest_first(&mut bookings);
        let _ = self.snapshot_tx.send(bookings);
    }

    fn mutate<F>(&self, id: Uuid, apply: F) -> WriteOutcome
    where
        F: FnOnce(&mut Booking) -> WriteOutcome,
    {
        let mut bookings = self.bookings.lock().expect("booking lock poisoned");
        let outcome = match bookings.iter_mut().find(|b| b.id == id) {
            Some(booking) => apply(booking),
            None => WriteOutcome::NotFound,
        };
        let snapshot = bookings.clone();
        drop(bookings);

        if outcome == WriteOutcome::Applied {
            self.publish_snapshot(snapshot);
        }
        outcome
    }
}

impl Default for MemoryTripStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TripStore for MemoryTripStore {
    async fn create(&self, draft: BookingDraft) -> Result<Uuid, AppError> {
        let booking = Booking::from_draft(draft, Utc::now());
        let id = booking.id;

        let mut bookings = self.bookings.lock().expect("booking lock poisoned");
        bookings.insert(0, booking);
        let snapshot = bookings.clone();
        drop(bookings);

        self.publish_snapshot(snapshot);
        Ok(id)
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Booking>> {
        self.snapshot_tx.subscribe()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, AppError> {
        let bookings = self.bookings.lock().expect("booking lock poisoned");
        Ok(bookings.iter().find(|b| b.id == id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: BookingStatus,
        worker_id: Option<Uuid>,
    ) -> Result<WriteOutcome, AppError> {
        Ok(self.mutate(id, |booking| {
            booking.status = status;
            if worker_id.is_some() {
                booking.worker_id = worker_id;
            }
            WriteOutcome::Applied
        }))
    }

    async fn update_status_if(
        &self,
        id: Uuid,
        expected: BookingStatus,
        status: BookingStatus,
        worker_id: Option<Uuid>,
    ) -> Result<WriteOutcome, AppError> {
        Ok(self.mutate(id, |booking| {
            if booking.status != expected {
                return WriteOutcome::Conflict;
            }
            booking.status = status;
            if worker_id.is_some() {
                booking.worker_id = worker_id;
            }
            WriteOutcome::Applied
        }))
    }

    async fn update_rating(&self, id: Uuid, rating: f64) -> Result<WriteOutcome, AppError> {
        Ok(self.mutate(id, |booking| {
            booking.rating = Some(rating);
            WriteOutcome::Applied
        }))
    }
}

/// Per-worker position records held in process, fanned out through one watch
/// sender per worker.
pub struct MemoryLocationChannel {
    records: DashMap<Uuid, Arc<watch::Sender<Option<WorkerLocationRecord>>>>,
}

impl MemoryLocationChannel {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    fn sender(&self, worker_id: Uuid) -> Arc<watch::Sender<Option<WorkerLocationRecord>>> {
        self.records
            .entry(worker_id)
            .or_insert_with(|| {
                let (tx, _rx) = watch::channel(None);
                Arc::new(tx)
            })
            .clone()
    }
}

impl Default for MemoryLocationChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationChannel for MemoryLocationChannel {
    async fn publish(&self, worker_id: Uuid, update: LocationUpdate) -> Result<(), AppError> {
        let sender = self.sender(worker_id);
        let merged = {
            let current = sender.borrow();
            update.merge_into(worker_id, current.as_ref(), Utc::now())
        };
        let _ = sender.send(Some(merged));
        Ok(())
    }

    fn subscribe(&self, worker_id: Uuid) -> watch::Receiver<Option<WorkerLocationRecord>> {
        self.sender(worker_id).subscribe()
    }

    async fn snapshot(&self) -> Result<Vec<WorkerLocationRecord>, AppError> {
        Ok(self
            .records
            .iter()
            .filter_map(|entry| entry.value().borrow().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::booking::{CargoDetails, TripPreference};
    use crate::models::worker::{GeoPoint, PresenceStatus};

    fn draft() -> BookingDraft {
        BookingDraft {
            service: "furniture".to_string(),
            cargo: CargoDetails {
                cargo_type: "boxes".to_string(),
                size: "small".to_string(),
                weight: "20kg".to_string(),
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

    #[tokio::test]
    async fn subscribe_delivers_current_list_immediately() {
        let store = MemoryTripStore::new();
        let id = store.create(draft()).await.unwrap();

        let rx = store.subscribe();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn consecutive_subscribes_see_identical_snapshots() {
        let store = MemoryTripStore::new();
        store.create(draft()).await.unwrap();

        let first = store.subscribe().borrow().clone();
        let second = store.subscribe().borrow().clone();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].id, second[0].id);
    }

    #[tokio::test]
    async fn newest_booking_listed_first() {
        let store = MemoryTripStore::new();
        let older = store.create(draft()).await.unwrap();
        let newer = store.create(draft()).await.unwrap();

        let snapshot = store.subscribe().borrow().clone();
        assert_eq!(snapshot[0].id, newer);
        assert_eq!(snapshot[1].id, older);
    }

    #[tokio::test]
    async fn unknown_id_is_absorbed_as_not_found() {
        let store = MemoryTripStore::new();
        let outcome = store
            .update_status(Uuid::new_v4(), BookingStatus::Accepted, None)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::NotFound);
    }

    #[tokio::test]
    async fn conditional_update_rejects_stale_expectation() {
        let store = MemoryTripStore::new();
        let id = store.create(draft()).await.unwrap();
        let worker = Uuid::new_v4();

        let first = store
            .update_status_if(id, BookingStatus::Pending, BookingStatus::Accepted, Some(worker))
            .await
            .unwrap();
        assert_eq!(first, WriteOutcome::Applied);

        let second = store
            .update_status_if(
                id,
                BookingStatus::Pending,
                BookingStatus::Accepted,
                Some(Uuid::new_v4()),
            )
            .await
            .unwrap();
        assert_eq!(second, WriteOutcome::Conflict);

        let booking = store.get(id).await.unwrap().unwrap();
        assert_eq!(booking.worker_id, Some(worker));
    }

    #[tokio::test]
    async fn rating_is_last_write_wins() {
        let store = MemoryTripStore::new();
        let id = store.create(draft()).await.unwrap();

        store.update_rating(id, 4.0).await.unwrap();
        store.update_rating(id, 4.0).await.unwrap();
        store.update_rating(id, 5.0).await.unwrap();

        let booking = store.get(id).await.unwrap().unwrap();
        assert_eq!(booking.rating, Some(5.0));
    }

    #[tokio::test]
    async fn location_publish_merges_partial_updates() {
        let channel = MemoryLocationChannel::new();
        let worker = Uuid::new_v4();

        channel
            .publish(
                worker,
                LocationUpdate::position(GeoPoint {
                    lat: 15.35,
                    lng: 44.2,
                })
                .with_online(true)
                .with_status(PresenceStatus::Idle),
            )
            .await
            .unwrap();

        channel
            .publish(
                worker,
                LocationUpdate::default()
                    .with_online(false)
                    .with_status(PresenceStatus::Offline),
            )
            .await
            .unwrap();

        let record = channel.subscribe(worker).borrow().clone().unwrap();
        assert_eq!(record.lat, 15.35);
        assert_eq!(record.lng, 44.2);
        assert!(!record.is_online);
        assert_eq!(record.status, PresenceStatus::Offline);
    }

    #[tokio::test]
    async fn absent_worker_subscription_starts_as_none() {
        let channel = MemoryLocationChannel::new();
        let rx = channel.subscribe(Uuid::new_v4());
        assert!(rx.borrow().is_none());
    }
}
