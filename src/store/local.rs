use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::booking::{Booking, BookingDraft, BookingStatus};
use crate::models::worker::{LocationUpdate, WorkerLocationRecord};
use crate::store::{sort_newest_first, LocationChannel, TripStore, WriteOutcome};

pub const BOOKINGS_KEY: &str = "bookings";
pub const LOCATIONS_KEY: &str = "worker_locations";

/// Change notification for the local storage medium: one event per write,
/// tagged with the storage key that changed and the writing handle.
#[derive(Debug, Clone)]
pub struct LocalEvent {
    pub key: &'static str,
    pub origin: Uuid,
}

/// The notification primitive shared by every handle opened on the same
/// local medium. The composing application creates one bus and passes it to
/// each store it opens; handles re-read the backing file when an event from
/// another origin arrives, so the file stays the source of truth.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<LocalEvent>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn notify(&self, key: &'static str, origin: Uuid) {
        let _ = self.tx.send(LocalEvent { key, origin });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocalEvent> {
        self.tx.subscribe()
    }
}

/// Single-device fallback for bookings: the full list serialized as JSON
/// under one fixed path, rewritten on every mutation.
pub struct LocalTripStore {
    path: PathBuf,
    origin: Uuid,
    bus: LocalBus,
    snapshot_tx: Arc<watch::Sender<Vec<Booking>>>,
    write_lock: Mutex<()>,
}

impl LocalTripStore {
    pub async fn open(path: impl Into<PathBuf>, bus: LocalBus) -> Result<Self, AppError> {
        let path = path.into();
        ensure_parent_dir(&path).await?;

        let mut initial = match read_bookings(&path).await {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "starting with empty booking list");
                Vec::new()
            }
        };
        sort_newest_first(&mut initial);

        let (snapshot_tx, _snapshot_rx) = watch::channel(initial);
        let store = Self {
            path,
            origin: Uuid::new_v4(),
            bus,
            snapshot_tx: Arc::new(snapshot_tx),
            write_lock: Mutex::new(()),
        };
        store.spawn_listener();
        Ok(store)
    }

    fn spawn_listener(&self) {
        let mut events = self.bus.subscribe();
        let path = self.path.clone();
        let origin = self.origin;
        let snapshot_tx = self.snapshot_tx.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.key == BOOKINGS_KEY && event.origin != origin => {
                        reload_bookings(&path, &snapshot_tx).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        reload_bookings(&path, &snapshot_tx).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn with_list<F>(&self, apply: F) -> Result<WriteOutcome, AppError>
    where
        F: FnOnce(&mut Vec<Booking>) -> WriteOutcome,
    {
        let _guard = self.write_lock.lock().await;
        let mut list = read_bookings(&self.path).await?;
        let outcome = apply(&mut list);
        if outcome == WriteOutcome::Applied {
            write_json(&self.path, &list).await?;
            sort_newest_first(&mut list);
            let _ = self.snapshot_tx.send(list);
            self.bus.notify(BOOKINGS_KEY, self.origin);
        }
        Ok(outcome)
    }
}

#[async_trait]
impl TripStore for LocalTripStore {
    async fn create(&self, draft: BookingDraft) -> Result<Uuid, AppError> {
        let booking = Booking::from_draft(draft, Utc::now());
        let id = booking.id;

        let _guard = self.write_lock.lock().await;
        let mut list = read_bookings(&self.path).await?;
        list.insert(0, booking);
        write_json(&self.path, &list).await?;
        sort_newest_first(&mut list);
        let _ = self.snapshot_tx.send(list);
        self.bus.notify(BOOKINGS_KEY, self.origin);
        Ok(id)
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Booking>> {
        self.snapshot_tx.subscribe()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, AppError> {
        let list = read_bookings(&self.path).await?;
        Ok(list.into_iter().find(|b| b.id == id))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: BookingStatus,
        worker_id: Option<Uuid>,
    ) -> Result<WriteOutcome, AppError> {
        self.with_list(|list| match list.iter_mut().find(|b| b.id == id) {
            Some(booking) => {
                booking.status = status;
                if worker_id.is_some() {
                    booking.worker_id = worker_id;
                }
                WriteOutcome::Applied
            }
            None => WriteOutcome::NotFound,
        })
        .await
    }

    async fn update_status_if(
        &self,
        id: Uuid,
        expected: BookingStatus,
        status: BookingStatus,
        worker_id: Option<Uuid>,
    ) -> Result<WriteOutcome, AppError> {
        self.with_list(|list| match list.iter_mut().find(|b| b.id == id) {
            Some(booking) if booking.status == expected => {
                booking.status = status;
                if worker_id.is_some() {
                    booking.worker_id = worker_id;
                }
                WriteOutcome::Applied
            }
            Some(_) => WriteOutcome::Conflict,
            None => WriteOutcome::NotFound,
        })
        .await
    }

    async fn update_rating(&self, id: Uuid, rating: f64) -> Result<WriteOutcome, AppError> {
        self.with_list(|list| match list.iter_mut().find(|b| b.id == id) {
            Some(booking) => {
                booking.rating = Some(rating);
                WriteOutcome::Applied
            }
            None => WriteOutcome::NotFound,
        })
        .await
    }
}

async fn reload_bookings(path: &Path, snapshot_tx: &watch::Sender<Vec<Booking>>) {
    match read_bookings(path).await {
        Ok(mut list) => {
            sort_newest_first(&mut list);
            let _ = snapshot_tx.send(list);
        }
        Err(err) => warn!(error = %err, "booking re-read after notification failed"),
    }
}

/// Single-device fallback for worker locations: one JSON map keyed by worker
/// id under a fixed path. Per-worker watch senders mirror the file for
/// subscribers.
pub struct LocalLocationChannel {
    path: PathBuf,
    origin: Uuid,
    bus: LocalBus,
    mirror: Arc<DashMap<Uuid, Arc<watch::Sender<Option<WorkerLocationRecord>>>>>,
    write_lock: Mutex<()>,
}

impl LocalLocationChannel {
    pub async fn open(path: impl Into<PathBuf>, bus: LocalBus) -> Result<Self, AppError> {
        let path = path.into();
        ensure_parent_dir(&path).await?;

        let mirror = Arc::new(DashMap::new());
        match read_locations(&path).await {
            Ok(map) => apply_location_map(&mirror, map),
            Err(err) => warn!(error = %err, "starting with empty location map"),
        }

        let channel = Self {
            path,
            origin: Uuid::new_v4(),
            bus,
            mirror,
            write_lock: Mutex::new(()),
        };
        channel.spawn_listener();
        Ok(channel)
    }

    fn spawn_listener(&self) {
        let mut events = self.bus.subscribe();
        let path = self.path.clone();
        let origin = self.origin;
        let mirror = self.mirror.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.key == LOCATIONS_KEY && event.origin != origin => {
                        reload_locations(&path, &mirror).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        reload_locations(&path, &mirror).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn sender(&self, worker_id: Uuid) -> Arc<watch::Sender<Option<WorkerLocationRecord>>> {
        location_sender(&self.mirror, worker_id)
    }
}

#[async_trait]
impl LocationChannel for LocalLocationChannel {
    async fn publish(&self, worker_id: Uuid, update: LocationUpdate) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut map = read_locations(&self.path).await?;
        let merged = update.merge_into(worker_id, map.get(&worker_id), Utc::now());
        map.insert(worker_id, merged.clone());
        write_json(&self.path, &map).await?;

        let _ = self.sender(worker_id).send(Some(merged));
        self.bus.notify(LOCATIONS_KEY, self.origin);
        Ok(())
    }

    fn subscribe(&self, worker_id: Uuid) -> watch::Receiver<Option<WorkerLocationRecord>> {
        self.sender(worker_id).subscribe()
    }

    async fn snapshot(&self) -> Result<Vec<WorkerLocationRecord>, AppError> {
        let map = read_locations(&self.path).await?;
        Ok(map.into_values().collect())
    }
}

fn location_sender(
    mirror: &DashMap<Uuid, Arc<watch::Sender<Option<WorkerLocationRecord>>>>,
    worker_id: Uuid,
) -> Arc<watch::Sender<Option<WorkerLocationRecord>>> {
    mirror
        .entry(worker_id)
        .or_insert_with(|| {
            let (tx, _rx) = watch::channel(None);
            Arc::new(tx)
        })
        .clone()
}

fn apply_location_map(
    mirror: &DashMap<Uuid, Arc<watch::Sender<Option<WorkerLocationRecord>>>>,
    map: HashMap<Uuid, WorkerLocationRecord>,
) {
    for (worker_id, record) in map {
        let _ = location_sender(mirror, worker_id).send(Some(record));
    }
}

async fn reload_locations(
    path: &Path,
    mirror: &DashMap<Uuid, Arc<watch::Sender<Option<WorkerLocationRecord>>>>,
) {
    match read_locations(path).await {
        Ok(map) => apply_location_map(mirror, map),
        Err(err) => warn!(error = %err, "location re-read after notification failed"),
    }
}

async fn ensure_parent_dir(path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| AppError::Transport(format!("create {}: {err}", parent.display())))?;
        }
    }
    Ok(())
}

async fn read_bookings(path: &Path) -> Result<Vec<Booking>, AppError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
            AppError::Internal(format!("corrupt booking list at {}: {err}", path.display()))
        }),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(AppError::Transport(format!(
            "read {}: {err}",
            path.display()
        ))),
    }
}

async fn read_locations(path: &Path) -> Result<HashMap<Uuid, WorkerLocationRecord>, AppError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
            AppError::Internal(format!("corrupt location map at {}: {err}", path.display()))
        }),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
        Err(err) => Err(AppError::Transport(format!(
            "read {}: {err}",
            path.display()
        ))),
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|err| AppError::Internal(format!("serialize {}: {err}", path.display())))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|err| AppError::Transport(format!("write {}: {err}", path.display())))
}
