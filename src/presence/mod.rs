use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::booking::BookingStatus;
use crate::models::worker::{GeoPoint, LocationUpdate, PresenceStatus};
use crate::store::LocationChannel;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("position access denied")]
    Denied,
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("position acquisition timed out")]
    TimedOut,
}

impl From<PositionError> for AppError {
    fn from(err: PositionError) -> Self {
        match err {
            PositionError::Denied => AppError::PermissionDenied,
            other => AppError::Transport(other.to_string()),
        }
    }
}

/// Device position capability, injected so presence sessions carry no
/// platform dependency of their own.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// One-shot fix bounded by the caller's timeout.
    async fn current_position(&self, timeout: Duration) -> Result<GeoPoint, PositionError>;

    /// Continuous fixes; the stream ends when the receiver is dropped.
    async fn watch_positions(
        &self,
        high_accuracy: bool,
    ) -> Result<mpsc::Receiver<GeoPoint>, PositionError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct PresenceSettings {
    pub position_timeout: Duration,
    pub playback_tick: Duration,
}

struct PresenceShared {
    is_online: bool,
    trip_status: Option<BookingStatus>,
    last_fix: Option<GeoPoint>,
    playback_active: bool,
    watch_task: Option<JoinHandle<()>>,
    playback_task: Option<JoinHandle<()>>,
}

impl PresenceShared {
    fn status(&self) -> PresenceStatus {
        if !self.is_online {
            PresenceStatus::Offline
        } else {
            match self.trip_status {
                Some(status) => PresenceStatus::Trip(status),
                None => PresenceStatus::Idle,
            }
        }
    }
}

/// One worker's presence session: online/offline state and continuous
/// position publishing into the location channel. Constructed explicitly
/// with its dependencies; nothing happens until `go_online` or `resume`.
pub struct WorkerPresence {
    worker_id: Uuid,
    channel: Arc<dyn LocationChannel>,
    positions: Arc<dyn PositionSource>,
    clock: Arc<dyn Clock>,
    settings: PresenceSettings,
    shared: Arc<Mutex<PresenceShared>>,
}

impl WorkerPresence {
    pub fn new(
        worker_id: Uuid,
        channel: Arc<dyn LocationChannel>,
        positions: Arc<dyn PositionSource>,
        clock: Arc<dyn Clock>,
        settings: PresenceSettings,
    ) -> Self {
        Self {
            worker_id,
            channel,
            positions,
            clock,
            settings,
            shared: Arc::new(Mutex::new(PresenceShared {
                is_online: false,
                trip_status: None,
                last_fix: None,
                playback_active: false,
                watch_task: None,
                playback_task: None,
            })),
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    pub fn is_online(&self) -> bool {
        self.shared.lock().expect("presence lock poisoned").is_online
    }

    /// Acquires one immediate fix, publishes it, then keeps publishing every
    /// subsequent fix while online. A denied position capability is surfaced
    /// and leaves the offline state untouched.
    pub async fn go_online(&self) -> Result<(), AppError> {
        if self.is_online() {
            return Ok(());
        }

        let fix = self
            .positions
            .current_position(self.settings.position_timeout)
            .await?;

        let status = {
            let mut shared = self.shared.lock().expect("presence lock poisoned");
            shared.is_online = true;
            shared.last_fix = Some(fix);
            shared.status()
        };

        self.publish(Some(fix), true, status).await?;
        self.spawn_watch_task().await;
        Ok(())
    }

    /// Stops acquisition and broadcasts the offline record. The last known
    /// position is retained through merge semantics.
    pub async fn go_offline(&self) -> Result<(), AppError> {
        let (watch_task, playback_task) = {
            let mut shared = self.shared.lock().expect("presence lock poisoned");
            if !shared.is_online {
                return Ok(());
            }
            shared.is_online = false;
            shared.playback_active = false;
            (shared.watch_task.take(), shared.playback_task.take())
        };

        if let Some(task) = watch_task {
            task.abort();
        }
        if let Some(task) = playback_task {
            task.abort();
        }

        self.publish(None, false, PresenceStatus::Offline).await
    }

    /// Pushes the new activity status out immediately, with a fresh fix when
    /// one can be acquired and the last known position otherwise.
    pub async fn set_active_trip_status(
        &self,
        status: Option<BookingStatus>,
    ) -> Result<(), AppError> {
        {
            let mut shared = self.shared.lock().expect("presence lock poisoned");
            shared.trip_status = status;
        }

        let fix = match self
            .positions
            .current_position(self.settings.position_timeout)
            .await
        {
            Ok(fix) => {
                let mut shared = self.shared.lock().expect("presence lock poisoned");
                shared.last_fix = Some(fix);
                Some(fix)
            }
            Err(err) => {
                warn!(error = %err, "status update falling back to last known position");
                self.shared
                    .lock()
                    .expect("presence lock poisoned")
                    .last_fix
            }
        };

        let (is_online, broadcast_status) = {
            let shared = self.shared.lock().expect("presence lock poisoned");
            (shared.is_online, shared.status())
        };

        self.publish(fix, is_online, broadcast_status).await
    }

    /// Restart recovery: if the last published record says online, restore
    /// that state and restart acquisition without an explicit `go_online`.
    pub async fn resume(&self) -> Result<bool, AppError> {
        let record = self.channel.subscribe(self.worker_id).borrow().clone();
        let Some(record) = record else {
            return Ok(false);
        };
        if !record.is_online {
            return Ok(false);
        }

        {
            let mut shared = self.shared.lock().expect("presence lock poisoned");
            if shared.is_online {
                return Ok(true);
            }
            shared.is_online = true;
            shared.trip_status = match record.status {
                PresenceStatus::Trip(status) => Some(status),
                _ => None,
            };
            shared.last_fix = Some(GeoPoint {
                lat: record.lat,
                lng: record.lng,
            });
        }

        self.spawn_watch_task().await;
        Ok(true)
    }

    /// Drives the published position along a polyline, one point per tick,
    /// holding the final point. Watch fixes are suppressed while playback is
    /// active.
    pub fn start_playback(&self, route: Vec<GeoPoint>) {
        if route.is_empty() {
            return;
        }

        {
            let mut shared = self.shared.lock().expect("presence lock poisoned");
            if let Some(task) = shared.playback_task.take() {
                task.abort();
            }
            shared.playback_active = true;
        }

        let shared = self.shared.clone();
        let channel = self.channel.clone();
        let clock = self.clock.clone();
        let worker_id = self.worker_id;
        let tick = self.settings.playback_tick;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            let mut index = 0usize;

            loop {
                interval.tick().await;

                let point = route[index];
                let (active, is_online, status) = {
                    let mut guard = shared.lock().expect("presence lock poisoned");
                    if guard.playback_active {
                        guard.last_fix = Some(point);
                    }
                    (guard.playback_active, guard.is_online, guard.status())
                };
                if !active {
                    break;
                }

                let update = LocationUpdate::position(point)
                    .with_online(is_online)
                    .with_status(status)
                    .with_timestamp(clock.now());
                if let Err(err) = channel.publish(worker_id, update).await {
                    warn!(error = %err, "playback publish failed");
                }

                if index + 1 < route.len() {
                    index += 1;
                }
            }
        });

        self.shared
            .lock()
            .expect("presence lock poisoned")
            .playback_task = Some(handle);
    }

    pub fn stop_playback(&self) {
        let task = {
            let mut shared = self.shared.lock().expect("presence lock poisoned");
            shared.playback_active = false;
            shared.playback_task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
    }

    async fn spawn_watch_task(&self) {
        let mut fixes = match self.positions.watch_positions(true).await {
            Ok(fixes) => fixes,
            Err(err) => {
                warn!(error = %err, "continuous position watch unavailable");
                return;
            }
        };

        let shared = self.shared.clone();
        let channel = self.channel.clone();
        let clock = self.clock.clone();
        let worker_id = self.worker_id;

        let handle = tokio::spawn(async move {
            while let Some(fix) = fixes.recv().await {
                let (is_online, playback_active, status) = {
                    let mut guard = shared.lock().expect("presence lock poisoned");
                    if guard.is_online {
                        guard.last_fix = Some(fix);
                    }
                    (guard.is_online, guard.playback_active, guard.status())
                };

                if !is_online {
                    break;
                }
                if playback_active {
                    continue;
                }

                let update = LocationUpdate::position(fix)
                    .with_online(true)
                    .with_status(status)
                    .with_timestamp(clock.now());
                if let Err(err) = channel.publish(worker_id, update).await {
                    warn!(error = %err, "position publish failed");
                }
            }
        });

        self.shared
            .lock()
            .expect("presence lock poisoned")
            .watch_task = Some(handle);
    }

    async fn publish(
        &self,
        position: Option<GeoPoint>,
        is_online: bool,
        status: PresenceStatus,
    ) -> Result<(), AppError> {
        let mut update = LocationUpdate::default()
            .with_online(is_online)
            .with_status(status)
            .with_timestamp(self.clock.now());
        update.position = position;
        self.channel.publish(self.worker_id, update).await
    }
}

impl Drop for WorkerPresence {
    fn drop(&mut self) {
        let mut shared = match self.shared.lock() {
            Ok(shared) => shared,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = shared.watch_task.take() {
            task.abort();
        }
        if let Some(task) = shared.playback_task.take() {
            task.abort();
        }
    }
}

/// Deterministic position source for the demo binary and tests: fixes drift
/// from a seed point by a fixed step.
pub struct SimulatedPositionSource {
    origin: GeoPoint,
    drift: f64,
    fix_interval: Duration,
    counter: Arc<AtomicU64>,
}

impl SimulatedPositionSource {
    pub fn new(origin: GeoPoint, drift: f64, fix_interval: Duration) -> Self {
        Self {
            origin,
            drift,
            fix_interval,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    fn fix(origin: GeoPoint, drift: f64, n: u64) -> GeoPoint {
        GeoPoint {
            lat: origin.lat + drift * n as f64,
            lng: origin.lng + drift * n as f64,
        }
    }
}

#[async_trait]
impl PositionSource for SimulatedPositionSource {
    async fn current_position(&self, _timeout: Duration) -> Result<GeoPoint, PositionError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(Self::fix(self.origin, self.drift, n))
    }

    async fn watch_positions(
        &self,
        _high_accuracy: bool,
    ) -> Result<mpsc::Receiver<GeoPoint>, PositionError> {
        let (tx, rx) = mpsc::channel(16);
        let origin = self.origin;
        let drift = self.drift;
        let interval = self.fix_interval;
        let counter = self.counter.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let n = counter.fetch_add(1, Ordering::Relaxed);
                if tx.send(Self::fix(origin, drift, n)).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::store::memory::MemoryLocationChannel;

    struct DeniedPositionSource;

    #[async_trait]
    impl PositionSource for DeniedPositionSource {
        async fn current_position(&self, _timeout: Duration) -> Result<GeoPoint, PositionError> {
            Err(PositionError::Denied)
        }

        async fn watch_positions(
            &self,
            _high_accuracy: bool,
        ) -> Result<mpsc::Receiver<GeoPoint>, PositionError> {
            Err(PositionError::Denied)
        }
    }

    fn settings() -> PresenceSettings {
        PresenceSettings {
            position_timeout: Duration::from_millis(100),
            playback_tick: Duration::from_millis(10),
        }
    }

    fn origin() -> GeoPoint {
        GeoPoint {
            lat: 15.3694,
            lng: 44.191,
        }
    }

    fn presence(
        channel: Arc<MemoryLocationChannel>,
        worker_id: Uuid,
    ) -> WorkerPresence {
        WorkerPresence::new(
            worker_id,
            channel,
            Arc::new(SimulatedPositionSource::new(
                origin(),
                0.0001,
                Duration::from_millis(5),
            )),
            Arc::new(SystemClock),
            settings(),
        )
    }

    #[tokio::test]
    async fn go_online_publishes_an_immediate_idle_record() {
        let channel = Arc::new(MemoryLocationChannel::new());
        let worker = Uuid::new_v4();
        let session = presence(channel.clone(), worker);

        session.go_online().await.unwrap();

        let record = channel.subscribe(worker).borrow().clone().unwrap();
        assert!(record.is_online);
        assert_eq!(record.status, PresenceStatus::Idle);
        assert!((record.lat - origin().lat).abs() < 0.01);
    }

    #[tokio::test]
    async fn continuous_fixes_keep_arriving_while_online() {
        let channel = Arc::new(MemoryLocationChannel::new());
        let worker = Uuid::new_v4();
        let session = presence(channel.clone(), worker);

        session.go_online().await.unwrap();

        let mut rx = channel.subscribe(worker);
        timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("no continuous fix arrived")
            .unwrap();
        let record = rx.borrow().clone().unwrap();
        assert!(record.is_online);

        session.go_offline().await.unwrap();
    }

    #[tokio::test]
    async fn go_offline_broadcasts_offline_and_keeps_position() {
        let channel = Arc::new(MemoryLocationChannel::new());
        let worker = Uuid::new_v4();
        let session = presence(channel.clone(), worker);

        session.go_online().await.unwrap();
        session.go_offline().await.unwrap();

        let record = channel.subscribe(worker).borrow().clone().unwrap();
        assert!(!record.is_online);
        assert_eq!(record.status, PresenceStatus::Offline);
        assert!(record.lat != 0.0, "last position should be retained");
        assert!(!session.is_online());
    }

    #[tokio::test]
    async fn denied_position_capability_leaves_state_offline() {
        let channel = Arc::new(MemoryLocationChannel::new());
        let worker = Uuid::new_v4();
        let session = WorkerPresence::new(
            worker,
            channel.clone(),
            Arc::new(DeniedPositionSource),
            Arc::new(SystemClock),
            settings(),
        );

        let err = session.go_online().await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
        assert!(!session.is_online());
        assert!(channel.subscribe(worker).borrow().is_none());
    }

    #[tokio::test]
    async fn trip_status_updates_broadcast_immediately() {
        let channel = Arc::new(MemoryLocationChannel::new());
        let worker = Uuid::new_v4();
        let session = presence(channel.clone(), worker);

        session.go_online().await.unwrap();
        session
            .set_active_trip_status(Some(BookingStatus::InProgress))
            .await
            .unwrap();

        let record = channel.subscribe(worker).borrow().clone().unwrap();
        assert_eq!(
            record.status,
            PresenceStatus::Trip(BookingStatus::InProgress)
        );

        session.set_active_trip_status(None).await.unwrap();
        let record = channel.subscribe(worker).borrow().clone().unwrap();
        assert_eq!(record.status, PresenceStatus::Idle);
    }

    #[tokio::test]
    async fn resume_restores_an_online_session() {
        let channel = Arc::new(MemoryLocationChannel::new());
        let worker = Uuid::new_v4();

        let first = presence(channel.clone(), worker);
        first.go_online().await.unwrap();
        first
            .set_active_trip_status(Some(BookingStatus::Accepted))
            .await
            .unwrap();
        // Simulated restart: the session object goes away, the channel keeps
        // the record.
        drop(first);

        let second = presence(channel.clone(), worker);
        assert!(second.resume().await.unwrap());
        assert!(second.is_online());

        let mut rx = channel.subscribe(worker);
        timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("resumed session stopped publishing")
            .unwrap();
        let record = rx.borrow().clone().unwrap();
        assert_eq!(record.status, PresenceStatus::Trip(BookingStatus::Accepted));
    }

    #[tokio::test]
    async fn resume_is_a_no_op_for_offline_records() {
        let channel = Arc::new(MemoryLocationChannel::new());
        let worker = Uuid::new_v4();

        let session = presence(channel.clone(), worker);
        assert!(!session.resume().await.unwrap());

        let online = presence(channel.clone(), worker);
        online.go_online().await.unwrap();
        online.go_offline().await.unwrap();
        drop(online);

        let second = presence(channel.clone(), worker);
        assert!(!second.resume().await.unwrap());
        assert!(!second.is_online());
    }

    #[tokio::test]
    async fn playback_walks_the_polyline_and_holds_the_end() {
        let channel = Arc::new(MemoryLocationChannel::new());
        let worker = Uuid::new_v4();
        let session = presence(channel.clone(), worker);
        session.go_online().await.unwrap();

        let route = vec![
            GeoPoint { lat: 1.0, lng: 1.0 },
            GeoPoint { lat: 2.0, lng: 2.0 },
            GeoPoint { lat: 3.0, lng: 3.0 },
        ];
        session.start_playback(route.clone());

        let mut rx = channel.subscribe(worker);
        let mut seen = Vec::new();
        for _ in 0..8 {
            timeout(Duration::from_secs(2), rx.changed())
                .await
                .expect("playback stalled")
                .unwrap();
            let record = rx.borrow().clone().unwrap();
            seen.push(record.lat);
            if seen.iter().filter(|lat| **lat == 3.0).count() >= 2 {
                break;
            }
        }
        session.stop_playback();

        // A watch channel may skip intermediate values, but whatever arrives
        // must walk the polyline in order and settle on the final point.
        let walked: Vec<f64> = seen
            .iter()
            .copied()
            .filter(|lat| route.iter().any(|p| p.lat == *lat))
            .collect();
        assert!(!walked.is_empty(), "no polyline point ever published");
        assert!(
            walked.windows(2).all(|pair| pair[0] <= pair[1]),
            "polyline points published out of order: {walked:?}"
        );
        assert!(
            walked.iter().filter(|lat| **lat == 3.0).count() >= 2,
            "final point should be held"
        );
    }
}
