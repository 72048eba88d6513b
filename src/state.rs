use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::{Config, StoreBackend};
use crate::dashboard::DashboardAggregator;
use crate::error::AppError;
use crate::lifecycle::TripLifecycle;
use crate::models::worker::GeoPoint;
use crate::observability::metrics::Metrics;
use crate::presence::{
    Clock, PositionSource, PresenceSettings, SimulatedPositionSource, SystemClock, WorkerPresence,
};
use crate::routing::{RouteResolver, RoutingSettings};
use crate::store::local::{LocalBus, LocalLocationChannel, LocalTripStore};
use crate::store::memory::{MemoryLocationChannel, MemoryTripStore};
use crate::store::{LocationChannel, TripStore};

const BOOKINGS_FILE: &str = "bookings.json";
const LOCATIONS_FILE: &str = "worker_locations.json";

/// Interval between simulated continuous fixes in the demo binary.
const SIM_FIX_INTERVAL: Duration = Duration::from_secs(2);
const SIM_DRIFT_DEG: f64 = 0.0005;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn TripStore>,
    pub locations: Arc<dyn LocationChannel>,
    pub lifecycle: TripLifecycle,
    pub resolver: RouteResolver,
    pub dashboard: DashboardAggregator,
    pub metrics: Metrics,
    positions: Arc<dyn PositionSource>,
    clock: Arc<dyn Clock>,
    presences: DashMap<Uuid, Arc<WorkerPresence>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn TripStore>,
        locations: Arc<dyn LocationChannel>,
        positions: Arc<dyn PositionSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            lifecycle: TripLifecycle::new(store.clone()),
            resolver: RouteResolver::new(RoutingSettings::from(&config)),
            dashboard: DashboardAggregator::new(store.clone(), locations.clone()),
            metrics: Metrics::new(),
            store,
            locations,
            positions,
            clock,
            presences: DashMap::new(),
            config,
        }
    }

    /// Builds the state with the backend strategy the configuration names.
    /// The choice happens exactly once, here; nothing downstream re-checks
    /// it.
    pub async fn from_config(config: Config) -> Result<Self, AppError> {
        let (store, locations): (Arc<dyn TripStore>, Arc<dyn LocationChannel>) =
            match config.store_backend {
                StoreBackend::Memory => (
                    Arc::new(MemoryTripStore::new()),
                    Arc::new(MemoryLocationChannel::new()),
                ),
                StoreBackend::Local => {
                    let bus = LocalBus::new(config.notify_buffer_size);
                    let store =
                        LocalTripStore::open(config.data_dir.join(BOOKINGS_FILE), bus.clone())
                            .await?;
                    let locations =
                        LocalLocationChannel::open(config.data_dir.join(LOCATIONS_FILE), bus)
                            .await?;
                    (Arc::new(store), Arc::new(locations))
                }
            };

        // Sana'a city center, the demo's service area.
        let positions = Arc::new(SimulatedPositionSource::new(
            GeoPoint {
                lat: 15.3694,
                lng: 44.191,
            },
            SIM_DRIFT_DEG,
            SIM_FIX_INTERVAL,
        ));

        Ok(Self::new(
            config,
            store,
            locations,
            positions,
            Arc::new(SystemClock),
        ))
    }

    /// One presence session per worker id, created on first use.
    pub fn presence(&self, worker_id: Uuid) -> Arc<WorkerPresence> {
        self.presences
            .entry(worker_id)
            .or_insert_with(|| {
                Arc::new(WorkerPresence::new(
                    worker_id,
                    self.locations.clone(),
                    self.positions.clone(),
                    self.clock.clone(),
                    PresenceSettings {
                        position_timeout: Duration::from_millis(self.config.position_timeout_ms),
                        playback_tick: Duration::from_millis(self.config.playback_tick_ms),
                    },
                ))
            })
            .clone()
    }

    /// Restart recovery: workers whose last published record says online
    /// resume continuous publishing without an explicit go-online.
    pub async fn resume_presences(&self) -> Result<usize, AppError> {
        let mut resumed = 0;
        for record in self.locations.snapshot().await? {
            if record.is_online && self.presence(record.worker_id).resume().await? {
                resumed += 1;
            }
        }
        self.metrics.workers_online.set(resumed as i64);
        Ok(resumed)
    }
}
