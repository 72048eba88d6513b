use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Which persistence/notification strategy backs the stores. Chosen once at
/// startup; components never re-check this per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Centralized in-process real-time store.
    Memory,
    /// Single-device fallback: JSON files plus a change-notification bus.
    Local,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub store_backend: StoreBackend,
    pub data_dir: PathBuf,
    pub notify_buffer_size: usize,
    pub routing_base_url: String,
    pub geocode_base_url: String,
    pub geocode_region: Option<String>,
    pub fallback_route_points: usize,
    pub fallback_speed_kmh: f64,
    pub position_timeout_ms: u64,
    pub playback_tick_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("local") => StoreBackend::Local,
            Ok("memory") | Err(_) => StoreBackend::Memory,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid STORE_BACKEND: {other}"
                )))
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            store_backend,
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            notify_buffer_size: parse_or_default("NOTIFY_BUFFER_SIZE", 1024)?,
            routing_base_url: env::var("ROUTING_BASE_URL")
                .unwrap_or_else(|_| "https://routing.openstreetmap.de/routed-car".to_string()),
            geocode_base_url: env::var("GEOCODE_BASE_URL")
                .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string()),
            geocode_region: env::var("GEOCODE_REGION").ok(),
            fallback_route_points: parse_or_default("FALLBACK_ROUTE_POINTS", 40)?,
            fallback_speed_kmh: parse_or_default("FALLBACK_SPEED_KMH", 40.0)?,
            position_timeout_ms: parse_or_default("POSITION_TIMEOUT_MS", 10_000)?,
            playback_tick_ms: parse_or_default("PLAYBACK_TICK_MS", 1_000)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
