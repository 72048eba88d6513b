use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::error::AppError;
use crate::geo::{haversine_km, interpolate_line};
use crate::models::route::{
    PlaceCandidate, RouteFetch, RouteInfo, RoutePreference, RouteSignal, RouteSource,
};
use crate::models::worker::GeoPoint;

/// Two preferences whose distances differ by no more than this are reported
/// as effectively the same path.
pub const ROUTE_IDENTICAL_EPSILON_KM: f64 = 0.1;

const MIN_SEARCH_QUERY_CHARS: usize = 3;
const MAX_RECENT_SEARCHES: usize = 5;
const SEARCH_RESULT_LIMIT: u8 = 5;

#[derive(Debug, Clone)]
pub struct RoutingSettings {
    pub routing_base_url: String,
    pub geocode_base_url: String,
    pub geocode_region: Option<String>,
    pub fallback_route_points: usize,
    pub fallback_speed_kmh: f64,
}

impl From<&Config> for RoutingSettings {
    fn from(config: &Config) -> Self {
        Self {
            routing_base_url: config.routing_base_url.clone(),
            geocode_base_url: config.geocode_base_url.clone(),
            geocode_region: config.geocode_region.clone(),
            fallback_route_points: config.fallback_route_points,
            fallback_speed_kmh: config.fallback_speed_kmh,
        }
    }
}

/// Route and geocoding resolution against external services, with a
/// deterministic interpolated fallback and a per-session cache. Never fails
/// to the caller: the fallback is the reliability backstop, not an error
/// path.
pub struct RouteResolver {
    http: reqwest::Client,
    settings: RoutingSettings,
    cache: DashMap<RouteKey, (RouteInfo, RouteSource)>,
    next_seq: AtomicU64,
    latest_done: AtomicU64,
    outbound_requests: AtomicU64,
    recent: Mutex<Vec<PlaceCandidate>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RouteKey {
    start: (i64, i64),
    end: (i64, i64),
    preference: RoutePreference,
}

impl RouteKey {
    fn new(start: GeoPoint, end: GeoPoint, preference: RoutePreference) -> Self {
        Self {
            start: quantize(start),
            end: quantize(end),
            preference,
        }
    }
}

/// Micro-degree quantization so floating point coordinates can key the cache.
fn quantize(point: GeoPoint) -> (i64, i64) {
    (
        (point.lat * 1e6).round() as i64,
        (point.lng * 1e6).round() as i64,
    )
}

#[derive(Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
}

#[derive(Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

#[derive(Deserialize)]
struct NominatimPlace {
    display_name: String,
    lat: String,
    lon: String,
}

#[derive(Deserialize)]
struct NominatimReverse {
    display_name: Option<String>,
}

impl RouteResolver {
    pub fn new(settings: RoutingSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
            cache: DashMap::new(),
            next_seq: AtomicU64::new(0),
            latest_done: AtomicU64::new(0),
            outbound_requests: AtomicU64::new(0),
            recent: Mutex::new(Vec::new()),
        }
    }

    /// Resolves a route between two points. The external service is tried
    /// first; any failure degrades to the synthetic interpolated route.
    pub async fn fetch_route(
        &self,
        start: GeoPoint,
        end: GeoPoint,
        preference: RoutePreference,
    ) -> RouteFetch {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let key = RouteKey::new(start, end, preference);

        if let Some((cached, source)) = self.cache.get(&key).map(|entry| entry.clone()) {
            self.latest_done.fetch_max(seq, Ordering::AcqRel);
            return RouteFetch {
                signal: self.signal_for(start, end, preference, cached.distance_km),
                info: cached,
                source,
                preference,
                seq,
            };
        }

        let (info, source) = match self.query_service(start, end).await {
            Ok(info) => (info, RouteSource::Service),
            Err(err) => {
                warn!(error = %err, "route query failed, using interpolated fallback");
                (self.fallback_route(start, end), RouteSource::Fallback)
            }
        };

        // A slower fetch finishing after a newer one must not overwrite
        // fresher state.
        let stale = self.latest_done.fetch_max(seq, Ordering::AcqRel) > seq;
        if !stale {
            self.cache.insert(key, (info.clone(), source));
        }

        RouteFetch {
            signal: self.signal_for(start, end, preference, info.distance_km),
            info,
            source,
            preference,
            seq,
        }
    }

    /// Highest sequence number a completed fetch has carried so far.
    pub fn latest_seq(&self) -> u64 {
        self.latest_done.load(Ordering::Acquire)
    }

    /// Outbound HTTP requests issued this session.
    pub fn outbound_requests(&self) -> u64 {
        self.outbound_requests.load(Ordering::Relaxed)
    }

    fn signal_for(
        &self,
        start: GeoPoint,
        end: GeoPoint,
        preference: RoutePreference,
        distance_km: f64,
    ) -> RouteSignal {
        let other = RouteKey::new(start, end, preference.other());
        match self.cache.get(&other) {
            Some(entry)
                if (entry.0.distance_km - distance_km).abs() <= ROUTE_IDENTICAL_EPSILON_KM =>
            {
                RouteSignal::Identical
            }
            _ => RouteSignal::Showing(preference),
        }
    }

    async fn query_service(&self, start: GeoPoint, end: GeoPoint) -> Result<RouteInfo, AppError> {
        let url = format!(
            "{}/route/v1/driving/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=geojson",
            self.settings.routing_base_url, start.lng, start.lat, end.lng, end.lat
        );

        self.outbound_requests.fetch_add(1, Ordering::Relaxed);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| AppError::Transport(format!("routing request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Transport(format!(
                "routing service returned {}",
                response.status()
            )));
        }

        let body: OsrmResponse = response
            .json()
            .await
            .map_err(|err| AppError::Transport(format!("malformed routing response: {err}")))?;

        if body.code != "Ok" {
            return Err(AppError::Transport(format!(
                "routing service code {}",
                body.code
            )));
        }

        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Transport("no usable routes".to_string()))?;

        Ok(RouteInfo {
            distance_km: route.distance / 1000.0,
            duration_min: route.duration / 60.0,
            // GeoJSON is longitude-first.
            polyline: route
                .geometry
                .coordinates
                .into_iter()
                .map(|c| GeoPoint { lat: c[1], lng: c[0] })
                .collect(),
        })
    }

    /// Deterministic backstop: evenly interpolated straight line, great
    /// circle distance, fixed assumed speed.
    pub fn fallback_route(&self, start: GeoPoint, end: GeoPoint) -> RouteInfo {
        let polyline = interpolate_line(start, end, self.settings.fallback_route_points);
        let distance_km = haversine_km(&start, &end);
        let duration_min = distance_km / self.settings.fallback_speed_kmh * 60.0;

        RouteInfo {
            distance_km,
            duration_min,
            polyline,
        }
    }

    /// Free-text place search. Queries shorter than three characters return
    /// empty without touching the network; failures collapse to empty.
    pub async fn search_location(&self, query: &str, lang: &str) -> Vec<PlaceCandidate> {
        let trimmed = query.trim();
        if trimmed.chars().count() < MIN_SEARCH_QUERY_CHARS {
            return Vec::new();
        }

        let url = format!("{}/search", self.settings.geocode_base_url);
        let mut params = vec![
            ("q".to_string(), trimmed.to_string()),
            ("format".to_string(), "json".to_string()),
            ("addressdetails".to_string(), "1".to_string()),
            ("limit".to_string(), SEARCH_RESULT_LIMIT.to_string()),
            ("accept-language".to_string(), lang.to_string()),
        ];
        if let Some(region) = &self.settings.geocode_region {
            params.push(("countrycodes".to_string(), region.clone()));
        }

        self.outbound_requests.fetch_add(1, Ordering::Relaxed);
        let places: Vec<NominatimPlace> = match self.http.get(&url).query(&params).send().await {
            Ok(response) => match response.json().await {
                Ok(places) => places,
                Err(err) => {
                    warn!(error = %err, "malformed search response");
                    return Vec::new();
                }
            },
            Err(err) => {
                warn!(error = %err, "location search failed");
                return Vec::new();
            }
        };

        places
            .into_iter()
            .filter_map(|place| {
                Some(PlaceCandidate {
                    display_name: place.display_name,
                    lat: place.lat.parse().ok()?,
                    lon: place.lon.parse().ok()?,
                })
            })
            .collect()
    }

    /// Best-effort address lookup; every failure collapses to `None`.
    pub async fn reverse_geocode(&self, point: GeoPoint, lang: &str) -> Option<String> {
        let url = format!("{}/reverse", self.settings.geocode_base_url);
        let params = [
            ("format".to_string(), "json".to_string()),
            ("lat".to_string(), point.lat.to_string()),
            ("lon".to_string(), point.lng.to_string()),
            ("accept-language".to_string(), lang.to_string()),
        ];

        self.outbound_requests.fetch_add(1, Ordering::Relaxed);
        match self.http.get(&url).query(&params).send().await {
            Ok(response) => response
                .json::<NominatimReverse>()
                .await
                .ok()
                .and_then(|body| body.display_name),
            Err(err) => {
                warn!(error = %err, "reverse geocode failed");
                None
            }
        }
    }

    /// Remembers a selected search result; the last five distinct selections
    /// are kept, most recent first.
    pub fn remember_search(&self, candidate: PlaceCandidate) {
        let mut recent = self.recent.lock().expect("recent searches lock poisoned");
        recent.retain(|entry| entry.display_name != candidate.display_name);
        recent.insert(0, candidate);
        recent.truncate(MAX_RECENT_SEARCHES);
    }

    pub fn recent_searches(&self) -> Vec<PlaceCandidate> {
        self.recent
            .lock()
            .expect("recent searches lock poisoned")
            .clone()
    }

    /// Synthetic worker positions scattered around a center, for the
    /// requester's picking view. Deterministic for a given center.
    pub fn nearby_workers(&self, center: GeoPoint, count: usize) -> Vec<GeoPoint> {
        let mut seed = (quantize(center).0 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (quantize(center).1 as u64).rotate_left(21);

        (0..count)
            .map(|_| {
                seed = lcg(seed);
                let dlat = centered_unit(seed) * 0.02;
                seed = lcg(seed);
                let dlng = centered_unit(seed) * 0.02;
                GeoPoint {
                    lat: center.lat + dlat,
                    lng: center.lng + dlng,
                }
            })
            .collect()
    }
}

fn lcg(seed: u64) -> u64 {
    seed.wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407)
}

fn centered_unit(seed: u64) -> f64 {
    (seed >> 11) as f64 / (1u64 << 53) as f64 - 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_settings() -> RoutingSettings {
        RoutingSettings {
            routing_base_url: "http://127.0.0.1:9".to_string(),
            geocode_base_url: "http://127.0.0.1:9".to_string(),
            geocode_region: Some("ye".to_string()),
            fallback_route_points: 40,
            fallback_speed_kmh: 40.0,
        }
    }

    fn sanaa() -> GeoPoint {
        GeoPoint {
            lat: 15.3694,
            lng: 44.191,
        }
    }

    fn aden() -> GeoPoint {
        GeoPoint {
            lat: 12.7855,
            lng: 45.0187,
        }
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_interpolated_fallback() {
        let resolver = RouteResolver::new(unreachable_settings());
        let fetch = resolver
            .fetch_route(sanaa(), aden(), RoutePreference::Fastest)
            .await;

        assert_eq!(fetch.source, RouteSource::Fallback);
        assert_eq!(fetch.info.polyline.len(), 40);

        let expected_km = haversine_km(&sanaa(), &aden());
        assert!((fetch.info.distance_km - expected_km).abs() < 1e-9);
        assert!((fetch.info.duration_min - expected_km / 40.0 * 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn preference_toggle_reuses_cache_and_reports_identical() {
        let resolver = RouteResolver::new(unreachable_settings());

        let first = resolver
            .fetch_route(sanaa(), aden(), RoutePreference::Fastest)
            .await;
        assert_eq!(first.signal, RouteSignal::Showing(RoutePreference::Fastest));
        assert_eq!(resolver.outbound_requests(), 1);

        let repeat = resolver
            .fetch_route(sanaa(), aden(), RoutePreference::Fastest)
            .await;
        assert_eq!(resolver.outbound_requests(), 1, "cached result refetched");
        assert_eq!(repeat.source, RouteSource::Fallback);
        assert_eq!(repeat.info.distance_km, first.info.distance_km);

        let toggled = resolver
            .fetch_route(sanaa(), aden(), RoutePreference::Shortest)
            .await;
        assert_eq!(resolver.outbound_requests(), 2);
        assert_eq!(toggled.signal, RouteSignal::Identical);
    }

    #[tokio::test]
    async fn fetch_sequence_numbers_increase() {
        let resolver = RouteResolver::new(unreachable_settings());

        let first = resolver
            .fetch_route(sanaa(), aden(), RoutePreference::Fastest)
            .await;
        let second = resolver
            .fetch_route(aden(), sanaa(), RoutePreference::Fastest)
            .await;

        assert!(second.seq > first.seq);
        assert_eq!(resolver.latest_seq(), second.seq);
    }

    #[tokio::test]
    async fn short_queries_skip_the_network_entirely() {
        let resolver = RouteResolver::new(unreachable_settings());

        assert!(resolver.search_location("", "en").await.is_empty());
        assert!(resolver.search_location("ab", "en").await.is_empty());
        assert!(resolver.search_location("  ab  ", "en").await.is_empty());
        assert_eq!(resolver.outbound_requests(), 0);
    }

    #[tokio::test]
    async fn search_failures_collapse_to_empty() {
        let resolver = RouteResolver::new(unreachable_settings());
        assert!(resolver.search_location("airport", "en").await.is_empty());
        assert_eq!(resolver.outbound_requests(), 1);
    }

    #[tokio::test]
    async fn reverse_geocode_failures_collapse_to_none() {
        let resolver = RouteResolver::new(unreachable_settings());
        assert_eq!(resolver.reverse_geocode(sanaa(), "en").await, None);
    }

    #[test]
    fn recent_searches_dedupe_and_cap_at_five() {
        let resolver = RouteResolver::new(unreachable_settings());

        for i in 0..6 {
            resolver.remember_search(PlaceCandidate {
                display_name: format!("place {i}"),
                lat: i as f64,
                lon: i as f64,
            });
        }
        resolver.remember_search(PlaceCandidate {
            display_name: "place 3".to_string(),
            lat: 3.0,
            lon: 3.0,
        });

        let recent = resolver.recent_searches();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].display_name, "place 3");
        let names: Vec<_> = recent.iter().map(|r| r.display_name.clone()).collect();
        assert!(!names.contains(&"place 0".to_string()));
    }

    #[test]
    fn nearby_workers_stay_close_to_center() {
        let resolver = RouteResolver::new(unreachable_settings());
        let workers = resolver.nearby_workers(sanaa(), 4);

        assert_eq!(workers.len(), 4);
        for worker in &workers {
            assert!((worker.lat - sanaa().lat).abs() <= 0.011);
            assert!((worker.lng - sanaa().lng).abs() <= 0.011);
        }

        let again = resolver.nearby_workers(sanaa(), 4);
        assert_eq!(workers, again);
    }
}
