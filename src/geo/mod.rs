use crate::models::worker::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Evenly spaced points from `start` to `end`, endpoints included, linear in
/// coordinate space. Used for the synthetic fallback polyline.
pub fn interpolate_line(start: GeoPoint, end: GeoPoint, points: usize) -> Vec<GeoPoint> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let steps = (points - 1) as f64;
            let lat_step = (end.lat - start.lat) / steps;
            let lng_step = (end.lng - start.lng) / steps;

            (0..points)
                .map(|i| GeoPoint {
                    lat: start.lat + lat_step * i as f64,
                    lng: start.lng + lng_step * i as f64,
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{haversine_km, interpolate_line};
    use crate::models::worker::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn interpolation_spans_both_endpoints() {
        let start = GeoPoint { lat: 0.0, lng: 0.0 };
        let end = GeoPoint {
            lat: 1.0,
            lng: -2.0,
        };

        let line = interpolate_line(start, end, 40);
        assert_eq!(line.len(), 40);
        assert_eq!(line[0], start);
        assert!((line[39].lat - end.lat).abs() < 1e-12);
        assert!((line[39].lng - end.lng).abs() < 1e-12);
    }

    #[test]
    fn interpolation_points_are_evenly_spaced() {
        let start = GeoPoint { lat: 0.0, lng: 0.0 };
        let end = GeoPoint { lat: 3.0, lng: 6.0 };

        let line = interpolate_line(start, end, 4);
        assert_eq!(line.len(), 4);
        assert!((line[1].lat - 1.0).abs() < 1e-12);
        assert!((line[1].lng - 2.0).abs() < 1e-12);
        assert!((line[2].lat - 2.0).abs() < 1e-12);
    }
}
