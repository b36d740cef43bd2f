use serde::{Deserialize, Serialize};

/// DroneKit's metres-per-degree constant for small-offset planar distance.
const METRES_PER_DEGREE: f64 = 1.113195e5;

/// A global position with altitude relative to home.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl GeoPoint {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
        }
    }
}

/// Planar ground distance in metres between two points, using an
/// equirectangular approximation at the target latitude. Only valid for the
/// short offsets a guided goto covers; ignores altitude.
pub fn planar_distance_m(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let dlat = to.latitude_deg - from.latitude_deg;
    let dlon = (to.longitude_deg - from.longitude_deg) * to.latitude_deg.to_radians().cos();
    (dlat * dlat + dlon * dlon).sqrt() * METRES_PER_DEGREE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_identical_points() {
        let p = GeoPoint::new(47.397742, 8.545594, 10.0);
        assert_eq!(planar_distance_m(&p, &p), 0.0);
    }

    #[test]
    fn one_degree_of_latitude_at_equator() {
        let a = GeoPoint::new(0.0, 0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0, 0.0);
        let d = planar_distance_m(&a, &b);
        assert!((d - 111_319.5).abs() < 1.0, "got {d}");
    }

    #[test]
    fn longitude_shrinks_with_latitude() {
        let equator_a = GeoPoint::new(0.0, 8.0, 0.0);
        let equator_b = GeoPoint::new(0.0, 8.001, 0.0);
        let north_a = GeoPoint::new(60.0, 8.0, 0.0);
        let north_b = GeoPoint::new(60.0, 8.001, 0.0);

        let at_equator = planar_distance_m(&equator_a, &equator_b);
        let at_sixty = planar_distance_m(&north_a, &north_b);
        // cos(60 deg) = 0.5
        assert!((at_sixty / at_equator - 0.5).abs() < 0.01);
    }

    #[test]
    fn altitude_is_ignored() {
        let a = GeoPoint::new(47.0, 8.0, 0.0);
        let b = GeoPoint::new(47.0, 8.0, 50.0);
        assert_eq!(planar_distance_m(&a, &b), 0.0);
    }
}
