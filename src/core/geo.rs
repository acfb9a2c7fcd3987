//! Geographic Coordinates
//!
//! Coordinates are carried as signed micro-degrees, the same integer form the
//! ledger stores. Floating point only appears inside distance computation, so
//! stored state stays exactly reproducible across replays.

use serde::{Serialize, Deserialize};

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Micro-degrees per degree.
pub const MICRO_DEGREES: f64 = 1_000_000.0;

/// A WGS84 coordinate in micro-degrees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in micro-degrees (-90e6 ..= 90e6).
    pub lat_e6: i32,
    /// Longitude in micro-degrees (-180e6 ..= 180e6).
    pub lon_e6: i32,
}

impl GeoPoint {
    /// Create from raw micro-degrees.
    pub const fn new(lat_e6: i32, lon_e6: i32) -> Self {
        Self { lat_e6, lon_e6 }
    }

    /// Create from floating degrees, rejecting out-of-range or non-finite values.
    pub fn from_degrees(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self {
            lat_e6: (lat * MICRO_DEGREES).round() as i32,
            lon_e6: (lon * MICRO_DEGREES).round() as i32,
        })
    }

    /// Latitude in degrees.
    #[inline]
    pub fn lat(&self) -> f64 {
        self.lat_e6 as f64 / MICRO_DEGREES
    }

    /// Longitude in degrees.
    #[inline]
    pub fn lon(&self) -> f64 {
        self.lon_e6 as f64 / MICRO_DEGREES
    }

    /// Great-circle distance to another point, in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        haversine_m(*self, *other)
    }
}

/// Haversine great-circle distance between two points, in meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();
    let dlat = (b.lat() - a.lat()).to_radians();
    let dlon = (b.lon() - a.lon()).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards acos/asin domain against rounding just above 1.0
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Signed distance from a point to the edge of a circle.
///
/// Positive means inside by that many meters, negative means outside.
pub fn distance_to_edge_m(center: GeoPoint, radius_m: u32, point: GeoPoint) -> f64 {
    radius_m as f64 - haversine_m(center, point)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Meters per micro-degree of latitude on the haversine sphere.
    const M_PER_UDEG_LAT: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0 / MICRO_DEGREES;

    #[test]
    fn test_zero_distance() {
        let p = GeoPoint::new(40_712_776, -74_005_974);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn test_latitude_offset_distance() {
        let center = GeoPoint::new(40_000_000, -74_000_000);
        let north = GeoPoint::new(40_000_000 + 1_000, -74_000_000);
        let expected = 1_000.0 * M_PER_UDEG_LAT;
        assert!((haversine_m(center, north) - expected).abs() < 0.01);
    }

    #[test]
    fn test_known_city_distance() {
        // Paris -> London is roughly 343.5 km
        let paris = GeoPoint::from_degrees(48.8566, 2.3522).unwrap();
        let london = GeoPoint::from_degrees(51.5074, -0.1278).unwrap();
        let d = paris.distance_to(&london);
        assert!((d - 343_500.0).abs() < 1_500.0, "got {d}");
    }

    #[test]
    fn test_symmetry() {
        let a = GeoPoint::new(10_000_000, 20_000_000);
        let b = GeoPoint::new(10_050_000, 20_030_000);
        assert!((haversine_m(a, b) - haversine_m(b, a)).abs() < 1e-9);
    }

    #[test]
    fn test_distance_to_edge_sign() {
        let center = GeoPoint::new(0, 0);
        let inside = GeoPoint::new(500, 0); // ~55 m
        let outside = GeoPoint::new(5_000, 0); // ~556 m
        assert!(distance_to_edge_m(center, 100, inside) > 0.0);
        assert!(distance_to_edge_m(center, 100, outside) < 0.0);
    }

    #[test]
    fn test_from_degrees_rejects_invalid() {
        assert!(GeoPoint::from_degrees(91.0, 0.0).is_none());
        assert!(GeoPoint::from_degrees(0.0, -180.5).is_none());
        assert!(GeoPoint::from_degrees(f64::NAN, 0.0).is_none());
        assert_eq!(
            GeoPoint::from_degrees(1.5, -2.25),
            Some(GeoPoint::new(1_500_000, -2_250_000))
        );
    }
}
