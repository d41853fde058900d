//! # Geographic Utilities
//!
//! Distance and interpolation primitives shared by every pipeline stage.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two track points |
//! | [`path_length`] | Total length of a path in meters |
//! | [`meters_to_degrees`] | Convert meters to an approximate degree span at a latitude |
//! | [`interpolate`] | Point at a fraction along the straight line between two points |
//!
//! ## Example
//!
//! ```rust
//! use trail_pipeline::{TrackPoint, geo_utils};
//!
//! let path = vec![
//!     TrackPoint::new(37.6586, 126.9780),
//!     TrackPoint::new(37.6596, 126.9780),
//!     TrackPoint::new(37.6606, 126.9790),
//! ];
//!
//! let length = geo_utils::path_length(&path);
//! let direct = geo_utils::haversine_distance(&path[0], &path[2]);
//! assert!(direct <= length);
//! ```
//!
//! ## Algorithm Notes
//!
//! The haversine formula treats the Earth as a sphere of radius 6,371,000 m.
//! Inputs are WGS84 latitude/longitude in degrees.

use crate::TrackPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two points using the Haversine formula.
///
/// Returns the distance in meters. Symmetric, and zero for identical points.
///
/// # Example
///
/// ```rust
/// use trail_pipeline::{TrackPoint, geo_utils};
///
/// let seoul = TrackPoint::new(37.5665, 126.9780);
/// let busan = TrackPoint::new(35.1796, 129.0756);
///
/// let distance = geo_utils::haversine_distance(&seoul, &busan);
/// assert!((distance - 325_000.0).abs() < 5_000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &TrackPoint, p2: &TrackPoint) -> f64 {
    // Absolute deltas keep the result bit-for-bit symmetric
    let d_lat = (p2.latitude - p1.latitude).abs().to_radians();
    let d_lon = (p2.longitude - p1.longitude).abs().to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + p1.latitude.to_radians().cos()
            * p2.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);

    // Clamp guards asin against rounding just above 1.0 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Calculate the total length of a path in meters.
///
/// Sums the haversine distance between consecutive points. Empty or single-point
/// paths return 0.0.
pub fn path_length(points: &[TrackPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert meters to approximate (latitude, longitude) degree spans at a latitude.
///
/// The longitude span grows with `1 / cos(latitude)`; the cosine is floored at
/// 0.1 so the span stays bounded near the poles. Intended for building search
/// envelopes, always followed by an exact distance check.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> (f64, f64) {
    let d_lat = meters / METERS_PER_DEGREE;
    let d_lng = meters / (METERS_PER_DEGREE * latitude.to_radians().cos().abs().max(0.1));
    (d_lat, d_lng)
}

/// Point at fraction `t` (0..=1) along the straight line from `a` to `b`.
///
/// Altitude is interpolated only when both ends carry one. Timestamps are
/// never invented.
pub fn interpolate(a: &TrackPoint, b: &TrackPoint, t: f64) -> TrackPoint {
    let altitude = match (a.altitude, b.altitude) {
        (Some(a_alt), Some(b_alt)) => Some(a_alt + t * (b_alt - a_alt)),
        _ => None,
    };

    TrackPoint {
        latitude: a.latitude + t * (b.latitude - a.latitude),
        longitude: a.longitude + t * (b.longitude - a.longitude),
        altitude,
        timestamp: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_same_point() {
        let p = TrackPoint::new(37.6586, 126.9780);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_symmetric() {
        let pairs = [
            (TrackPoint::new(37.6586, 126.9780), TrackPoint::new(37.6600, 126.9801)),
            (TrackPoint::new(-33.86, 151.21), TrackPoint::new(51.50, -0.12)),
            (TrackPoint::new(0.0, 179.9), TrackPoint::new(0.0, -179.9)),
        ];
        for (a, b) in pairs {
            assert_eq!(haversine_distance(&a, &b), haversine_distance(&b, &a));
        }
    }

    #[test]
    fn test_one_millidegree_latitude() {
        // 0.001 degrees of latitude is ~111.2m on a 6371km sphere
        let a = TrackPoint::new(37.0, 127.0);
        let b = TrackPoint::new(37.001, 127.0);
        assert!(approx_eq(haversine_distance(&a, &b), 111.19, 0.1));
    }

    #[test]
    fn test_path_length() {
        assert_eq!(path_length(&[]), 0.0);
        assert_eq!(path_length(&[TrackPoint::new(37.0, 127.0)]), 0.0);

        let path: Vec<TrackPoint> = (0..11)
            .map(|i| TrackPoint::new(37.0 + i as f64 * 0.001, 127.0))
            .collect();
        assert!(approx_eq(path_length(&path), 1111.9, 1.0));
    }

    #[test]
    fn test_meters_to_degrees() {
        let (d_lat, d_lng) = meters_to_degrees(111_320.0, 0.0);
        assert!(approx_eq(d_lat, 1.0, 1e-9));
        assert!(approx_eq(d_lng, 1.0, 1e-9));

        let (_, d_lng_north) = meters_to_degrees(1000.0, 60.0);
        assert!(d_lng_north > meters_to_degrees(1000.0, 0.0).1);
    }

    #[test]
    fn test_interpolate_altitude() {
        let a = TrackPoint::new(37.0, 127.0).with_altitude(100.0);
        let b = TrackPoint::new(37.01, 127.0).with_altitude(200.0);
        let mid = interpolate(&a, &b, 0.5);
        assert!(approx_eq(mid.latitude, 37.005, 1e-12));
        assert_eq!(mid.altitude, Some(150.0));

        let no_alt = interpolate(&a, &TrackPoint::new(37.01, 127.0), 0.5);
        assert_eq!(no_alt.altitude, None);
    }
}
