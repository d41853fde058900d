//! Point stream cleaning.
//!
//! Drops invalid fixes and near-duplicate points so that no two consecutive
//! kept points are closer than the configured minimum separation.

use crate::geo_utils::haversine_distance;
use crate::TrackPoint;

/// Remove near-duplicate points in a single forward pass.
///
/// The first valid point is always kept. Each later point is kept only if it is
/// at least `min_separation_m` from the last *kept* point. Order and per-point
/// fields (altitude, timestamp) are preserved.
///
/// # Example
/// ```
/// use trail_pipeline::{TrackPoint, clean_points};
///
/// let raw = vec![
///     TrackPoint::new(37.0000, 127.0),
///     TrackPoint::new(37.00001, 127.0), // ~1m, dropped
///     TrackPoint::new(37.0010, 127.0),
/// ];
/// assert_eq!(clean_points(&raw, 10.0).len(), 2);
/// ```
pub fn clean_points(points: &[TrackPoint], min_separation_m: f64) -> Vec<TrackPoint> {
    let mut kept: Vec<TrackPoint> = Vec::with_capacity(points.len());

    for p in points.iter().filter(|p| p.is_valid()) {
        match kept.last() {
            None => kept.push(*p),
            Some(last) if haversine_distance(last, p) >= min_separation_m => kept.push(*p),
            Some(_) => {}
        }
    }

    if kept.len() < points.len() {
        log::debug!(
            "[Cleaner] Kept {}/{} points (min separation {:.0}m)",
            kept.len(),
            points.len(),
            min_separation_m
        );
    }

    kept
}
