//! Direction normalization.
//!
//! Circular trails are stored starting from their lowest point, which is
//! where hikers usually begin. The change is a ring rotation: no point is
//! reordered relative to its neighbours, and a closed path ends on its new
//! start.

use crate::geo_utils::haversine_distance;
use crate::TrackPoint;

/// A path rotated to start at its lowest point.
#[derive(Debug, Clone, PartialEq)]
pub struct Rotation {
    pub path: Vec<TrackPoint>,
    /// Index in the original ring that became the first point
    pub low_idx: usize,
    /// The input ended on its own first point. The closing point was
    /// dropped before rotating and the new first point appended again.
    pub closed: bool,
}

impl Rotation {
    /// Undo the rotation.
    ///
    /// For a closed path the closing point comes back as a copy of the
    /// restored first point.
    pub fn rotate_back(&self) -> Vec<TrackPoint> {
        let ring = if self.closed && !self.path.is_empty() {
            &self.path[..self.path.len() - 1]
        } else {
            &self.path[..]
        };
        if ring.is_empty() {
            return Vec::new();
        }

        let split = ring.len() - (self.low_idx % ring.len());
        let mut original = Vec::with_capacity(self.path.len());
        original.extend_from_slice(&ring[split..]);
        original.extend_from_slice(&ring[..split]);
        if self.closed {
            original.push(original[0]);
        }
        original
    }
}

/// Rotate `points` to start at the lowest-altitude point.
///
/// A path whose last point lies within `closure_m` of its first is a closed
/// ring: the duplicate closing point is left out of the rotation and the
/// result is closed again on its new first point, so the length is kept and
/// no zero-length join appears inside the path.
///
/// Returns `None` when no rotation is needed: the path is empty, no point
/// carries altitude, the first point is already below `low_altitude_m`, or
/// the first point is already the minimum.
///
/// # Example
/// ```
/// use trail_pipeline::{TrackPoint, normalize_direction};
///
/// let path: Vec<TrackPoint> = [550.0, 400.0, 120.0, 300.0]
///     .iter()
///     .enumerate()
///     .map(|(i, alt)| TrackPoint::new(37.0 + i as f64 * 0.001, 127.0).with_altitude(*alt))
///     .collect();
///
/// let rotation = normalize_direction(&path, 200.0, 10.0).unwrap();
/// assert_eq!(rotation.path[0].altitude, Some(120.0));
/// assert_eq!(rotation.rotate_back(), path);
/// ```
pub fn normalize_direction(
    points: &[TrackPoint],
    low_altitude_m: f64,
    closure_m: f64,
) -> Option<Rotation> {
    let first = points.first()?;
    if matches!(first.altitude, Some(alt) if alt < low_altitude_m) {
        return None;
    }

    let closed = points.len() >= 3
        && points
            .last()
            .is_some_and(|last| haversine_distance(first, last) < closure_m);
    let ring = if closed {
        &points[..points.len() - 1]
    } else {
        points
    };

    let low_idx = lowest_point_index(ring)?;
    if low_idx == 0 {
        return None;
    }

    let mut rotated = Vec::with_capacity(points.len());
    rotated.extend_from_slice(&ring[low_idx..]);
    rotated.extend_from_slice(&ring[..low_idx]);
    if closed {
        rotated.push(ring[low_idx]);
    }
    Some(Rotation {
        path: rotated,
        low_idx,
        closed,
    })
}

/// Index of the first occurrence of the minimum altitude.
fn lowest_point_index(points: &[TrackPoint]) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.altitude.map(|alt| (i, alt)))
        .fold(None, |best: Option<(usize, f64)>, (i, alt)| match best {
            Some((_, best_alt)) if best_alt <= alt => best,
            _ => Some((i, alt)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 80 points, starts at 550m, minimum 120m at index 40
    fn valley_loop() -> Vec<TrackPoint> {
        (0..80)
            .map(|i| {
                let alt = 120.0 + (i as f64 - 40.0).abs() * 10.75;
                TrackPoint::new(37.0 + i as f64 * 0.0001, 127.0).with_altitude(alt)
            })
            .collect()
    }

    #[test]
    fn test_rotates_to_minimum() {
        let path = valley_loop();
        assert_eq!(path[0].altitude, Some(550.0));

        let rotation = normalize_direction(&path, 200.0, 10.0).unwrap();
        assert_eq!(rotation.low_idx, 40);
        assert!(!rotation.closed);
        let normalized = &rotation.path;
        assert_eq!(normalized.len(), path.len());
        assert_eq!(normalized[0].altitude, Some(120.0));

        let mut rebuilt = normalized[40..].to_vec();
        rebuilt.extend_from_slice(&normalized[..40]);
        assert_eq!(rebuilt, path);
        assert_eq!(rotation.rotate_back(), path);
    }

    #[test]
    fn test_low_start_unchanged() {
        let mut path = valley_loop();
        path[0].altitude = Some(150.0);
        assert!(normalize_direction(&path, 200.0, 10.0).is_none());
    }

    #[test]
    fn test_already_at_minimum() {
        let path: Vec<TrackPoint> = (0..5)
            .map(|i| TrackPoint::new(37.0, 127.0 + i as f64 * 0.001).with_altitude(300.0 + i as f64))
            .collect();
        assert!(normalize_direction(&path, 200.0, 10.0).is_none());
    }

    #[test]
    fn test_no_altitude_unchanged() {
        let path: Vec<TrackPoint> = (0..5)
            .map(|i| TrackPoint::new(37.0, 127.0 + i as f64 * 0.001))
            .collect();
        assert!(normalize_direction(&path, 200.0, 10.0).is_none());
        assert!(normalize_direction(&[], 200.0, 10.0).is_none());
    }

    #[test]
    fn test_first_minimum_wins() {
        let alts = [400.0, 250.0, 300.0, 250.0];
        let path: Vec<TrackPoint> = alts
            .iter()
            .enumerate()
            .map(|(i, a)| TrackPoint::new(37.0 + i as f64 * 0.001, 127.0).with_altitude(*a))
            .collect();
        let rotation = normalize_direction(&path, 200.0, 10.0).unwrap();
        assert_eq!(rotation.low_idx, 1);
    }

    #[test]
    fn test_closed_path_stays_closed() {
        // Out and back: 0 1 2 3 2 1 0, lowest at index 1
        let alts = [310.0, 300.0, 310.0, 320.0];
        let out: Vec<TrackPoint> = alts
            .iter()
            .enumerate()
            .map(|(i, a)| TrackPoint::new(37.0 + i as f64 * 0.00045, 127.0).with_altitude(*a))
            .collect();
        let mut path = out.clone();
        path.extend(out[..3].iter().rev());

        let rotation = normalize_direction(&path, 200.0, 10.0).unwrap();
        assert!(rotation.closed);
        assert_eq!(rotation.low_idx, 1);
        assert_eq!(rotation.path.len(), path.len());
        assert_eq!(rotation.path.first(), rotation.path.last());
        assert_eq!(rotation.path[0].altitude, Some(300.0));
        // No point repeats back to back
        for w in rotation.path.windows(2) {
            assert_ne!(w[0], w[1]);
        }
        assert_eq!(rotation.rotate_back(), path);
    }
}
