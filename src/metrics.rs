//! Trail metrics recomputed from geometry.

use serde::{Deserialize, Serialize};

use crate::config::SpeedTable;
use crate::geo_utils::path_length;
use crate::{Difficulty, TrackPoint};

/// Metrics in the units persisted for the web front end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailMetrics {
    /// Kilometers, 2 decimals
    pub distance_km: f64,
    /// Estimated minutes
    pub duration_min: u32,
    /// Altitude stats in whole meters; `None` when no point has altitude
    pub min_altitude: Option<i32>,
    pub max_altitude: Option<i32>,
    pub avg_altitude: Option<i32>,
    /// Sum of positive altitude deltas between consecutive points
    pub elevation_gain: Option<i32>,
}

/// Derive distance, altitude stats and estimated duration from a path.
///
/// Duration is a heuristic: `distance_km / speed(difficulty) * 60`.
pub fn compute_metrics(
    points: &[TrackPoint],
    difficulty: Difficulty,
    speeds: &SpeedTable,
) -> TrailMetrics {
    let distance_km = round2(path_length(points) / 1000.0);
    let duration_min = (distance_km / speeds.speed_kmh(difficulty) * 60.0).round() as u32;

    let altitudes: Vec<f64> = points.iter().filter_map(|p| p.altitude).collect();

    if altitudes.is_empty() {
        return TrailMetrics {
            distance_km,
            duration_min,
            min_altitude: None,
            max_altitude: None,
            avg_altitude: None,
            elevation_gain: None,
        };
    }

    let min = altitudes.iter().copied().fold(f64::INFINITY, f64::min);
    let max = altitudes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = altitudes.iter().sum::<f64>() / altitudes.len() as f64;
    let gain: f64 = altitudes
        .windows(2)
        .map(|w| (w[1] - w[0]).max(0.0))
        .sum();

    TrailMetrics {
        distance_km,
        duration_min,
        min_altitude: Some(min.round() as i32),
        max_altitude: Some(max.round() as i32),
        avg_altitude: Some(avg.round() as i32),
        elevation_gain: Some(gain.round() as i32),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
