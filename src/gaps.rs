//! Gap detection and repair.
//!
//! A gap is a pair of consecutive points further apart than the minor
//! threshold, usually a recording dropout. Repair prefers a round-trip splice
//! (the hiker walked back over ground already recorded) and falls back to
//! straight-line interpolation.
//!
//! Repair exit criterion: `detect_gaps` over the repaired path is empty.

use serde::{Deserialize, Serialize};

use crate::config::GapThresholds;
use crate::geo_utils::{haversine_distance, interpolate};
use crate::TrackPoint;

// ============================================================================
// Detection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapSeverity {
    Minor,
    Major,
    Critical,
}

impl GapSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapSeverity::Minor => "minor",
            GapSeverity::Major => "major",
            GapSeverity::Critical => "critical",
        }
    }
}

/// A detected gap between `points[at_index]` and `points[at_index + 1]`.
///
/// Never persisted; recomputed on every analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub at_index: usize,
    pub distance_m: f64,
    pub severity: GapSeverity,
}

/// Find all consecutive pairs further apart than `thresholds.minor`.
///
/// # Example
/// ```
/// use trail_pipeline::{TrackPoint, GapSeverity, GapThresholds, detect_gaps};
///
/// // ~130m apart
/// let path = vec![TrackPoint::new(37.0, 127.0), TrackPoint::new(37.00117, 127.0)];
/// let gaps = detect_gaps(&path, &GapThresholds::default());
/// assert_eq!(gaps.len(), 1);
/// assert_eq!(gaps[0].severity, GapSeverity::Minor);
/// ```
pub fn detect_gaps(points: &[TrackPoint], thresholds: &GapThresholds) -> Vec<Gap> {
    points
        .windows(2)
        .enumerate()
        .filter_map(|(i, w)| {
            let distance_m = haversine_distance(&w[0], &w[1]);
            if distance_m <= thresholds.minor {
                return None;
            }
            let severity = if distance_m > thresholds.critical {
                GapSeverity::Critical
            } else if distance_m > thresholds.major {
                GapSeverity::Major
            } else {
                GapSeverity::Minor
            };
            Some(Gap {
                at_index: i,
                distance_m,
                severity,
            })
        })
        .collect()
}

/// Per-severity gap counts for one path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GapSummary {
    pub total: u32,
    pub minor: u32,
    pub major: u32,
    pub critical: u32,
    pub max_distance_m: f64,
}

impl GapSummary {
    pub fn from_gaps(gaps: &[Gap]) -> Self {
        let mut summary = GapSummary::default();
        for gap in gaps {
            summary.total += 1;
            match gap.severity {
                GapSeverity::Minor => summary.minor += 1,
                GapSeverity::Major => summary.major += 1,
                GapSeverity::Critical => summary.critical += 1,
            }
            summary.max_distance_m = summary.max_distance_m.max(gap.distance_m);
        }
        summary
    }
}

// ============================================================================
// Repair
// ============================================================================

/// How gaps are bridged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairStrategy {
    /// Round-trip splice when a backtrack target exists, otherwise interpolate
    #[serde(alias = "round_trip")]
    RoundTrip,
    /// Always interpolate
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepairOptions {
    pub strategy: RepairStrategy,
    /// Maximum distance from the backtrack target to the far side of the gap
    pub splice_tolerance_m: f64,
    /// Maximum spacing between interpolated points
    pub interpolation_step_m: f64,
    /// Pairs further apart than this are repaired (the minor gap threshold)
    pub join_tolerance_m: f64,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            strategy: RepairStrategy::RoundTrip,
            splice_tolerance_m: 100.0,
            interpolation_step_m: 50.0,
            join_tolerance_m: 100.0,
        }
    }
}

/// What the repairer did to one path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub gaps_repaired: u32,
    pub splices: u32,
    pub interpolations: u32,
    pub points_inserted: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairedPath {
    pub path: Vec<TrackPoint>,
    pub report: RepairReport,
}

/// Bridge every gap in `points`, returning a new path.
///
/// Gaps are handled in increasing index order against the path built so far,
/// so earlier repairs are visible to later backtrack searches. Spliced copies
/// drop their timestamps.
pub fn repair_gaps(points: &[TrackPoint], options: &RepairOptions) -> RepairedPath {
    let mut report = RepairReport::default();
    let mut out: Vec<TrackPoint> = Vec::with_capacity(points.len());

    for (i, point) in points.iter().enumerate() {
        out.push(*point);

        let Some(far) = points.get(i + 1) else {
            break;
        };
        let distance = haversine_distance(point, far);
        if distance <= options.join_tolerance_m {
            continue;
        }

        report.gaps_repaired += 1;

        let splice = if options.strategy == RepairStrategy::RoundTrip {
            if i == 0 {
                tail_splice(points, options)
            } else {
                backtrack_splice(&out, far, options)
            }
        } else {
            None
        };

        match splice {
            Some(segment) => {
                log::debug!(
                    "[GapRepair] Gap at {} ({:.0}m): round-trip splice of {} points",
                    i,
                    distance,
                    segment.len()
                );
                report.splices += 1;
                report.points_inserted += segment.len() as u32;
                out.extend(segment);
            }
            None => {
                let segment = interpolate_segment(point, far, options.interpolation_step_m);
                log::debug!(
                    "[GapRepair] Gap at {} ({:.0}m): interpolated {} points",
                    i,
                    distance,
                    segment.len()
                );
                report.interpolations += 1;
                report.points_inserted += segment.len() as u32;
                out.extend(segment);
            }
        }
    }

    RepairedPath { path: out, report }
}

/// Reversed walk from the end of `built` back to the point nearest `far`.
///
/// `built` ends with the near side of the gap. The returned segment excludes
/// that point and ends at the backtrack target.
fn backtrack_splice(
    built: &[TrackPoint],
    far: &TrackPoint,
    options: &RepairOptions,
) -> Option<Vec<TrackPoint>> {
    let last = built.len().checked_sub(1)?;
    let (target, distance) = nearest_in(built, (0..=last).rev(), far)?;

    if target == last || distance > options.splice_tolerance_m {
        return None;
    }

    Some(
        built[target..last]
            .iter()
            .rev()
            .map(strip_timestamp)
            .collect(),
    )
}

/// Splice for a gap right after the first point of a looped recording.
///
/// Walks the tail of the recording backwards from its last point to the point
/// nearest `points[1]`. Only used when the tail end closes the loop and the
/// walked tail is itself gap-free.
fn tail_splice(points: &[TrackPoint], options: &RepairOptions) -> Option<Vec<TrackPoint>> {
    let n = points.len();
    if n < 3 {
        return None;
    }
    let start = &points[0];
    let far = &points[1];
    let tail_end = &points[n - 1];

    if haversine_distance(start, tail_end) > options.join_tolerance_m {
        return None;
    }

    let (target, distance) = nearest_in(points, (2..n).rev(), far)?;
    if distance > options.splice_tolerance_m {
        return None;
    }

    let walked = &points[target..n];
    let gap_free = walked
        .windows(2)
        .all(|w| haversine_distance(&w[0], &w[1]) <= options.join_tolerance_m);
    if !gap_free {
        return None;
    }

    Some(walked.iter().rev().map(strip_timestamp).collect())
}

/// Nearest point to `target` among `indices`; earlier indices in the iteration win ties.
fn nearest_in(
    points: &[TrackPoint],
    indices: impl Iterator<Item = usize>,
    target: &TrackPoint,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for idx in indices {
        let d = haversine_distance(&points[idx], target);
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((idx, d));
        }
    }
    best
}

/// Points strictly between `a` and `b`, at most `step_m` apart.
fn interpolate_segment(a: &TrackPoint, b: &TrackPoint, step_m: f64) -> Vec<TrackPoint> {
    let distance = haversine_distance(a, b);
    let segments = (distance / step_m).ceil().max(1.0) as usize;
    (1..segments)
        .map(|k| interpolate(a, b, k as f64 / segments as f64))
        .collect()
}

fn strip_timestamp(p: &TrackPoint) -> TrackPoint {
    TrackPoint {
        timestamp: None,
        ..*p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ~1.11m per 0.00001 degree of latitude
    fn north(i: f64) -> TrackPoint {
        TrackPoint::new(37.0 + i * 0.00001, 127.0)
    }

    fn thresholds() -> GapThresholds {
        GapThresholds::default()
    }

    #[test]
    fn test_single_minor_gap() {
        // 117 * 1.11m = ~130m
        let path = vec![north(0.0), north(117.0)];
        let gaps = detect_gaps(&path, &thresholds());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].at_index, 0);
        assert_eq!(gaps[0].severity, GapSeverity::Minor);
        assert!((gaps[0].distance_m - 130.1).abs() < 1.0);
    }

    #[test]
    fn test_severity_tiers() {
        let path = vec![
            north(0.0),
            north(50.0),   // 55m: no gap
            north(250.0),  // 222m: major
            north(800.0),  // 611m: critical
            north(920.0),  // 133m: minor
        ];
        let gaps = detect_gaps(&path, &thresholds());
        let severities: Vec<GapSeverity> = gaps.iter().map(|g| g.severity).collect();
        assert_eq!(
            severities,
            vec![GapSeverity::Major, GapSeverity::Critical, GapSeverity::Minor]
        );
        assert_eq!(gaps[0].at_index, 1);

        let summary = GapSummary::from_gaps(&gaps);
        assert_eq!(summary.total, 3);
        assert_eq!((summary.minor, summary.major, summary.critical), (1, 1, 1));
        assert!(summary.max_distance_m > 600.0);
    }

    #[test]
    fn test_detection_is_non_destructive() {
        let path = vec![north(0.0), north(300.0)];
        let copy = path.clone();
        let first = detect_gaps(&path, &thresholds());
        let second = detect_gaps(&path, &thresholds());
        assert_eq!(first, second);
        assert_eq!(path, copy);
    }

    #[test]
    fn test_linear_repair_clears_gaps() {
        let path = vec![
            north(0.0).with_altitude(100.0),
            north(60.0).with_altitude(110.0),
            north(900.0).with_altitude(200.0), // ~933m gap
            north(950.0).with_altitude(205.0),
        ];
        let options = RepairOptions {
            strategy: RepairStrategy::Linear,
            ..Default::default()
        };
        let repaired = repair_gaps(&path, &options);

        assert!(detect_gaps(&repaired.path, &thresholds()).is_empty());
        assert_eq!(repaired.report.interpolations, 1);
        assert_eq!(repaired.report.splices, 0);
        // 933m / 50m -> 19 segments -> 18 inserted
        assert_eq!(repaired.report.points_inserted, 18);
        assert_eq!(repaired.path.len(), path.len() + 18);

        // Original points keep their order
        assert_eq!(repaired.path[0], path[0]);
        assert_eq!(repaired.path[1], path[1]);
        assert_eq!(repaired.path[20], path[2]);

        // Altitude interpolated monotonically between 110 and 200
        let inserted = &repaired.path[2..20];
        assert!(inserted
            .iter()
            .all(|p| matches!(p.altitude, Some(a) if a > 110.0 && a < 200.0)));
    }

    #[test]
    fn test_round_trip_splice_targets_backtrack_point() {
        // A, B, C, D walking north 80m apart, then a dropout to E which lies
        // 30m east of B.
        let a = north(0.0);
        let b = north(72.0);
        let c = north(144.0);
        let d = north(216.0);
        let e = TrackPoint::new(b.latitude, b.longitude + 0.00034);
        let path = vec![a, b, c, d, e];

        let repaired = repair_gaps(&path, &RepairOptions::default());

        assert_eq!(repaired.report.splices, 1);
        assert_eq!(repaired.path, vec![a, b, c, d, c, b, e]);

        // The point before E is within tolerance of B, not A or C
        let before_e = repaired.path[repaired.path.len() - 2];
        assert!(haversine_distance(&before_e, &b) < 1e-6);
        assert!(haversine_distance(&before_e, &e) <= 100.0);

        assert!(detect_gaps(&repaired.path, &thresholds()).is_empty());
    }

    #[test]
    fn test_splice_falls_back_when_no_target() {
        // Straight walk with a forward gap: nothing behind is near the far side
        let path = vec![north(0.0), north(80.0), north(160.0), north(600.0)];
        let repaired = repair_gaps(&path, &RepairOptions::default());
        assert_eq!(repaired.report.splices, 0);
        assert_eq!(repaired.report.interpolations, 1);
        assert!(detect_gaps(&repaired.path, &thresholds()).is_empty());
    }

    /// Point `east_m` / `north_m` meters from (37.0, 127.0)
    fn offset(east_m: f64, north_m: f64) -> TrackPoint {
        TrackPoint::new(
            37.0 + north_m / 111_195.0,
            127.0 + east_m / (111_195.0 * 37.0_f64.to_radians().cos()),
        )
    }

    #[test]
    fn test_gap_at_index_zero_uses_tail() {
        // Looped recording: the start fix, a dropout, a 150m-radius loop that
        // begins 180m east of the start, then the walk back west to the start.
        let start = offset(0.0, 0.0);
        let mut path = vec![start];
        for k in 0..20 {
            let angle = std::f64::consts::PI + k as f64 * std::f64::consts::TAU / 20.0;
            path.push(offset(330.0 + 150.0 * angle.cos(), 150.0 * angle.sin()));
        }
        path.push(offset(120.0, 0.0));
        path.push(offset(40.0, 0.0));

        let gaps = detect_gaps(&path, &thresholds());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].at_index, 0);

        let repaired = repair_gaps(&path, &RepairOptions::default());
        assert_eq!(repaired.report.splices, 1);
        assert!(detect_gaps(&repaired.path, &thresholds()).is_empty());
        assert_eq!(repaired.path[0], start);
        // Walks the tail back from its last point
        assert_eq!(repaired.path[1], *path.last().unwrap());
    }

    #[test]
    fn test_gap_at_index_zero_open_path_interpolates() {
        let path = vec![north(0.0), north(300.0), north(370.0), north(440.0)];
        let repaired = repair_gaps(&path, &RepairOptions::default());
        assert_eq!(repaired.report.splices, 0);
        assert_eq!(repaired.report.interpolations, 1);
        assert!(detect_gaps(&repaired.path, &thresholds()).is_empty());
    }

    #[test]
    fn test_repair_then_detect_is_empty() {
        let mut path = Vec::new();
        for k in 0..20 {
            path.push(TrackPoint::new(37.0 + k as f64 * 0.0005, 127.0 + (k % 4) as f64 * 0.002));
        }
        assert!(!detect_gaps(&path, &thresholds()).is_empty());

        for strategy in [RepairStrategy::RoundTrip, RepairStrategy::Linear] {
            let options = RepairOptions {
                strategy,
                ..Default::default()
            };
            let repaired = repair_gaps(&path, &options);
            assert!(detect_gaps(&repaired.path, &thresholds()).is_empty());
            // Repair is pure
            assert_eq!(repaired.path.len() as u32, path.len() as u32 + repaired.report.points_inserted);
        }
    }

    #[test]
    fn test_gap_free_path_unchanged() {
        let path: Vec<TrackPoint> = (0..10).map(|i| north(i as f64 * 50.0)).collect();
        let repaired = repair_gaps(&path, &RepairOptions::default());
        assert_eq!(repaired.path, path);
        assert_eq!(repaired.report, RepairReport::default());
    }

    #[test]
    fn test_splice_strips_timestamps() {
        let a = north(0.0).with_timestamp(0);
        let b = north(72.0).with_timestamp(60);
        let c = north(144.0).with_timestamp(120);
        let e = TrackPoint::new(a.latitude, a.longitude + 0.0003).with_timestamp(900);
        let repaired = repair_gaps(&[a, b, c, e], &RepairOptions::default());
        assert_eq!(repaired.report.splices, 1);
        assert_eq!(repaired.path[3].timestamp, None);
        assert_eq!(repaired.path[4].timestamp, None);
        assert_eq!(repaired.path[5].timestamp, Some(900));
    }
}
