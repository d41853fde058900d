//! Aggregate batch report.
//!
//! Built from per-trail outcomes after processing. Meant for human review
//! of a batch run and written as JSON; the web front end never reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::gaps::{Gap, GapSeverity, RepairReport};
use crate::pipeline::TrailOutcome;
use crate::TrailType;

/// Kind of suspicious record flagged for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierKind {
    /// Recomputed distance differs strongly from the stored one
    DistanceDiscrepancy,
    /// Walking speed outside the plausible range
    ImplausibleSpeed,
}

/// A flagged record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    pub trail_id: String,
    pub kind: OutlierKind,
    /// Observed value (km for distance, km/h for speed)
    pub value: f64,
    /// Value it is compared against (prior distance, or the violated speed bound)
    pub reference: f64,
    /// Relative deviation from `reference`, used for ranking
    pub magnitude: f64,
}

impl Outlier {
    /// Flag a recomputed distance that moved more than `max_ratio` away from `prior_km`.
    pub fn distance_discrepancy(
        trail_id: &str,
        prior_km: f64,
        new_km: f64,
        max_ratio: f64,
    ) -> Option<Self> {
        if prior_km <= 0.0 {
            return None;
        }
        let magnitude = (new_km - prior_km).abs() / prior_km;
        (magnitude > max_ratio).then(|| Outlier {
            trail_id: trail_id.to_string(),
            kind: OutlierKind::DistanceDiscrepancy,
            value: new_km,
            reference: prior_km,
            magnitude,
        })
    }

    /// Flag a speed outside `[min_kmh, max_kmh]`.
    pub fn implausible_speed(
        trail_id: &str,
        speed_kmh: f64,
        min_kmh: f64,
        max_kmh: f64,
    ) -> Option<Self> {
        if !speed_kmh.is_finite() {
            return None;
        }
        let (reference, magnitude) = if speed_kmh < min_kmh {
            (min_kmh, (min_kmh - speed_kmh) / min_kmh)
        } else if speed_kmh > max_kmh {
            (max_kmh, (speed_kmh - max_kmh) / max_kmh)
        } else {
            return None;
        };
        Some(Outlier {
            trail_id: trail_id.to_string(),
            kind: OutlierKind::ImplausibleSpeed,
            value: speed_kmh,
            reference,
            magnitude,
        })
    }
}

/// Gap counts per severity tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub minor: u32,
    pub major: u32,
    pub critical: u32,
}

/// Gap counts per distance band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapHistogram {
    #[serde(rename = "100-200m")]
    pub up_to_200m: u32,
    #[serde(rename = "200-500m")]
    pub up_to_500m: u32,
    #[serde(rename = "500-1000m")]
    pub up_to_1000m: u32,
    #[serde(rename = ">1000m")]
    pub over_1000m: u32,
}

impl GapHistogram {
    fn add(&mut self, distance_m: f64) {
        if distance_m <= 200.0 {
            self.up_to_200m += 1;
        } else if distance_m <= 500.0 {
            self.up_to_500m += 1;
        } else if distance_m <= 1000.0 {
            self.up_to_1000m += 1;
        } else {
            self.over_1000m += 1;
        }
    }
}

/// Repair work summed over the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairTotals {
    pub gaps_repaired: u32,
    pub splices: u32,
    pub interpolations: u32,
    pub points_inserted: u32,
    /// Dead-end paths turned into explicit round trips
    pub synthesized_round_trips: u32,
    /// Circular paths rotated to start at their lowest point
    pub normalized: u32,
}

impl RepairTotals {
    fn add(&mut self, repair: &RepairReport) {
        self.gaps_repaired += repair.gaps_repaired;
        self.splices += repair.splices;
        self.interpolations += repair.interpolations;
        self.points_inserted += repair.points_inserted;
    }
}

/// A record that was skipped or failed, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordIssue {
    pub trail_id: String,
    pub reason: String,
}

/// Summary of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub generated_at: DateTime<Utc>,
    /// Nothing was written
    pub dry_run: bool,
    pub processed: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub skipped: u32,
    pub failed: u32,
    /// Records per trail type after processing
    pub type_counts: BTreeMap<TrailType, u32>,
    /// Gaps found before repair
    pub gap_severity: SeverityCounts,
    pub gap_histogram: GapHistogram,
    pub repairs: RepairTotals,
    pub distance_outliers: Vec<Outlier>,
    pub speed_outliers: Vec<Outlier>,
    pub skipped_records: Vec<RecordIssue>,
    pub failed_records: Vec<RecordIssue>,
}

impl BatchReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            generated_at: Utc::now(),
            dry_run,
            processed: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            failed: 0,
            type_counts: BTreeMap::new(),
            gap_severity: SeverityCounts::default(),
            gap_histogram: GapHistogram::default(),
            repairs: RepairTotals::default(),
            distance_outliers: Vec::new(),
            speed_outliers: Vec::new(),
            skipped_records: Vec::new(),
            failed_records: Vec::new(),
        }
    }

    /// Count gaps into the severity and distance tallies.
    pub fn add_gaps(&mut self, gaps: &[Gap]) {
        for gap in gaps {
            match gap.severity {
                GapSeverity::Minor => self.gap_severity.minor += 1,
                GapSeverity::Major => self.gap_severity.major += 1,
                GapSeverity::Critical => self.gap_severity.critical += 1,
            }
            self.gap_histogram.add(gap.distance_m);
        }
    }

    /// Fold one trail outcome into the totals.
    pub fn add_outcome(&mut self, outcome: &TrailOutcome) {
        self.processed += 1;

        match outcome {
            TrailOutcome::Updated(trail) | TrailOutcome::Unchanged(trail) => {
                if matches!(outcome, TrailOutcome::Updated(_)) {
                    self.updated += 1;
                } else {
                    self.unchanged += 1;
                }
                *self
                    .type_counts
                    .entry(trail.classification.trail_type)
                    .or_insert(0) += 1;
                self.add_gaps(&trail.gaps);
                self.repairs.add(&trail.repair);
                if trail.synthesized {
                    self.repairs.synthesized_round_trips += 1;
                }
                if trail.normalized {
                    self.repairs.normalized += 1;
                }
                for outlier in &trail.outliers {
                    match outlier.kind {
                        OutlierKind::DistanceDiscrepancy => {
                            self.distance_outliers.push(outlier.clone())
                        }
                        OutlierKind::ImplausibleSpeed => self.speed_outliers.push(outlier.clone()),
                    }
                }
            }
            TrailOutcome::Skipped { trail_id, reason } => {
                self.skipped += 1;
                self.skipped_records.push(RecordIssue {
                    trail_id: trail_id.clone(),
                    reason: reason.clone(),
                });
            }
            TrailOutcome::Failed { trail_id, reason } => {
                self.failed += 1;
                self.failed_records.push(RecordIssue {
                    trail_id: trail_id.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }

    /// Rank outliers by magnitude and keep the top `top_n` of each kind.
    pub fn finalize(&mut self, top_n: usize) {
        for list in [&mut self.distance_outliers, &mut self.speed_outliers] {
            list.sort_by(|a, b| {
                b.magnitude
                    .total_cmp(&a.magnitude)
                    .then_with(|| a.trail_id.cmp(&b.trail_id))
            });
            list.truncate(top_n);
        }
    }

    pub fn total_gaps(&self) -> u32 {
        self.gap_severity.minor + self.gap_severity.major + self.gap_severity.critical
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Batch report ({}){}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            if self.dry_run { " [dry run]" } else { "" }
        )?;
        writeln!(
            f,
            "  processed {}: updated {}, unchanged {}, skipped {}, failed {}",
            self.processed, self.updated, self.unchanged, self.skipped, self.failed
        )?;

        if !self.type_counts.is_empty() {
            writeln!(f, "  trail types:")?;
            for (trail_type, count) in &self.type_counts {
                writeln!(f, "    {:<17} {}", trail_type.as_str(), count)?;
            }
        }

        writeln!(
            f,
            "  gaps: {} (minor {}, major {}, critical {})",
            self.total_gaps(),
            self.gap_severity.minor,
            self.gap_severity.major,
            self.gap_severity.critical
        )?;
        let h = &self.gap_histogram;
        writeln!(
            f,
            "    100-200m {}  200-500m {}  500-1000m {}  >1000m {}",
            h.up_to_200m, h.up_to_500m, h.up_to_1000m, h.over_1000m
        )?;
        writeln!(
            f,
            "  repairs: {} gaps ({} splices, {} interpolations, {} points), {} round trips synthesized, {} normalized",
            self.repairs.gaps_repaired,
            self.repairs.splices,
            self.repairs.interpolations,
            self.repairs.points_inserted,
            self.repairs.synthesized_round_trips,
            self.repairs.normalized
        )?;

        for (title, list) in [
            ("distance discrepancies", &self.distance_outliers),
            ("implausible speeds", &self.speed_outliers),
        ] {
            if list.is_empty() {
                continue;
            }
            writeln!(f, "  {}:", title)?;
            for o in list {
                writeln!(
                    f,
                    "    {:<24} {:>8.2} vs {:>8.2} ({:+.0}%)",
                    o.trail_id,
                    o.value,
                    o.reference,
                    o.magnitude * 100.0
                )?;
            }
        }

        for issue in self.failed_records.iter() {
            writeln!(f, "  FAILED {}: {}", issue.trail_id, issue.reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_discrepancy_threshold() {
        assert!(Outlier::distance_discrepancy("a", 5.0, 5.9, 0.2).is_none());
        let o = Outlier::distance_discrepancy("a", 5.0, 10.0, 0.2).unwrap();
        assert_eq!(o.kind, OutlierKind::DistanceDiscrepancy);
        assert_eq!(o.magnitude, 1.0);
        assert!(Outlier::distance_discrepancy("a", 0.0, 3.0, 0.2).is_none());
    }

    #[test]
    fn test_implausible_speed_bounds() {
        assert!(Outlier::implausible_speed("a", 2.0, 0.5, 6.0).is_none());
        let fast = Outlier::implausible_speed("a", 12.0, 0.5, 6.0).unwrap();
        assert_eq!(fast.reference, 6.0);
        assert_eq!(fast.magnitude, 1.0);
        let slow = Outlier::implausible_speed("a", 0.25, 0.5, 6.0).unwrap();
        assert_eq!(slow.magnitude, 0.5);
        assert!(Outlier::implausible_speed("a", f64::INFINITY, 0.5, 6.0).is_none());
    }

    #[test]
    fn test_gap_tallies() {
        let gap = |d: f64, severity| Gap {
            at_index: 0,
            distance_m: d,
            severity,
        };
        let mut report = BatchReport::new(false);
        report.add_gaps(&[
            gap(130.0, GapSeverity::Minor),
            gap(250.0, GapSeverity::Major),
            gap(700.0, GapSeverity::Critical),
            gap(1500.0, GapSeverity::Critical),
        ]);
        assert_eq!(report.total_gaps(), 4);
        assert_eq!(report.gap_severity.critical, 2);
        assert_eq!(
            report.gap_histogram,
            GapHistogram {
                up_to_200m: 1,
                up_to_500m: 1,
                up_to_1000m: 1,
                over_1000m: 1,
            }
        );
    }

    #[test]
    fn test_finalize_ranks_and_truncates() {
        let mut report = BatchReport::new(true);
        for (id, new_km) in [("a", 7.0), ("b", 12.0), ("c", 9.0)] {
            report
                .distance_outliers
                .extend(Outlier::distance_discrepancy(id, 5.0, new_km, 0.2));
        }
        report.finalize(2);
        let ids: Vec<&str> = report
            .distance_outliers
            .iter()
            .map(|o| o.trail_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_json_shape() {
        let mut report = BatchReport::new(false);
        report.type_counts.insert(TrailType::Roundtrip, 3);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["type_counts"]["ROUNDTRIP"], 3);
        assert_eq!(json["gap_histogram"][">1000m"], 0);
        assert!(json["generated_at"].is_string());
    }
}
