//! # Batch Orchestrator
//!
//! Runs every stage on one trail record in order:
//! clean → detect gaps → repair → classify (synthesizing round trips) →
//! normalize direction → recompute metrics.
//!
//! The stages are re-applied to their own output until the path stops
//! changing, so a stored path is a fixed point and a second run over the
//! same data rewrites nothing. Trails are independent and are processed on
//! a rayon pool; writes happen afterwards on the calling thread, one
//! transaction per record.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(feature = "http")]
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cleaning::clean_points;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::gaps::{detect_gaps, repair_gaps, Gap, RepairOptions, RepairReport};
use crate::metrics::compute_metrics;
use crate::normalize::normalize_direction;
use crate::proximity::{ProximityResult, RoadProximityResolver};
use crate::report::{BatchReport, Outlier};
use crate::store::TrailStore;
use crate::topology::TopologyClassifier;
use crate::{StoredCoordinate, TrackPoint, TrailClassification, TrailRecord, Waypoint};

/// Upper bound on clean/repair/classify/normalize rounds per record.
pub const MAX_SETTLE_PASSES: usize = 4;

/// Everything computed for one trail.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTrail {
    /// The recomputed record
    pub record: TrailRecord,
    pub classification: TrailClassification,
    /// Gaps in the cleaned input, before repair
    pub gaps: Vec<Gap>,
    pub repair: RepairReport,
    /// A dead-end path was turned into an explicit round trip
    pub synthesized: bool,
    /// The path was rotated to start at its lowest point
    pub normalized: bool,
    /// Endpoint resolution of the last pass, when one was needed
    pub proximity: Option<ProximityResult>,
    pub passes: usize,
    pub outliers: Vec<Outlier>,
}

/// Result of processing one trail.
#[derive(Debug, Clone, PartialEq)]
pub enum TrailOutcome {
    /// Recomputed values differ from the stored ones
    Updated(Box<ProcessedTrail>),
    /// Recomputed values equal the stored ones; nothing to write
    Unchanged(Box<ProcessedTrail>),
    /// Input defect, record left as is
    Skipped { trail_id: String, reason: String },
    /// Processing or persistence fault
    Failed { trail_id: String, reason: String },
}

impl TrailOutcome {
    pub fn trail_id(&self) -> &str {
        match self {
            TrailOutcome::Updated(t) | TrailOutcome::Unchanged(t) => &t.record.id,
            TrailOutcome::Skipped { trail_id, .. } | TrailOutcome::Failed { trail_id, .. } => {
                trail_id
            }
        }
    }

    pub fn processed(&self) -> Option<&ProcessedTrail> {
        match self {
            TrailOutcome::Updated(t) | TrailOutcome::Unchanged(t) => Some(t),
            _ => None,
        }
    }

    fn from_error(trail_id: &str, err: PipelineError) -> Self {
        if err.is_input_defect() {
            warn!("[Pipeline] Skipping '{}': {}", trail_id, err);
            TrailOutcome::Skipped {
                trail_id: trail_id.to_string(),
                reason: err.to_string(),
            }
        } else {
            warn!("[Pipeline] Failed '{}': {}", trail_id, err);
            TrailOutcome::Failed {
                trail_id: trail_id.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Options for one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Compute everything, write nothing
    pub dry_run: bool,
    /// Restrict the batch to these trail ids. Empty means all trails.
    pub only_ids: Vec<String>,
}

/// Configured trail pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    repair: RepairOptions,
    classifier: TopologyClassifier,
}

impl Pipeline {
    /// Create a pipeline. Invalid configuration is rejected here.
    pub fn new(config: PipelineConfig, resolver: RoadProximityResolver) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repair: config.repair_options(),
            classifier: TopologyClassifier::new(&config, resolver),
            config,
        })
    }

    /// Create a pipeline whose resolver is built from the configuration,
    /// including the HTTP place search when one is configured with a key.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let resolver = RoadProximityResolver::new(
            config.road_radius_m,
            config.road_access_categories.clone(),
        );

        #[cfg(feature = "http")]
        let resolver = match &config.place_search {
            Some(search) if !search.api_key.is_empty() => {
                info!("[Pipeline] Place search enabled: {}", search.base_url);
                let http = crate::place_search::HttpPlaceSearch::new(search.clone())?;
                resolver.with_place_search(Arc::new(http))
            }
            Some(_) => {
                warn!("[Pipeline] place_search has no api_key, using waypoints only");
                resolver
            }
            None => resolver,
        };

        #[cfg(not(feature = "http"))]
        {
            if config.place_search.is_some() {
                warn!("[Pipeline] Built without the http feature, place_search ignored");
            }
        }

        Self::new(config, resolver)
    }

    // ========================================================================
    // Single record
    // ========================================================================

    /// Run every stage on one record. Never panics on bad input and never
    /// touches storage.
    pub fn process_record(&self, record: &TrailRecord, waypoints: &[Waypoint]) -> TrailOutcome {
        match self.process_inner(record, waypoints) {
            Ok((trail, true)) => TrailOutcome::Updated(Box::new(trail)),
            Ok((trail, false)) => TrailOutcome::Unchanged(Box::new(trail)),
            Err(e) => TrailOutcome::from_error(&record.id, e),
        }
    }

    fn process_inner(
        &self,
        record: &TrailRecord,
        waypoints: &[Waypoint],
    ) -> Result<(ProcessedTrail, bool)> {
        let id = record.id.as_str();
        let input = &record.path_coordinates;

        if input.len() < 2 {
            return Err(PipelineError::InsufficientPoints {
                trail_id: id.to_string(),
                point_count: input.len(),
                minimum_required: 2,
            });
        }
        if let Some(idx) = input.iter().position(|p| !p.is_valid()) {
            return Err(PipelineError::InvalidCoordinates {
                trail_id: id.to_string(),
                message: format!(
                    "point {} at ({}, {})",
                    idx, input[idx].latitude, input[idx].longitude
                ),
            });
        }

        let mut path = input.clone();
        let mut gaps_before: Option<Vec<Gap>> = None;
        let mut repair = RepairReport::default();
        let mut synthesized = false;
        let mut normalized = false;
        let mut last_pass = None;
        let mut passes = 0;
        let mut settled = false;

        while passes < MAX_SETTLE_PASSES && !settled {
            passes += 1;

            let cleaned = clean_points(&path, self.config.min_point_separation_m);
            let gaps = detect_gaps(&cleaned, &self.config.gap);
            debug!(
                "[Pipeline] '{}' pass {}: {} -> {} points, {} gaps",
                id,
                passes,
                path.len(),
                cleaned.len(),
                gaps.len()
            );

            let repaired = repair_gaps(&cleaned, &self.repair);
            if gaps_before.is_none() {
                gaps_before = Some(gaps);
            }
            repair.gaps_repaired += repaired.report.gaps_repaired;
            repair.splices += repaired.report.splices;
            repair.interpolations += repaired.report.interpolations;
            repair.points_inserted += repaired.report.points_inserted;

            let classified = self.classifier.classify(id, &repaired.path, waypoints)?;
            synthesized |= classified.synthesized;

            let mut next = classified.path;
            let mut classification = classified.classification;
            if classification.trail_type.is_circular() {
                if let Some(rotation) = normalize_direction(
                    &next,
                    self.config.low_altitude_m,
                    self.config.min_point_separation_m,
                ) {
                    // A rotation must not change what kind of trail this is
                    let rotated = self.classifier.classify(id, &rotation.path, waypoints)?;
                    if !rotated.synthesized
                        && rotated.classification.trail_type == classification.trail_type
                    {
                        debug!(
                            "[Pipeline] '{}' rotated to start at index {}",
                            id, rotation.low_idx
                        );
                        next = rotation.path;
                        classification = rotated.classification;
                        normalized = true;
                    } else {
                        debug!(
                            "[Pipeline] '{}' kept its start: rotating makes it {}",
                            id, rotated.classification.trail_type
                        );
                    }
                }
            }

            settled = next == path;
            path = next;
            last_pass = Some((classification, classified.proximity));
        }

        if !settled {
            warn!(
                "[Pipeline] '{}' still changing after {} passes",
                id, MAX_SETTLE_PASSES
            );
        }

        let (classification, proximity) = last_pass.ok_or_else(|| PipelineError::InsufficientPoints {
            trail_id: id.to_string(),
            point_count: input.len(),
            minimum_required: 2,
        })?;

        let metrics = compute_metrics(&path, record.difficulty, &self.config.speeds);
        let updated = TrailRecord {
            distance_km: metrics.distance_km,
            duration_min: metrics.duration_min,
            min_altitude: metrics.min_altitude,
            max_altitude: metrics.max_altitude,
            avg_altitude: metrics.avg_altitude,
            elevation_gain: metrics.elevation_gain,
            path_coordinates: path,
            trail_type: Some(classification.trail_type),
            overlap_rate: Some(classification.overlap_rate),
            ..record.clone()
        };

        let mut outliers = Vec::new();
        outliers.extend(Outlier::distance_discrepancy(
            id,
            record.distance_km,
            updated.distance_km,
            self.config.distance_discrepancy_ratio,
        ));
        outliers.extend(self.speed_outlier(record));

        let changed = record_changed(record, &updated);
        debug!(
            "[Pipeline] '{}' {} ({:.2} km, {} passes{})",
            id,
            classification.trail_type,
            updated.distance_km,
            passes,
            if changed { ", changed" } else { "" }
        );

        Ok((
            ProcessedTrail {
                record: updated,
                classification,
                gaps: gaps_before.unwrap_or_default(),
                repair,
                synthesized,
                normalized,
                proximity,
                passes,
                outliers,
            },
            changed,
        ))
    }

    /// Speed implied by the stored record: the imported recording's length
    /// over its elapsed time when timestamps were present, otherwise the
    /// stored distance/duration.
    fn speed_outlier(&self, record: &TrailRecord) -> Option<Outlier> {
        let speed_kmh = match (record.recorded_seconds, record.recorded_distance_m) {
            (Some(secs), Some(meters)) if secs > 0 => meters / 1000.0 / (secs as f64 / 3600.0),
            _ if record.duration_min > 0 => {
                record.distance_km / (record.duration_min as f64 / 60.0)
            }
            _ => return None,
        };
        Outlier::implausible_speed(
            &record.id,
            speed_kmh,
            self.config.min_plausible_speed_kmh,
            self.config.max_plausible_speed_kmh,
        )
    }

    // ========================================================================
    // Batch
    // ========================================================================

    /// Process the selected records and write back the changed ones.
    ///
    /// One record's failure is counted in the report and never aborts the
    /// batch. Only a failure to list the records is returned as an error.
    pub fn run(&self, store: &mut TrailStore, options: &BatchOptions) -> Result<BatchReport> {
        let ids = select_ids(store, options)?;
        info!(
            "[Pipeline] Processing {} trails ({} workers{})",
            ids.len(),
            self.config.workers,
            if options.dry_run { ", dry run" } else { "" }
        );

        let mut report = BatchReport::new(options.dry_run);
        let (inputs, load_failures) = load_inputs(store, &ids);
        for outcome in &load_failures {
            report.add_outcome(outcome);
        }

        for outcome in self.process_all(&inputs)? {
            let outcome = match outcome {
                TrailOutcome::Updated(trail) if !options.dry_run => {
                    match store.update_record(&trail.record) {
                        Ok(()) => TrailOutcome::Updated(trail),
                        Err(e) => TrailOutcome::from_error(&trail.record.id, e),
                    }
                }
                other => other,
            };
            report.add_outcome(&outcome);
        }

        report.finalize(self.config.report_top_n);
        info!(
            "[Pipeline] Done: {} processed, {} updated, {} unchanged, {} skipped, {} failed",
            report.processed, report.updated, report.unchanged, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Gap analysis of the stored paths. Nothing is repaired or written.
    pub fn analyze(&self, store: &TrailStore, options: &BatchOptions) -> Result<BatchReport> {
        let ids = select_ids(store, options)?;
        let mut report = BatchReport::new(true);
        let (inputs, load_failures) = load_inputs(store, &ids);
        for outcome in &load_failures {
            report.add_outcome(outcome);
        }

        for (record, _) in &inputs {
            report.processed += 1;
            if record.path_coordinates.len() < 2 {
                report.skipped += 1;
                continue;
            }

            let cleaned = clean_points(&record.path_coordinates, self.config.min_point_separation_m);
            let gaps = detect_gaps(&cleaned, &self.config.gap);
            report.add_gaps(&gaps);
            if let Some(trail_type) = record.trail_type {
                *report.type_counts.entry(trail_type).or_insert(0) += 1;
            }
            if let Some(outlier) = self.speed_outlier(record) {
                report.speed_outliers.push(outlier);
            }
        }

        report.finalize(self.config.report_top_n);
        info!(
            "[Pipeline] Analyzed {} trails: {} gaps",
            report.processed,
            report.total_gaps()
        );
        Ok(report)
    }

    fn process_all(&self, inputs: &[(TrailRecord, Vec<Waypoint>)]) -> Result<Vec<TrailOutcome>> {
        let total = inputs.len();
        let done = AtomicUsize::new(0);
        let process = |(record, waypoints): &(TrailRecord, Vec<Waypoint>)| {
            let outcome = self.process_record(record, waypoints);
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 100 == 0 || n == total {
                info!("[Pipeline] Progress {}/{}", n, total);
            }
            outcome
        };

        #[cfg(feature = "parallel")]
        {
            if self.config.workers > 1 && total > 1 {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(self.config.workers)
                    .build()
                    .map_err(|e| PipelineError::config(format!("worker pool: {}", e)))?;
                return Ok(pool.install(|| inputs.par_iter().map(process).collect()));
            }
        }

        Ok(inputs.iter().map(process).collect())
    }
}

fn select_ids(store: &TrailStore, options: &BatchOptions) -> Result<Vec<String>> {
    if options.only_ids.is_empty() {
        store.trail_ids()
    } else {
        Ok(options.only_ids.clone())
    }
}

/// Load records and waypoints on the calling thread.
fn load_inputs(
    store: &TrailStore,
    ids: &[String],
) -> (Vec<(TrailRecord, Vec<Waypoint>)>, Vec<TrailOutcome>) {
    let mut inputs = Vec::with_capacity(ids.len());
    let mut failures = Vec::new();

    for id in ids {
        let loaded = store
            .load_record(id)
            .and_then(|record| Ok((record, store.waypoints_for(id)?)));
        match loaded {
            Ok((Some(record), waypoints)) => inputs.push((record, waypoints)),
            Ok((None, _)) => {
                warn!("[Pipeline] Trail '{}' not found", id);
                failures.push(TrailOutcome::Skipped {
                    trail_id: id.clone(),
                    reason: "not found".to_string(),
                });
            }
            Err(e) => failures.push(TrailOutcome::from_error(id, e)),
        }
    }

    (inputs, failures)
}

/// Whether any persisted field differs. Timestamps are not persisted and are ignored.
fn record_changed(old: &TrailRecord, new: &TrailRecord) -> bool {
    !same_geometry(&old.path_coordinates, &new.path_coordinates)
        || old.distance_km != new.distance_km
        || old.duration_min != new.duration_min
        || old.min_altitude != new.min_altitude
        || old.max_altitude != new.max_altitude
        || old.avg_altitude != new.avg_altitude
        || old.elevation_gain != new.elevation_gain
        || old.trail_type != new.trail_type
        || old.overlap_rate != new.overlap_rate
}

fn same_geometry(a: &[TrackPoint], b: &[TrackPoint]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(p, q)| StoredCoordinate::from(p) == StoredCoordinate::from(q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Difficulty, TrailType};

    fn pipeline() -> Pipeline {
        let config = PipelineConfig::default();
        let resolver =
            RoadProximityResolver::new(config.road_radius_m, config.road_access_categories.clone());
        Pipeline::new(config, resolver).unwrap()
    }

    fn record(id: &str, path: Vec<TrackPoint>) -> TrailRecord {
        TrailRecord {
            id: id.to_string(),
            name: id.to_string(),
            mountain: String::new(),
            region: String::new(),
            difficulty: Difficulty::Intermediate,
            distance_km: 0.0,
            duration_min: 0,
            min_altitude: None,
            max_altitude: None,
            avg_altitude: None,
            elevation_gain: None,
            path_coordinates: path,
            trail_type: None,
            overlap_rate: None,
            recorded_seconds: None,
            recorded_distance_m: None,
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = PipelineConfig {
            road_access_categories: vec![],
            ..Default::default()
        };
        let resolver = RoadProximityResolver::new(500.0, vec![]);
        assert!(matches!(
            Pipeline::new(config, resolver),
            Err(PipelineError::Config { .. })
        ));
    }

    #[test]
    fn test_short_record_is_skipped() {
        let rec = record("one", vec![TrackPoint::new(37.0, 127.0)]);
        let outcome = pipeline().process_record(&rec, &[]);
        assert!(matches!(outcome, TrailOutcome::Skipped { .. }));
        assert_eq!(outcome.trail_id(), "one");
    }

    #[test]
    fn test_invalid_coordinates_skipped() {
        let rec = record(
            "bad",
            vec![TrackPoint::new(37.0, 127.0), TrackPoint::new(95.0, 127.0)],
        );
        assert!(matches!(
            pipeline().process_record(&rec, &[]),
            TrailOutcome::Skipped { .. }
        ));
    }

    #[test]
    fn test_processed_record_is_fixed_point() {
        // Dead end: synthesized into a round trip, then rotated to its low point
        let path: Vec<TrackPoint> = (0..20)
            .map(|i| {
                TrackPoint::new(37.5 + i as f64 * 0.0004, 127.0)
                    .with_altitude(300.0 + (i as f64 - 8.0).abs() * 10.0)
            })
            .collect();
        let p = pipeline();

        let first = p.process_record(&record("dead-end", path), &[]);
        let trail = match first {
            TrailOutcome::Updated(trail) => trail,
            other => panic!("expected update, got {:?}", other),
        };
        assert!(trail.synthesized);
        assert!(trail.normalized);
        assert_eq!(trail.classification.trail_type, TrailType::Roundtrip);
        assert_eq!(trail.record.path_coordinates[0].altitude, Some(300.0));
        // Rotated as a closed ring: 20 out, 19 back, nothing lost
        assert_eq!(trail.record.path_coordinates.len(), 39);
        assert_eq!(
            trail.record.path_coordinates.first(),
            trail.record.path_coordinates.last()
        );

        let second = p.process_record(&trail.record, &[]);
        assert!(matches!(second, TrailOutcome::Unchanged(_)));
    }

    #[test]
    fn test_short_dead_end_stays_roundtrip() {
        let out: Vec<TrackPoint> = [310.0, 300.0, 310.0, 320.0]
            .iter()
            .enumerate()
            .map(|(i, alt)| TrackPoint::new(37.5 + i as f64 * 0.00045, 127.0).with_altitude(*alt))
            .collect();
        let mut expected = out.clone();
        expected.extend(out[..3].iter().rev());

        let p = pipeline();
        let trail = match p.process_record(&record("spur", out), &[]) {
            TrailOutcome::Updated(trail) => trail,
            other => panic!("expected update, got {:?}", other),
        };
        assert!(trail.synthesized);
        assert_eq!(trail.classification.trail_type, TrailType::Roundtrip);
        assert_eq!(trail.record.trail_type, Some(TrailType::Roundtrip));
        // Rotating to the 300m point would leave the turnaround walked once
        assert!(!trail.normalized);
        assert_eq!(trail.record.path_coordinates, expected);
        assert_eq!(trail.record.overlap_rate, Some(6.0 / 7.0));

        let second = p.process_record(&trail.record, &[]);
        assert!(matches!(second, TrailOutcome::Unchanged(_)));
    }

    #[test]
    fn test_record_changed_ignores_timestamps() {
        let a = record("a", vec![TrackPoint::new(37.0, 127.0).with_timestamp(5)]);
        let b = record("a", vec![TrackPoint::new(37.0, 127.0)]);
        assert!(!record_changed(&a, &b));

        let mut c = b.clone();
        c.trail_type = Some(TrailType::OnewayUnique);
        assert!(record_changed(&b, &c));
    }
}
