//! Pipeline configuration.
//!
//! Every threshold used by the pipeline lives here with its default. The
//! distance and overlap thresholds are empirical values tuned on Korean
//! mountain trail recordings, not derived constants.

use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;

use crate::error::{PipelineError, Result};
use crate::gaps::{RepairOptions, RepairStrategy};
use crate::{Difficulty, WaypointCategory};

/// Inter-point distance thresholds for gap severity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapThresholds {
    /// Distances above this are a gap (minor). Default: 100.0 meters
    pub minor: f64,
    /// Default: 200.0 meters
    pub major: f64,
    /// Default: 500.0 meters
    pub critical: f64,
}

impl Default for GapThresholds {
    fn default() -> Self {
        Self {
            minor: 100.0,
            major: 200.0,
            critical: 500.0,
        }
    }
}

/// Average hiking speed per difficulty, in km/h.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedTable {
    pub beginner: f64,
    pub intermediate: f64,
    pub advanced: f64,
    pub expert: f64,
}

impl Default for SpeedTable {
    fn default() -> Self {
        Self {
            beginner: 2.5,
            intermediate: 2.0,
            advanced: 1.5,
            expert: 1.2,
        }
    }
}

impl SpeedTable {
    pub fn speed_kmh(&self, difficulty: Difficulty) -> f64 {
        match difficulty {
            Difficulty::Beginner => self.beginner,
            Difficulty::Intermediate => self.intermediate,
            Difficulty::Advanced => self.advanced,
            Difficulty::Expert => self.expert,
        }
    }
}

/// Remote place-search settings. Absent means waypoints only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceSearchConfig {
    /// Category search endpoint
    pub base_url: String,
    pub api_key: String,
    /// Category code queried for parking. Default: "PK6"
    pub parking_code: String,
    /// Category code queried for transit. Default: "SW8"
    pub transit_code: String,
    /// Minimum delay between two requests. Default: 100 ms
    pub request_delay_ms: u64,
    /// Per-request timeout. Default: 5000 ms
    pub timeout_ms: u64,
}

impl Default for PlaceSearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dapi.kakao.com/v2/local/search/category.json".to_string(),
            api_key: String::new(),
            parking_code: "PK6".to_string(),
            transit_code: "SW8".to_string(),
            request_delay_ms: 100,
            timeout_ms: 5000,
        }
    }
}

/// Configuration for the whole pipeline, passed to the orchestrator at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum distance between consecutive kept points.
    /// Default: 10.0 meters
    pub min_point_separation_m: f64,

    /// Gap severity tiers. Default: 100 / 200 / 500 meters
    pub gap: GapThresholds,

    /// Maximum distance between the backtrack target and the far side of a gap
    /// for a round-trip splice. Must not exceed `gap.minor`.
    /// Default: 100.0 meters
    pub splice_tolerance_m: f64,

    /// Spacing of points inserted by linear interpolation. Must be below `gap.minor`.
    /// Default: 50.0 meters
    pub interpolation_step_m: f64,

    /// Preferred repair strategy. Default: round trip (falls back to linear)
    pub repair_strategy: RepairStrategy,

    /// Start/end distance below which a path is circular. Must not exceed
    /// `gap.minor`: rotation turns the start/end join into an interior step.
    /// Default: 100.0 meters
    pub circular_threshold_m: f64,

    /// Overlap rate at or above which a circular path is a round trip.
    /// Default: 0.8
    pub roundtrip_overlap: f64,

    /// Overlap rate at or above which a path is partially retraced.
    /// Default: 0.3
    pub partial_overlap: f64,

    /// Search radius for road access around the endpoint.
    /// Default: 500.0 meters
    pub road_radius_m: f64,

    /// Waypoint categories that count as road access.
    /// Default: entry, parking, transit
    pub road_access_categories: Vec<WaypointCategory>,

    /// Start altitude below which the direction is left alone.
    /// Default: 200.0 meters
    pub low_altitude_m: f64,

    /// Hiking speeds for the duration estimate.
    pub speeds: SpeedTable,

    /// Relative change against the previously stored distance that is reported
    /// as an outlier. Default: 0.2
    pub distance_discrepancy_ratio: f64,

    /// Plausible hiking speed range in km/h. Default: 0.5 - 6.0
    pub min_plausible_speed_kmh: f64,
    pub max_plausible_speed_kmh: f64,

    /// Maximum outliers kept per kind in the report. Default: 20
    pub report_top_n: usize,

    /// Worker threads for cross-trail parallelism. Default: 4
    pub workers: usize,

    /// Remote place search. Default: none (waypoints only)
    pub place_search: Option<PlaceSearchConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_point_separation_m: 10.0,
            gap: GapThresholds::default(),
            splice_tolerance_m: 100.0,
            interpolation_step_m: 50.0,
            repair_strategy: RepairStrategy::RoundTrip,
            circular_threshold_m: 100.0,
            roundtrip_overlap: 0.8,
            partial_overlap: 0.3,
            road_radius_m: 500.0,
            road_access_categories: vec![
                WaypointCategory::Entry,
                WaypointCategory::Parking,
                WaypointCategory::Transit,
            ],
            low_altitude_m: 200.0,
            speeds: SpeedTable::default(),
            distance_discrepancy_ratio: 0.2,
            min_plausible_speed_kmh: 0.5,
            max_plausible_speed_kmh: 6.0,
            report_top_n: 20,
            workers: 4,
            place_search: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &FsPath) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text).map_err(|e| {
            PipelineError::config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Options for the gap repairer derived from this configuration.
    pub fn repair_options(&self) -> RepairOptions {
        RepairOptions {
            strategy: self.repair_strategy,
            splice_tolerance_m: self.splice_tolerance_m,
            interpolation_step_m: self.interpolation_step_m,
            join_tolerance_m: self.gap.minor,
        }
    }

    /// Reject configurations that would silently corrupt every classification.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("min_point_separation_m", self.min_point_separation_m),
            ("gap.minor", self.gap.minor),
            ("gap.major", self.gap.major),
            ("gap.critical", self.gap.critical),
            ("splice_tolerance_m", self.splice_tolerance_m),
            ("interpolation_step_m", self.interpolation_step_m),
            ("circular_threshold_m", self.circular_threshold_m),
            ("road_radius_m", self.road_radius_m),
            ("speeds.beginner", self.speeds.beginner),
            ("speeds.intermediate", self.speeds.intermediate),
            ("speeds.advanced", self.speeds.advanced),
            ("speeds.expert", self.speeds.expert),
            ("max_plausible_speed_kmh", self.max_plausible_speed_kmh),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(PipelineError::config(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }

        if !self.low_altitude_m.is_finite() {
            return Err(PipelineError::config("low_altitude_m must be finite"));
        }

        if !(self.gap.minor < self.gap.major && self.gap.major < self.gap.critical) {
            return Err(PipelineError::config(format!(
                "gap thresholds must increase: minor {} < major {} < critical {}",
                self.gap.minor, self.gap.major, self.gap.critical
            )));
        }

        if self.min_point_separation_m >= self.gap.minor {
            return Err(PipelineError::config(
                "min_point_separation_m must be below gap.minor",
            ));
        }

        if self.splice_tolerance_m > self.gap.minor {
            return Err(PipelineError::config(
                "splice_tolerance_m must not exceed gap.minor",
            ));
        }

        if self.circular_threshold_m > self.gap.minor {
            return Err(PipelineError::config(
                "circular_threshold_m must not exceed gap.minor",
            ));
        }

        if self.interpolation_step_m >= self.gap.minor {
            return Err(PipelineError::config(
                "interpolation_step_m must be below gap.minor",
            ));
        }

        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.partial_overlap)
            || !in_unit(self.roundtrip_overlap)
            || self.partial_overlap > self.roundtrip_overlap
        {
            return Err(PipelineError::config(format!(
                "overlap thresholds must satisfy 0 <= partial ({}) <= roundtrip ({}) <= 1",
                self.partial_overlap, self.roundtrip_overlap
            )));
        }

        if self.road_access_categories.is_empty() {
            return Err(PipelineError::config(
                "road_access_categories must not be empty",
            ));
        }

        // Unknown names deserialize to Other
        if self.road_access_categories.contains(&WaypointCategory::Other) {
            return Err(PipelineError::config(
                "road_access_categories contains an unknown category",
            ));
        }

        if !self.min_plausible_speed_kmh.is_finite()
            || self.min_plausible_speed_kmh < 0.0
            || self.min_plausible_speed_kmh >= self.max_plausible_speed_kmh
        {
            return Err(PipelineError::config(
                "plausible speed range must satisfy 0 <= min < max",
            ));
        }

        if !self.distance_discrepancy_ratio.is_finite() || self.distance_discrepancy_ratio <= 0.0 {
            return Err(PipelineError::config(
                "distance_discrepancy_ratio must be positive",
            ));
        }

        if self.workers == 0 {
            return Err(PipelineError::config("workers must be at least 1"));
        }

        if let Some(search) = &self.place_search {
            if search.base_url.is_empty() {
                return Err(PipelineError::config("place_search.base_url is empty"));
            }
            if search.parking_code.is_empty() || search.transit_code.is_empty() {
                return Err(PipelineError::config(
                    "place_search category codes must not be empty",
                ));
            }
            if search.timeout_ms == 0 {
                return Err(PipelineError::config("place_search.timeout_ms must be positive"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"road_radius_m": 300.0, "gap": {"minor": 80.0}}"#).unwrap();
        assert_eq!(config.road_radius_m, 300.0);
        assert_eq!(config.gap.minor, 80.0);
        assert_eq!(config.gap.critical, 500.0);
        assert_eq!(config.low_altitude_m, 200.0);
        // splice tolerance 100 > minor 80
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unordered_gap_tiers() {
        let mut config = PipelineConfig::default();
        config.gap.major = 600.0;
        assert!(matches!(config.validate(), Err(PipelineError::Config { .. })));
    }

    #[test]
    fn test_rejects_empty_road_categories() {
        let config = PipelineConfig {
            road_access_categories: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_nan_threshold() {
        let config = PipelineConfig {
            circular_threshold_m: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_circular_threshold_above_minor_gap() {
        let config = PipelineConfig {
            circular_threshold_m: 150.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config { .. })));

        let config = PipelineConfig {
            circular_threshold_m: 100.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_overlap_order() {
        let config = PipelineConfig {
            partial_overlap: 0.9,
            roundtrip_overlap: 0.8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_category_json() {
        let parsed: std::result::Result<PipelineConfig, _> =
            serde_json::from_str(r#"{"road_access_categories": "parking"}"#);
        assert!(parsed.is_err());

        let config: PipelineConfig =
            serde_json::from_str(r#"{"road_access_categories": ["parking", "ferry"]}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_speed_lookup() {
        let speeds = SpeedTable::default();
        assert_eq!(speeds.speed_kmh(Difficulty::Beginner), 2.5);
        assert_eq!(speeds.speed_kmh(Difficulty::Expert), 1.2);
    }
}
