//! # Trail Pipeline
//!
//! Batch processing of recorded hiking-trail GPS tracks into clean, classified,
//! metrically-consistent trail records.
//!
//! This library provides:
//! - Point cleaning and gap detection with severity tiers
//! - Gap repair by round-trip splicing or linear interpolation
//! - Topology classification (round trip, circular, one-way)
//! - Endpoint road-proximity resolution from waypoints and remote place search
//! - Direction normalization and metrics recomputation
//! - A batch orchestrator over a SQLite trail store with an aggregate report
//!
//! ## Features
//!
//! - **`parallel`** - Process trails on a rayon worker pool
//! - **`http`** - Enable the HTTP place-search fallback
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trail_pipeline::{TrackPoint, PipelineConfig, detect_gaps, repair_gaps};
//!
//! let path = vec![
//!     TrackPoint::new(37.5000, 127.0000),
//!     TrackPoint::new(37.5030, 127.0000), // ~333m jump
//! ];
//!
//! let config = PipelineConfig::default();
//! let gaps = detect_gaps(&path, &config.gap);
//! assert_eq!(gaps.len(), 1);
//!
//! let repaired = repair_gaps(&path, &config.repair_options());
//! assert!(detect_gaps(&repaired.path, &config.gap).is_empty());
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, PipelineError, Result};

// Configuration with documented defaults
pub mod config;
pub use config::{GapThresholds, PipelineConfig, PlaceSearchConfig, SpeedTable};

// Geographic utilities (distance, path length, interpolation)
pub mod geo_utils;
pub use geo_utils::{haversine_distance, path_length};

// Point stream cleaning
pub mod cleaning;
pub use cleaning::clean_points;

// Gap detection and repair
pub mod gaps;
pub use gaps::{
    detect_gaps, repair_gaps, Gap, GapSeverity, GapSummary, RepairOptions, RepairReport,
    RepairStrategy, RepairedPath,
};

// Endpoint road-proximity resolution
pub mod proximity;
pub use proximity::{
    NoPlaceSearch, PlaceKind, PlaceMatch, PlaceSearch, ProximityResult, ProximitySource,
    RoadProximityResolver,
};

// HTTP place search backend
#[cfg(feature = "http")]
pub mod place_search;
#[cfg(feature = "http")]
pub use place_search::HttpPlaceSearch;

// Topology classification
pub mod topology;
pub use topology::{overlap_rate, quantize, Classified, TopologyClassifier};

// Direction normalization
pub mod normalize;
pub use normalize::{normalize_direction, Rotation};

// Metrics recomputation
pub mod metrics;
pub use metrics::{compute_metrics, TrailMetrics};

// SQLite trail store
pub mod store;
pub use store::{StoreStats, TrailStore};

// Batch orchestration and reporting
pub mod pipeline;
pub use pipeline::{BatchOptions, Pipeline, ProcessedTrail, TrailOutcome};

pub mod report;
pub use report::{BatchReport, Outlier, OutlierKind};

// ============================================================================
// Core Types
// ============================================================================

/// A recorded GPS fix with optional altitude and timestamp.
///
/// # Example
/// ```
/// use trail_pipeline::TrackPoint;
/// let point = TrackPoint::new(37.6586, 126.9780).with_altitude(836.0);
/// assert_eq!(point.altitude, Some(836.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Unix timestamp (seconds since epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl TrackPoint {
    /// Create a new point without altitude or timestamp.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            timestamp: None,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Ordered sequence of track points.
pub type Path = Vec<TrackPoint>;

/// Kind of place a waypoint marks.
///
/// `Entry`, `Parking` and `Transit` are the road-access kinds used for
/// endpoint classification by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointCategory {
    Entry,
    Parking,
    Transit,
    Summit,
    Shelter,
    Water,
    Viewpoint,
    #[serde(other)]
    Other,
}

impl WaypointCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaypointCategory::Entry => "entry",
            WaypointCategory::Parking => "parking",
            WaypointCategory::Transit => "transit",
            WaypointCategory::Summit => "summit",
            WaypointCategory::Shelter => "shelter",
            WaypointCategory::Water => "water",
            WaypointCategory::Viewpoint => "viewpoint",
            WaypointCategory::Other => "other",
        }
    }

    /// Parse a stored category name. Unknown names map to `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" | "trailhead" => WaypointCategory::Entry,
            "parking" => WaypointCategory::Parking,
            "transit" | "bus" | "subway" | "station" => WaypointCategory::Transit,
            "summit" | "peak" => WaypointCategory::Summit,
            "shelter" => WaypointCategory::Shelter,
            "water" | "spring" => WaypointCategory::Water,
            "viewpoint" => WaypointCategory::Viewpoint,
            _ => WaypointCategory::Other,
        }
    }
}

/// A named reference point along a trail. Read-only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
    pub category: WaypointCategory,
}

impl Waypoint {
    pub fn new(latitude: f64, longitude: f64, name: &str, category: WaypointCategory) -> Self {
        Self {
            latitude,
            longitude,
            name: name.to_string(),
            category,
        }
    }

    pub fn point(&self) -> TrackPoint {
        TrackPoint::new(self.latitude, self.longitude)
    }
}

/// Canonical trail topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrailType {
    Roundtrip,
    CircularPartial,
    CircularUnique,
    OnewayPartial,
    OnewayUnique,
}

impl TrailType {
    pub const ALL: [TrailType; 5] = [
        TrailType::Roundtrip,
        TrailType::CircularPartial,
        TrailType::CircularUnique,
        TrailType::OnewayPartial,
        TrailType::OnewayUnique,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrailType::Roundtrip => "ROUNDTRIP",
            TrailType::CircularPartial => "CIRCULAR_PARTIAL",
            TrailType::CircularUnique => "CIRCULAR_UNIQUE",
            TrailType::OnewayPartial => "ONEWAY_PARTIAL",
            TrailType::OnewayUnique => "ONEWAY_UNIQUE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        TrailType::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Whether the path starts and ends at the same place.
    pub fn is_circular(&self) -> bool {
        matches!(
            self,
            TrailType::Roundtrip | TrailType::CircularPartial | TrailType::CircularUnique
        )
    }
}

impl std::fmt::Display for TrailType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of topology classification for one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailClassification {
    pub trail_type: TrailType,
    /// Fraction of points sharing a quantized coordinate with another point (0-1)
    pub overlap_rate: f64,
    /// Distance between first and last point in meters
    pub start_end_distance: f64,
    /// Endpoint road access. `None` when not resolved (circular paths).
    pub endpoint_near_road: Option<bool>,
}

/// Hiking difficulty, drives the duration estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
            Difficulty::Expert => "expert",
        }
    }

    /// Parse a difficulty label from source data.
    ///
    /// Unknown labels fall back to `Intermediate`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" | "easy" => Difficulty::Beginner,
            "intermediate" | "normal" | "medium" | "moderate" => Difficulty::Intermediate,
            "advanced" | "hard" => Difficulty::Advanced,
            "expert" | "very_hard" | "extreme" => Difficulty::Expert,
            other => {
                log::warn!("Unknown difficulty '{}', using intermediate", other);
                Difficulty::Intermediate
            }
        }
    }
}

/// Point as stored in the `path_coordinates` column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredCoordinate {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl From<&TrackPoint> for StoredCoordinate {
    fn from(p: &TrackPoint) -> Self {
        Self {
            lat: p.latitude,
            lng: p.longitude,
            altitude: p.altitude,
        }
    }
}

impl From<&StoredCoordinate> for TrackPoint {
    fn from(c: &StoredCoordinate) -> Self {
        Self {
            latitude: c.lat,
            longitude: c.lng,
            altitude: c.altitude,
            timestamp: None,
        }
    }
}

/// Persisted trail record read by the web front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailRecord {
    pub id: String,
    pub name: String,
    pub mountain: String,
    pub region: String,
    pub difficulty: Difficulty,
    /// Distance in kilometers, 2 decimals
    pub distance_km: f64,
    /// Estimated duration in minutes
    pub duration_min: u32,
    pub min_altitude: Option<i32>,
    pub max_altitude: Option<i32>,
    pub avg_altitude: Option<i32>,
    pub elevation_gain: Option<i32>,
    pub path_coordinates: Path,
    pub trail_type: Option<TrailType>,
    pub overlap_rate: Option<f64>,
    /// Elapsed seconds between the first and last recorded fix, when timestamped
    pub recorded_seconds: Option<i64>,
    /// Length of the imported recording in meters, kept alongside
    /// `recorded_seconds`. Later repairs do not change it.
    pub recorded_distance_m: Option<f64>,
}

impl TrailRecord {
    pub fn start_point(&self) -> Option<&TrackPoint> {
        self.path_coordinates.first()
    }
}

/// Parsed trail handed over by the GPX-parsing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailSource {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mountain: String,
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    pub points: Vec<TrackPoint>,
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,
}

fn default_difficulty() -> String {
    Difficulty::Intermediate.as_str().to_string()
}

// ============================================================================
// Tests
// ============================================================================
