//! Trail topology classification.
//!
//! Combines three signals:
//! 1. Start/end distance (circular vs one-way)
//! 2. Overlap rate (how much of the path is walked twice)
//! 3. Endpoint road access (one-way trails must end somewhere reachable)
//!
//! A one-way path whose end has no road access cannot be a real one-way hike:
//! the hiker walked back out. It is turned into an explicit round trip by
//! appending its reverse.

use std::collections::HashMap;

use crate::config::PipelineConfig;
use crate::error::{OptionExt, Result};
use crate::geo_utils::haversine_distance;
use crate::proximity::{ProximityResult, RoadProximityResolver};
use crate::{TrackPoint, TrailClassification, TrailType, Waypoint};

/// Quantization key for "same physical point".
///
/// Coordinates formatted to 5 decimals (~1m). This is a deliberate
/// approximation step, not float equality: points recorded on two passes of
/// the same spot collapse to the same key only when they agree to ~1m.
pub fn quantize(p: &TrackPoint) -> String {
    format!("{:.5},{:.5}", p.latitude, p.longitude)
}

/// Fraction of points whose quantized coordinate occurs at least twice.
pub fn overlap_rate(points: &[TrackPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }

    let keys: Vec<String> = points.iter().map(quantize).collect();
    let mut counts: HashMap<&str, u32> = HashMap::with_capacity(keys.len());
    for key in &keys {
        *counts.entry(key.as_str()).or_insert(0) += 1;
    }

    let repeated = keys.iter().filter(|k| counts[k.as_str()] >= 2).count();
    repeated as f64 / points.len() as f64
}

/// `path` followed by its reverse, without repeating the turnaround point.
pub fn synthesize_round_trip(path: &[TrackPoint]) -> Vec<TrackPoint> {
    let mut out = Vec::with_capacity(path.len() * 2);
    out.extend_from_slice(path);
    if path.len() >= 2 {
        out.extend(path[..path.len() - 1].iter().rev().map(|p| TrackPoint {
            timestamp: None,
            ..*p
        }));
    }
    out
}

/// Classification plus the path it describes.
#[derive(Debug, Clone)]
pub struct Classified {
    pub classification: TrailClassification,
    /// Input path, or the synthesized round trip
    pub path: Vec<TrackPoint>,
    pub synthesized: bool,
    /// Endpoint resolution, when one was needed
    pub proximity: Option<ProximityResult>,
}

#[derive(Clone)]
pub struct TopologyClassifier {
    circular_threshold_m: f64,
    roundtrip_overlap: f64,
    partial_overlap: f64,
    resolver: RoadProximityResolver,
}

impl TopologyClassifier {
    pub fn new(config: &PipelineConfig, resolver: RoadProximityResolver) -> Self {
        Self {
            circular_threshold_m: config.circular_threshold_m,
            roundtrip_overlap: config.roundtrip_overlap,
            partial_overlap: config.partial_overlap,
            resolver,
        }
    }

    /// Classify `path`. Always computed from scratch; nothing is cached.
    pub fn classify(
        &self,
        trail_id: &str,
        path: &[TrackPoint],
        waypoints: &[Waypoint],
    ) -> Result<Classified> {
        let (first, last) = path
            .first()
            .zip(path.last())
            .filter(|_| path.len() >= 2)
            .ok_or_insufficient_points(trail_id, path.len(), 2)?;

        let start_end_distance = haversine_distance(first, last);
        let overlap = overlap_rate(path);

        if start_end_distance < self.circular_threshold_m {
            let trail_type = if overlap >= self.roundtrip_overlap {
                TrailType::Roundtrip
            } else if overlap >= self.partial_overlap {
                TrailType::CircularPartial
            } else {
                TrailType::CircularUnique
            };
            return Ok(Classified {
                classification: TrailClassification {
                    trail_type,
                    overlap_rate: overlap,
                    start_end_distance,
                    endpoint_near_road: None,
                },
                path: path.to_vec(),
                synthesized: false,
                proximity: None,
            });
        }

        let proximity = self.resolver.resolve(last, waypoints);

        if proximity.near_road {
            let trail_type = if overlap >= self.partial_overlap {
                TrailType::OnewayPartial
            } else {
                TrailType::OnewayUnique
            };
            return Ok(Classified {
                classification: TrailClassification {
                    trail_type,
                    overlap_rate: overlap,
                    start_end_distance,
                    endpoint_near_road: Some(true),
                },
                path: path.to_vec(),
                synthesized: false,
                proximity: Some(proximity),
            });
        }

        log::debug!(
            "[Topology] '{}' ends {:.0}m from start with no road access, synthesizing round trip",
            trail_id,
            start_end_distance
        );

        let round_trip = synthesize_round_trip(path);
        let start_end_distance = match (round_trip.first(), round_trip.last()) {
            (Some(a), Some(b)) => haversine_distance(a, b),
            _ => 0.0,
        };

        Ok(Classified {
            classification: TrailClassification {
                trail_type: TrailType::Roundtrip,
                overlap_rate: overlap_rate(&round_trip),
                start_end_distance,
                endpoint_near_road: Some(false),
            },
            path: round_trip,
            synthesized: true,
            proximity: Some(proximity),
        })
    }
}
