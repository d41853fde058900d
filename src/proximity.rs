//! Endpoint road-proximity resolution.
//!
//! Decides whether a trail endpoint is near road access (a trailhead, parking
//! or public transit). Local waypoints are checked first; a remote
//! [`PlaceSearch`] is consulted only when no waypoint qualifies. Remote faults
//! count as "no match".

use std::sync::Arc;

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geo_utils::{haversine_distance, meters_to_degrees};
use crate::{TrackPoint, Waypoint, WaypointCategory};

/// Place category queried remotely, in query order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceKind {
    Parking,
    Transit,
}

impl PlaceKind {
    pub const QUERY_ORDER: [PlaceKind; 2] = [PlaceKind::Parking, PlaceKind::Transit];
}

/// Nearest remote match for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceMatch {
    pub name: String,
    pub distance_m: f64,
    pub kind: PlaceKind,
}

/// Remote search for places of a kind around a point.
///
/// Implementations own their rate limiting and timeouts.
pub trait PlaceSearch: Send + Sync {
    fn search_nearby(
        &self,
        kind: PlaceKind,
        point: &TrackPoint,
        radius_m: f64,
    ) -> Result<Option<PlaceMatch>>;
}

/// Place search that never matches. Used when no remote search is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlaceSearch;

impl PlaceSearch for NoPlaceSearch {
    fn search_nearby(&self, _: PlaceKind, _: &TrackPoint, _: f64) -> Result<Option<PlaceMatch>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximitySource {
    Waypoint,
    PlaceSearch,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityResult {
    pub near_road: bool,
    pub source: ProximitySource,
    /// Name of the matching waypoint or place
    pub name: Option<String>,
    pub distance_m: Option<f64>,
}

impl ProximityResult {
    fn not_found() -> Self {
        Self {
            near_road: false,
            source: ProximitySource::NotFound,
            name: None,
            distance_m: None,
        }
    }
}

/// Waypoint wrapper for R-tree indexing.
struct WaypointEntry<'a> {
    waypoint: &'a Waypoint,
}

impl RTreeObject for WaypointEntry<'_> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.waypoint.longitude, self.waypoint.latitude])
    }
}

/// Resolves road access near a point from waypoints, then remote search.
#[derive(Clone)]
pub struct RoadProximityResolver {
    radius_m: f64,
    road_categories: Vec<WaypointCategory>,
    search: Arc<dyn PlaceSearch>,
}

impl RoadProximityResolver {
    /// Resolver using waypoints only.
    pub fn new(radius_m: f64, road_categories: Vec<WaypointCategory>) -> Self {
        Self {
            radius_m,
            road_categories,
            search: Arc::new(NoPlaceSearch),
        }
    }

    /// Add a remote place search fallback.
    pub fn with_place_search(mut self, search: Arc<dyn PlaceSearch>) -> Self {
        self.search = search;
        self
    }

    /// Resolve road access around `point`.
    pub fn resolve(&self, point: &TrackPoint, waypoints: &[Waypoint]) -> ProximityResult {
        if let Some((waypoint, distance)) = self.nearest_road_waypoint(point, waypoints) {
            log::debug!(
                "[Proximity] Waypoint '{}' ({}) at {:.0}m",
                waypoint.name,
                waypoint.category.as_str(),
                distance
            );
            return ProximityResult {
                near_road: true,
                source: ProximitySource::Waypoint,
                name: Some(waypoint.name.clone()),
                distance_m: Some(distance),
            };
        }

        for kind in PlaceKind::QUERY_ORDER {
            match self.search.search_nearby(kind, point, self.radius_m) {
                Ok(Some(place)) if place.distance_m <= self.radius_m => {
                    log::debug!(
                        "[Proximity] Place '{}' ({:?}) at {:.0}m",
                        place.name,
                        kind,
                        place.distance_m
                    );
                    return ProximityResult {
                        near_road: true,
                        source: ProximitySource::PlaceSearch,
                        name: Some(place.name),
                        distance_m: Some(place.distance_m),
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("[Proximity] {:?} search failed, treating as no match: {}", kind, e);
                }
            }
        }

        ProximityResult::not_found()
    }

    /// Nearest road-access waypoint within the radius.
    fn nearest_road_waypoint<'a>(
        &self,
        point: &TrackPoint,
        waypoints: &'a [Waypoint],
    ) -> Option<(&'a Waypoint, f64)> {
        let entries: Vec<WaypointEntry<'a>> = waypoints
            .iter()
            .filter(|w| self.road_categories.contains(&w.category))
            .map(|waypoint| WaypointEntry { waypoint })
            .collect();
        if entries.is_empty() {
            return None;
        }

        let index = RTree::bulk_load(entries);
        let (d_lat, d_lng) = meters_to_degrees(self.radius_m, point.latitude);
        let envelope = AABB::from_corners(
            [point.longitude - d_lng, point.latitude - d_lat],
            [point.longitude + d_lng, point.latitude + d_lat],
        );

        index
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| (entry.waypoint, haversine_distance(point, &entry.waypoint.point())))
            .filter(|(_, d)| *d <= self.radius_m)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}
