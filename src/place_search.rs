//! HTTP place search for endpoint road proximity.
//!
//! Queries a category-search API (Kakao Local style) for parking lots and
//! transit stations around a point:
//! - One shared rate limiter spaces out request starts across all callers
//! - Per-request timeout
//! - Retry with exponential backoff on 429
//!
//! Every failure is returned as an error; the resolver maps it to "no match".

use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::Mutex;

use crate::config::PlaceSearchConfig;
use crate::error::{PipelineError, Result};
use crate::geo_utils::haversine_distance;
use crate::proximity::{PlaceKind, PlaceMatch, PlaceSearch};
use crate::TrackPoint;

const MAX_RETRIES: u32 = 2;

/// API response for the category search endpoint
#[derive(Debug, Deserialize)]
struct CategorySearchResponse {
    #[serde(default)]
    documents: Vec<PlaceDocument>,
}

#[derive(Debug, Deserialize)]
struct PlaceDocument {
    place_name: String,
    /// Meters from the query point, as a string
    #[serde(default)]
    distance: String,
    /// Longitude
    x: String,
    /// Latitude
    y: String,
}

/// Spaces request starts at least `min_interval` apart.
struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
    consecutive_429s: AtomicU32,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
            consecutive_429s: AtomicU32::new(0),
        }
    }

    /// Reserve the next slot and sleep until it arrives.
    async fn wait_turn(&self) {
        let wait = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |t| t.max(now));
            *next = Some(slot + self.min_interval);
            slot - now
        };

        if !wait.is_zero() {
            debug!("[PlaceSearch] Rate limit: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        // Exponential backoff: 1s, 2s, 4s...
        Duration::from_millis(500 * (1 << count.min(4)))
    }
}

/// Place search over HTTP.
pub struct HttpPlaceSearch {
    client: Client,
    config: PlaceSearchConfig,
    rate_limiter: Arc<RateLimiter>,
    runtime: Runtime,
}

impl HttpPlaceSearch {
    /// Create a client for the configured endpoint.
    pub fn new(config: PlaceSearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;

        Ok(Self {
            client,
            rate_limiter: Arc::new(RateLimiter::new(Duration::from_millis(
                config.request_delay_ms,
            ))),
            config,
            runtime,
        })
    }

    fn category_code(&self, kind: PlaceKind) -> &str {
        match kind {
            PlaceKind::Parking => &self.config.parking_code,
            PlaceKind::Transit => &self.config.transit_code,
        }
    }

    /// Nearest place of `kind` within `radius_m` of `point`.
    pub async fn search_async(
        &self,
        kind: PlaceKind,
        point: &TrackPoint,
        radius_m: f64,
    ) -> Result<Option<PlaceMatch>> {
        let code = self.category_code(kind).to_string();
        let radius = (radius_m.round() as i64).clamp(0, 20_000).to_string();
        let query = [
            ("category_group_code", code),
            ("x", point.longitude.to_string()),
            ("y", point.latitude.to_string()),
            ("radius", radius),
            ("sort", "distance".to_string()),
        ];

        let mut retries = 0;

        loop {
            self.rate_limiter.wait_turn().await;

            let response = self
                .client
                .get(&self.config.base_url)
                .header("Authorization", format!("KakaoAK {}", self.config.api_key))
                .query(&query)
                .send()
                .await
                .map_err(|e| PipelineError::Http {
                    message: format!("Request error: {}", e),
                    status_code: None,
                })?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(PipelineError::Http {
                        message: "Max retries exceeded (429)".to_string(),
                        status_code: Some(status.as_u16()),
                    });
                }
                let backoff = self.rate_limiter.record_429();
                warn!(
                    "[PlaceSearch] 429 for {:?} search, retry {} after {:?}",
                    kind, retries, backoff
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            if !status.is_success() {
                return Err(PipelineError::Http {
                    message: format!("HTTP {}", status),
                    status_code: Some(status.as_u16()),
                });
            }

            self.rate_limiter.record_success();

            let body = response
                .json::<CategorySearchResponse>()
                .await
                .map_err(|e| PipelineError::Http {
                    message: format!("Parse error: {}", e),
                    status_code: Some(status.as_u16()),
                })?;

            return Ok(nearest_place(&body, kind, point, radius_m));
        }
    }
}

impl PlaceSearch for HttpPlaceSearch {
    fn search_nearby(
        &self,
        kind: PlaceKind,
        point: &TrackPoint,
        radius_m: f64,
    ) -> Result<Option<PlaceMatch>> {
        self.runtime.block_on(self.search_async(kind, point, radius_m))
    }
}

/// Pick the closest document within the radius.
///
/// Uses the reported distance when it parses, otherwise measures from the
/// document coordinates. Documents with unusable coordinates are skipped.
fn nearest_place(
    body: &CategorySearchResponse,
    kind: PlaceKind,
    point: &TrackPoint,
    radius_m: f64,
) -> Option<PlaceMatch> {
    body.documents
        .iter()
        .filter_map(|doc| {
            let distance_m = match doc.distance.parse::<f64>() {
                Ok(d) => d,
                Err(_) => {
                    let lat = doc.y.parse::<f64>().ok()?;
                    let lng = doc.x.parse::<f64>().ok()?;
                    haversine_distance(point, &TrackPoint::new(lat, lng))
                }
            };
            Some(PlaceMatch {
                name: doc.place_name.clone(),
                distance_m,
                kind,
            })
        })
        .filter(|m| m.distance_m <= radius_m)
        .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
}
