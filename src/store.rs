//! # Trail Store
//!
//! SQLite persistence for trail records and their waypoints.
//!
//! The `trails` table is the contract read by the web front end:
//! `path_coordinates` is a JSON array of `{lat, lng, altitude?}` and every
//! geometry-derived column is rewritten together with it in one transaction.

use log::{debug, info, warn};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path as FsPath;

use crate::cleaning::clean_points;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::geo_utils::path_length;
use crate::metrics::compute_metrics;
use crate::{
    Difficulty, StoredCoordinate, TrackPoint, TrailRecord, TrailSource, TrailType, Waypoint,
    WaypointCategory,
};

const RECORD_COLUMNS: &str = "id, name, mountain, region, difficulty, distance, duration,
     min_altitude, max_altitude, avg_altitude, elevation_gain, path_coordinates,
     trail_type, overlap_rate, recorded_seconds, recorded_distance";

/// SQLite-backed trail store.
pub struct TrailStore {
    db: Connection,
}

impl TrailStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) a store at the given path.
    pub fn new(db_path: impl AsRef<FsPath>) -> Result<Self> {
        let db = Connection::open(db_path.as_ref())?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Trail records read by the web front end
            CREATE TABLE IF NOT EXISTS trails (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                mountain TEXT NOT NULL DEFAULT '',
                region TEXT NOT NULL DEFAULT '',
                difficulty TEXT NOT NULL,
                distance REAL NOT NULL,
                duration INTEGER NOT NULL,
                min_altitude INTEGER,
                max_altitude INTEGER,
                avg_altitude INTEGER,
                elevation_gain INTEGER,
                path_coordinates TEXT NOT NULL,
                start_latitude REAL,
                start_longitude REAL,
                trail_type TEXT,
                overlap_rate REAL,
                recorded_seconds INTEGER,
                recorded_distance REAL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            -- Reference points, read-only for the pipeline
            CREATE TABLE IF NOT EXISTS waypoints (
                trail_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                PRIMARY KEY (trail_id, seq),
                FOREIGN KEY (trail_id) REFERENCES trails(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_trails_type ON trails(trail_type);
            CREATE INDEX IF NOT EXISTS idx_waypoints_trail ON waypoints(trail_id);

            PRAGMA foreign_keys = ON;
        "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Create or replace records from parsed sources.
    ///
    /// The stored path is the cleaned recording; metrics are computed from it
    /// and the classification is left empty for the first pipeline run.
    /// Sources with fewer than two usable points are skipped.
    /// Returns the number of records written.
    pub fn import_sources(
        &mut self,
        sources: &[TrailSource],
        config: &PipelineConfig,
    ) -> Result<usize> {
        let tx = self.db.transaction()?;
        let mut imported = 0;

        for source in sources {
            let points = clean_points(&source.points, config.min_point_separation_m);
            if points.len() < 2 {
                warn!(
                    "[TrailStore] Skipping '{}': {} usable points",
                    source.id,
                    points.len()
                );
                continue;
            }

            let difficulty = Difficulty::parse(&source.difficulty);
            let metrics = compute_metrics(&points, difficulty, &config.speeds);
            let elapsed = recorded_seconds(&source.points);
            let recorded_distance_m = elapsed.map(|_| path_length(&points));
            let record = TrailRecord {
                id: source.id.clone(),
                name: source.name.clone(),
                mountain: source.mountain.clone(),
                region: source.region.clone(),
                difficulty,
                distance_km: metrics.distance_km,
                duration_min: metrics.duration_min,
                min_altitude: metrics.min_altitude,
                max_altitude: metrics.max_altitude,
                avg_altitude: metrics.avg_altitude,
                elevation_gain: metrics.elevation_gain,
                path_coordinates: points,
                trail_type: None,
                overlap_rate: None,
                recorded_seconds: elapsed,
                recorded_distance_m,
            };

            upsert_record(&tx, &record)?;

            tx.execute("DELETE FROM waypoints WHERE trail_id = ?", params![source.id])?;
            let mut stmt = tx.prepare(
                "INSERT INTO waypoints (trail_id, seq, name, category, latitude, longitude)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            for (seq, wp) in source.waypoints.iter().enumerate() {
                stmt.execute(params![
                    &source.id,
                    seq as i64,
                    &wp.name,
                    wp.category.as_str(),
                    wp.latitude,
                    wp.longitude,
                ])?;
            }
            drop(stmt);

            imported += 1;
        }

        tx.commit()?;
        info!(
            "[TrailStore] Imported {} of {} sources",
            imported,
            sources.len()
        );
        Ok(imported)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All trail ids in a stable order.
    pub fn trail_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.db.prepare("SELECT id FROM trails ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Load one record. A row whose geometry cannot be decoded is an error.
    pub fn load_record(&self, id: &str) -> Result<Option<TrailRecord>> {
        let sql = format!("SELECT {} FROM trails WHERE id = ?", RECORD_COLUMNS);
        let record = self
            .db
            .query_row(&sql, params![id], record_from_row)
            .optional()?;
        Ok(record)
    }

    /// Load every record, failing on the first undecodable row.
    pub fn load_records(&self) -> Result<Vec<TrailRecord>> {
        let sql = format!("SELECT {} FROM trails ORDER BY id", RECORD_COLUMNS);
        let mut stmt = self.db.prepare(&sql)?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Waypoints of a trail in import order.
    pub fn waypoints_for(&self, trail_id: &str) -> Result<Vec<Waypoint>> {
        let mut stmt = self.db.prepare(
            "SELECT latitude, longitude, name, category FROM waypoints
             WHERE trail_id = ? ORDER BY seq",
        )?;
        let waypoints = stmt
            .query_map(params![trail_id], |row| {
                let category: String = row.get(3)?;
                Ok(Waypoint {
                    latitude: row.get(0)?,
                    longitude: row.get(1)?,
                    name: row.get(2)?,
                    category: WaypointCategory::parse(&category),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(waypoints)
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Replace geometry, metrics and classification of an existing record.
    ///
    /// All columns are written in one transaction, so a failure leaves the
    /// stored record untouched.
    pub fn update_record(&mut self, record: &TrailRecord) -> Result<()> {
        let path_json = encode_path(&record.path_coordinates)?;
        let start = record.start_point();

        let tx = self.db.transaction()?;
        let changed = tx.execute(
            "UPDATE trails SET
                distance = ?, duration = ?,
                min_altitude = ?, max_altitude = ?, avg_altitude = ?, elevation_gain = ?,
                path_coordinates = ?, start_latitude = ?, start_longitude = ?,
                trail_type = ?, overlap_rate = ?,
                updated_at = strftime('%s', 'now')
             WHERE id = ?",
            params![
                record.distance_km,
                record.duration_min,
                record.min_altitude,
                record.max_altitude,
                record.avg_altitude,
                record.elevation_gain,
                path_json,
                start.map(|p| p.latitude),
                start.map(|p| p.longitude),
                record.trail_type.map(|t| t.as_str()),
                record.overlap_rate,
                &record.id,
            ],
        )?;

        if changed != 1 {
            // Dropping the transaction rolls it back
            return Err(PipelineError::Persistence {
                message: format!("trail '{}' not found", record.id),
            });
        }

        tx.commit()?;
        debug!("[TrailStore] Updated '{}'", record.id);
        Ok(())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<StoreStats> {
        let trail_count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM trails", [], |row| row.get(0))?;
        let classified_count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM trails WHERE trail_type IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        let waypoint_count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM waypoints", [], |row| row.get(0))?;

        Ok(StoreStats {
            trail_count: trail_count as u32,
            classified_count: classified_count as u32,
            waypoint_count: waypoint_count as u32,
        })
    }
}

/// Statistics for the trail store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub trail_count: u32,
    pub classified_count: u32,
    pub waypoint_count: u32,
}

// ============================================================================
// Row encoding
// ============================================================================

fn upsert_record(conn: &Connection, record: &TrailRecord) -> Result<()> {
    let path_json = encode_path(&record.path_coordinates)?;
    let start = record.start_point();

    conn.execute(
        "INSERT OR REPLACE INTO trails
         (id, name, mountain, region, difficulty, distance, duration,
          min_altitude, max_altitude, avg_altitude, elevation_gain,
          path_coordinates, start_latitude, start_longitude,
          trail_type, overlap_rate, recorded_seconds, recorded_distance)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            &record.id,
            &record.name,
            &record.mountain,
            &record.region,
            record.difficulty.as_str(),
            record.distance_km,
            record.duration_min,
            record.min_altitude,
            record.max_altitude,
            record.avg_altitude,
            record.elevation_gain,
            path_json,
            start.map(|p| p.latitude),
            start.map(|p| p.longitude),
            record.trail_type.map(|t| t.as_str()),
            record.overlap_rate,
            record.recorded_seconds,
            record.recorded_distance_m,
        ],
    )?;
    Ok(())
}

fn encode_path(points: &[TrackPoint]) -> Result<String> {
    let coords: Vec<StoredCoordinate> = points.iter().map(StoredCoordinate::from).collect();
    Ok(serde_json::to_string(&coords)?)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TrailRecord> {
    let difficulty: String = row.get(4)?;
    let path_json: String = row.get(11)?;
    let trail_type: Option<String> = row.get(12)?;

    let coords: Vec<StoredCoordinate> = serde_json::from_str(&path_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?;

    Ok(TrailRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        mountain: row.get(2)?,
        region: row.get(3)?,
        difficulty: Difficulty::parse(&difficulty),
        distance_km: row.get(5)?,
        duration_min: row.get(6)?,
        min_altitude: row.get(7)?,
        max_altitude: row.get(8)?,
        avg_altitude: row.get(9)?,
        elevation_gain: row.get(10)?,
        path_coordinates: coords.iter().map(TrackPoint::from).collect(),
        // Unknown names are treated as unclassified
        trail_type: trail_type.as_deref().and_then(TrailType::parse),
        overlap_rate: row.get(13)?,
        recorded_seconds: row.get(14)?,
        recorded_distance_m: row.get(15)?,
    })
}

/// Seconds between the first and last timestamped fix.
fn recorded_seconds(points: &[TrackPoint]) -> Option<i64> {
    let first = points.iter().find_map(|p| p.timestamp)?;
    let last = points.iter().rev().find_map(|p| p.timestamp)?;
    (last > first).then_some(last - first)
}
