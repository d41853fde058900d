//! Trail store integration tests against an on-disk database.

use tempfile::TempDir;
use trail_pipeline::{
    Difficulty, PipelineConfig, TrackPoint, TrailSource, TrailStore, TrailType, Waypoint,
    WaypointCategory,
};

fn setup_store() -> (TrailStore, TempDir) {
    let tmp_dir = TempDir::new().expect("failed to create temp dir");
    let store = TrailStore::new(tmp_dir.path().join("trails.db")).expect("failed to open store");
    (store, tmp_dir)
}

fn source(id: &str, difficulty: &str) -> TrailSource {
    TrailSource {
        id: id.to_string(),
        name: format!("{} course", id),
        mountain: "Gwanaksan".to_string(),
        region: "Seoul".to_string(),
        difficulty: difficulty.to_string(),
        points: (0..30)
            .map(|i| {
                TrackPoint::new(37.44 + i as f64 * 0.0004, 126.96 + i as f64 * 0.0001)
                    .with_altitude(120.0 + i as f64 * 12.5)
                    .with_timestamp(1_690_000_000 + i * 45)
            })
            .collect(),
        waypoints: vec![
            Waypoint::new(37.44, 126.96, "Main gate", WaypointCategory::Entry),
            Waypoint::new(37.4516, 126.9629, "Summit", WaypointCategory::Summit),
        ],
    }
}

#[test]
fn test_records_survive_reopen() {
    let tmp_dir = TempDir::new().unwrap();
    let db_path = tmp_dir.path().join("trails.db");

    {
        let mut store = TrailStore::new(&db_path).unwrap();
        store
            .import_sources(
                &[source("gwanak-1", "easy"), source("gwanak-2", "expert")],
                &PipelineConfig::default(),
            )
            .unwrap();
    }

    let store = TrailStore::new(&db_path).unwrap();
    assert_eq!(
        store.trail_ids().unwrap(),
        vec!["gwanak-1".to_string(), "gwanak-2".to_string()]
    );

    let records = store.load_records().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].difficulty, Difficulty::Beginner);
    assert_eq!(records[1].difficulty, Difficulty::Expert);
    assert_eq!(records[0].min_altitude, Some(120));
    assert_eq!(records[0].max_altitude, Some(483));
    assert_eq!(records[0].recorded_seconds, Some(29 * 45));
    // Same geometry, slower speed class
    assert_eq!(records[0].distance_km, records[1].distance_km);
    assert!(records[1].duration_min > records[0].duration_min);

    let waypoints = store.waypoints_for("gwanak-2").unwrap();
    assert_eq!(waypoints.len(), 2);
    assert_eq!(waypoints[1].name, "Summit");
    assert_eq!(waypoints[1].category, WaypointCategory::Summit);
}

#[test]
fn test_update_replaces_all_geometry_fields() {
    let (mut store, _tmp) = setup_store();
    store
        .import_sources(&[source("a", "normal")], &PipelineConfig::default())
        .unwrap();

    let mut record = store.load_record("a").unwrap().unwrap();
    let mut reversed = record.path_coordinates.clone();
    reversed.reverse();
    record.path_coordinates = reversed;
    record.trail_type = Some(TrailType::CircularPartial);
    record.overlap_rate = Some(0.4375);
    record.elevation_gain = Some(0);
    store.update_record(&record).unwrap();

    let reloaded = store.load_record("a").unwrap().unwrap();
    assert_eq!(reloaded, record);
    assert_eq!(reloaded.start_point().and_then(|p| p.altitude), Some(482.5));
}

#[test]
fn test_corrupt_row_is_an_error_not_a_panic() {
    let (mut store, tmp) = setup_store();
    store
        .import_sources(&[source("a", "hard")], &PipelineConfig::default())
        .unwrap();

    let conn = rusqlite::Connection::open(tmp.path().join("trails.db")).unwrap();
    conn.execute(
        "UPDATE trails SET path_coordinates = 'not json' WHERE id = 'a'",
        [],
    )
    .unwrap();

    assert!(store.load_record("a").is_err());
    assert!(store.load_records().is_err());
    // Ids are still listed
    assert_eq!(store.trail_ids().unwrap().len(), 1);
}

#[test]
fn test_stored_path_json_shape() {
    let (mut store, tmp) = setup_store();
    store
        .import_sources(&[source("a", "hard")], &PipelineConfig::default())
        .unwrap();

    let conn = rusqlite::Connection::open(tmp.path().join("trails.db")).unwrap();
    let (json, start_lat): (String, f64) = conn
        .query_row(
            "SELECT path_coordinates, start_latitude FROM trails WHERE id = 'a'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();

    let coords: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
    assert_eq!(coords.len(), 30);
    assert_eq!(coords[0]["lat"], 37.44);
    assert_eq!(coords[0]["lng"], 126.96);
    assert_eq!(coords[0]["altitude"], 120.0);
    assert!(coords[0].get("timestamp").is_none());
    assert_eq!(start_lat, 37.44);
}
