use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::{StoreError, TrackingStore};
use crate::analyzers::types::{CleanedSegment, CoverageReport, GroupStatsRow, RouteCoverage};
use crate::model::{Segment, StoredSegment, VehicleTrackingState};
use crate::normalize::parse_timestamp;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS segments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    route_id TEXT,
    direction_id TEXT,
    vehicle_ref TEXT,
    trip_id TEXT,
    from_stop_id TEXT NOT NULL,
    to_stop_id TEXT NOT NULL,
    depart_time_utc TEXT NOT NULL,
    arrive_time_utc TEXT NOT NULL,
    travel_time_seconds INTEGER NOT NULL,
    recorded_at_utc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vehicle_state (
    vehicle_ref TEXT PRIMARY KEY,
    route_id TEXT,
    direction_id TEXT,
    trip_id TEXT,
    current_stop_id TEXT,
    current_stop_first_seen_utc TEXT
);

CREATE TABLE IF NOT EXISTS segments_clean (
    id INTEGER PRIMARY KEY,
    route_id TEXT,
    direction_id TEXT,
    vehicle_ref TEXT,
    trip_id TEXT,
    from_stop_id TEXT NOT NULL,
    to_stop_id TEXT NOT NULL,
    depart_time_utc TEXT NOT NULL,
    arrive_time_utc TEXT NOT NULL,
    travel_time_seconds INTEGER NOT NULL,
    day_of_week INTEGER NOT NULL,
    hour_of_day INTEGER NOT NULL,
    time_bucket TEXT NOT NULL,
    is_outlier INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS segment_stats (
    route_id TEXT,
    direction_id TEXT,
    from_stop_id TEXT,
    to_stop_id TEXT,
    day_of_week INTEGER,
    hour_of_day INTEGER,
    time_bucket TEXT,
    sample_count INTEGER NOT NULL,
    median_seconds REAL,
    mad_seconds REAL,
    p10_seconds REAL,
    p90_seconds REAL,
    PRIMARY KEY (route_id, direction_id, from_stop_id, to_stop_id, day_of_week, hour_of_day)
);
";

/// Formats an instant the way every timestamp column stores it.
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn instant(raw: &str, column: &str, id: i64) -> Result<DateTime<Utc>, StoreError> {
    parse_timestamp(raw)
        .ok_or_else(|| StoreError::Timestamp(format!("{column} {raw:?} in row {id}")))
}

/// Columns shared by `segments` and `segments_clean`, timestamps still as text.
struct SegmentRow {
    id: i64,
    route_id: String,
    direction_id: String,
    vehicle_id: String,
    trip_id: String,
    from_stop_id: String,
    to_stop_id: String,
    depart: String,
    arrive: String,
    travel_time_seconds: i64,
    recorded: String,
}

/// SQLite-backed segment store.
///
/// Opened in WAL mode so readers of the cleaned tables never observe a
/// half-written cleaning run.
pub struct SegmentStore {
    conn: Connection,
}

impl SegmentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn segment_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM segments", [], |row| row.get(0))?)
    }

    /// Reads every raw segment in id order.
    pub fn load_segments(&self) -> Result<Vec<StoredSegment>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, COALESCE(route_id, ''), COALESCE(direction_id, ''),
                    COALESCE(vehicle_ref, ''), COALESCE(trip_id, ''),
                    from_stop_id, to_stop_id, depart_time_utc, arrive_time_utc,
                    travel_time_seconds, recorded_at_utc
             FROM segments
             ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(SegmentRow {
                id: row.get(0)?,
                route_id: row.get(1)?,
                direction_id: row.get(2)?,
                vehicle_id: row.get(3)?,
                trip_id: row.get(4)?,
                from_stop_id: row.get(5)?,
                to_stop_id: row.get(6)?,
                depart: row.get(7)?,
                arrive: row.get(8)?,
                travel_time_seconds: row.get(9)?,
                recorded: row.get(10)?,
            })
        })?;

        let mut segments = Vec::new();
        for row in rows {
            let row = row?;
            let id = row.id;
            segments.push(StoredSegment {
                id,
                segment: Segment {
                    depart_at: instant(&row.depart, "depart_time_utc", id)?,
                    arrive_at: instant(&row.arrive, "arrive_time_utc", id)?,
                    recorded_at: instant(&row.recorded, "recorded_at_utc", id)?,
                    route_id: row.route_id,
                    direction_id: row.direction_id,
                    vehicle_id: row.vehicle_id,
                    trip_id: row.trip_id,
                    from_stop_id: row.from_stop_id,
                    to_stop_id: row.to_stop_id,
                    travel_time_seconds: row.travel_time_seconds,
                },
            });
        }

        Ok(segments)
    }

    /// Replaces `segment_stats` and `segments_clean` in one transaction.
    pub fn replace_aggregates(
        &mut self,
        stats: &[GroupStatsRow],
        cleaned: &[CleanedSegment],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM segment_stats", [])?;
        tx.execute("DELETE FROM segments_clean", [])?;

        {
            let mut insert_stats = tx.prepare(
                "INSERT INTO segment_stats (
                    route_id, direction_id, from_stop_id, to_stop_id, day_of_week, hour_of_day,
                    time_bucket, sample_count, median_seconds, mad_seconds, p10_seconds, p90_seconds
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for row in stats {
                insert_stats.execute(params![
                    row.route_id,
                    row.direction_id,
                    row.from_stop_id,
                    row.to_stop_id,
                    row.day_of_week,
                    row.hour_of_day,
                    row.time_bucket,
                    row.sample_count,
                    row.median_seconds,
                    row.mad_seconds,
                    row.p10_seconds,
                    row.p90_seconds,
                ])?;
            }

            let mut insert_clean = tx.prepare(
                "INSERT INTO segments_clean (
                    id, route_id, direction_id, vehicle_ref, trip_id, from_stop_id, to_stop_id,
                    depart_time_utc, arrive_time_utc, travel_time_seconds,
                    day_of_week, hour_of_day, time_bucket, is_outlier
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for seg in cleaned {
                insert_clean.execute(params![
                    seg.id,
                    seg.route_id,
                    seg.direction_id,
                    seg.vehicle_id,
                    seg.trip_id,
                    seg.from_stop_id,
                    seg.to_stop_id,
                    format_instant(seg.depart_at),
                    format_instant(seg.arrive_at),
                    seg.travel_time_seconds,
                    seg.day_of_week,
                    seg.hour_of_day,
                    seg.time_bucket,
                    seg.is_outlier,
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            stats = stats.len(),
            cleaned = cleaned.len(),
            "Aggregate tables replaced"
        );
        Ok(())
    }

    /// Reads `segment_stats` ordered by key.
    pub fn load_group_stats(&self) -> Result<Vec<GroupStatsRow>, StoreError> {
        self.query_stats(
            "SELECT route_id, direction_id, from_stop_id, to_stop_id, day_of_week, hour_of_day,
                    time_bucket, sample_count, median_seconds, mad_seconds, p10_seconds, p90_seconds
             FROM segment_stats
             ORDER BY route_id, direction_id, from_stop_id, to_stop_id, day_of_week, hour_of_day",
            params![],
        )
    }

    fn query_stats(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<GroupStatsRow>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok(GroupStatsRow {
                route_id: row.get(0)?,
                direction_id: row.get(1)?,
                from_stop_id: row.get(2)?,
                to_stop_id: row.get(3)?,
                day_of_week: row.get(4)?,
                hour_of_day: row.get(5)?,
                time_bucket: row.get(6)?,
                sample_count: row.get(7)?,
                median_seconds: row.get(8)?,
                mad_seconds: row.get(9)?,
                p10_seconds: row.get(10)?,
                p90_seconds: row.get(11)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Reads `segments_clean` in raw-segment id order.
    pub fn load_cleaned(&self) -> Result<Vec<CleanedSegment>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, route_id, direction_id, vehicle_ref, trip_id, from_stop_id, to_stop_id,
                    depart_time_utc, arrive_time_utc, travel_time_seconds,
                    day_of_week, hour_of_day, time_bucket, is_outlier
             FROM segments_clean
             ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            let seg = SegmentRow {
                id: row.get(0)?,
                route_id: row.get(1)?,
                direction_id: row.get(2)?,
                vehicle_id: row.get(3)?,
                trip_id: row.get(4)?,
                from_stop_id: row.get(5)?,
                to_stop_id: row.get(6)?,
                depart: row.get(7)?,
                arrive: row.get(8)?,
                travel_time_seconds: row.get(9)?,
                recorded: String::new(),
            };
            let day_of_week: u8 = row.get(10)?;
            let hour_of_day: u8 = row.get(11)?;
            let time_bucket: String = row.get(12)?;
            let is_outlier: bool = row.get(13)?;
            Ok((seg, day_of_week, hour_of_day, time_bucket, is_outlier))
        })?;

        let mut cleaned = Vec::new();
        for row in rows {
            let (seg, day_of_week, hour_of_day, time_bucket, is_outlier) = row?;
            cleaned.push(CleanedSegment {
                id: seg.id,
                depart_at: instant(&seg.depart, "depart_time_utc", seg.id)?,
                arrive_at: instant(&seg.arrive, "arrive_time_utc", seg.id)?,
                route_id: seg.route_id,
                direction_id: seg.direction_id,
                vehicle_id: seg.vehicle_id,
                trip_id: seg.trip_id,
                from_stop_id: seg.from_stop_id,
                to_stop_id: seg.to_stop_id,
                travel_time_seconds: seg.travel_time_seconds,
                day_of_week,
                hour_of_day,
                time_bucket,
                is_outlier,
            });
        }
        Ok(cleaned)
    }

    /// Summarizes the cleaned tables.
    ///
    /// `top_routes` limits the route list; groups with fewer than
    /// `low_sample_threshold` samples are listed, at most `low_limit` of them.
    pub fn coverage_report(
        &self,
        top_routes: usize,
        low_sample_threshold: usize,
        low_limit: usize,
    ) -> Result<CoverageReport, StoreError> {
        let count = |sql: &str| -> Result<usize, StoreError> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };

        let raw_segments = count("SELECT COUNT(*) FROM segments")?;
        let kept_segments = count("SELECT COUNT(*) FROM segments_clean WHERE is_outlier = 0")?;
        let outlier_segments = count("SELECT COUNT(*) FROM segments_clean WHERE is_outlier = 1")?;
        let unique_stop_pairs = count(
            "SELECT COUNT(*) FROM (
                SELECT DISTINCT route_id, direction_id, from_stop_id, to_stop_id
                FROM segments_clean
                WHERE is_outlier = 0
             )",
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT COALESCE(route_id, ''), COUNT(*) AS n
             FROM segments_clean
             WHERE is_outlier = 0
             GROUP BY route_id
             ORDER BY n DESC, route_id
             LIMIT ?1",
        )?;
        let top_routes = stmt
            .query_map(params![top_routes], |row| {
                Ok(RouteCoverage {
                    route_id: row.get(0)?,
                    samples: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let low_coverage = self.query_stats(
            "SELECT route_id, direction_id, from_stop_id, to_stop_id, day_of_week, hour_of_day,
                    time_bucket, sample_count, median_seconds, mad_seconds, p10_seconds, p90_seconds
             FROM segment_stats
             WHERE sample_count < ?1
             ORDER BY sample_count ASC, route_id, direction_id, from_stop_id, to_stop_id,
                      day_of_week, hour_of_day
             LIMIT ?2",
            params![low_sample_threshold, low_limit],
        )?;

        Ok(CoverageReport {
            raw_segments,
            kept_segments,
            outlier_segments,
            top_routes,
            low_coverage,
            unique_stop_pairs,
        })
    }
}

impl TrackingStore for SegmentStore {
    fn load_state(&self, vehicle_id: &str) -> Result<Option<VehicleTrackingState>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT route_id, direction_id, trip_id, current_stop_id, current_stop_first_seen_utc
                 FROM vehicle_state
                 WHERE vehicle_ref = ?1",
                params![vehicle_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(route_id, direction_id, trip_id, stop_id, first_seen)| {
            VehicleTrackingState {
                vehicle_id: vehicle_id.to_string(),
                route_id: route_id.unwrap_or_default(),
                direction_id: direction_id.unwrap_or_default(),
                trip_id: trip_id.unwrap_or_default(),
                current_stop_id: stop_id.unwrap_or_default(),
                current_stop_first_seen_at: first_seen.as_deref().and_then(parse_timestamp),
            }
        }))
    }

    fn commit_transition(
        &mut self,
        state: &VehicleTrackingState,
        segment: Option<&Segment>,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO vehicle_state (
                vehicle_ref, route_id, direction_id, trip_id, current_stop_id,
                current_stop_first_seen_utc
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(vehicle_ref) DO UPDATE SET
                route_id = excluded.route_id,
                direction_id = excluded.direction_id,
                trip_id = excluded.trip_id,
                current_stop_id = excluded.current_stop_id,
                current_stop_first_seen_utc = excluded.current_stop_first_seen_utc",
            params![
                state.vehicle_id,
                state.route_id,
                state.direction_id,
                state.trip_id,
                state.current_stop_id,
                state.current_stop_first_seen_at.map(format_instant),
            ],
        )?;

        if let Some(seg) = segment {
            tx.execute(
                "INSERT INTO segments (
                    route_id, direction_id, vehicle_ref, trip_id, from_stop_id, to_stop_id,
                    depart_time_utc, arrive_time_utc, travel_time_seconds, recorded_at_utc
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    seg.route_id,
                    seg.direction_id,
                    seg.vehicle_id,
                    seg.trip_id,
                    seg.from_stop_id,
                    seg.to_stop_id,
                    format_instant(seg.depart_at),
                    format_instant(seg.arrive_at),
                    seg.travel_time_seconds,
                    format_instant(seg.recorded_at),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_state_round_trips_through_upsert() {
        let mut store = SegmentStore::open_in_memory().unwrap();
        assert!(store.load_state("V1").unwrap().is_none());

        let mut state = tracking_state("V1", "A", 0);
        store.commit_transition(&state, None).unwrap();
        assert_eq!(store.load_state("V1").unwrap(), Some(state.clone()));

        state.current_stop_id = "B".into();
        store.commit_transition(&state, None).unwrap();
        assert_eq!(
            store.load_state("V1").unwrap().unwrap().current_stop_id,
            "B"
        );
        assert_eq!(store.segment_count().unwrap(), 0);
    }

    #[test]
    fn test_unparseable_anchor_loads_as_none() {
        let store = SegmentStore::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO vehicle_state VALUES ('V9', 'M5', '0', 'T', 'A', 'garbage')",
                [],
            )
            .unwrap();
        let state = store.load_state("V9").unwrap().unwrap();
        assert_eq!(state.current_stop_id, "A");
        assert_eq!(state.current_stop_first_seen_at, None);
    }

    #[test]
    fn test_segments_append_with_ids() {
        let mut store = SegmentStore::open_in_memory().unwrap();
        let state = tracking_state("V1", "B", 40);
        store
            .commit_transition(&state, Some(&segment("A", "B", 0, 40)))
            .unwrap();
        store
            .commit_transition(&state, Some(&segment("B", "C", 40, 500)))
            .unwrap();

        let loaded = store.load_segments().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].id < loaded[1].id);
        assert_eq!(loaded[0].segment, segment("A", "B", 0, 40));
        assert_eq!(loaded[1].segment.travel_time_seconds, 460);
    }

    #[test]
    fn test_bad_segment_timestamp_fails_load() {
        let store = SegmentStore::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO segments (from_stop_id, to_stop_id, depart_time_utc,
                    arrive_time_utc, travel_time_seconds, recorded_at_utc)
                 VALUES ('A', 'B', 'bad', 'bad', 30, 'bad')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.load_segments(),
            Err(StoreError::Timestamp(_))
        ));
    }

    #[test]
    fn test_replace_aggregates_supersedes_prior_run() {
        let mut store = SegmentStore::open_in_memory().unwrap();
        let first = vec![stats_row("A", 3), stats_row("B", 7)];
        store.replace_aggregates(&first, &[]).unwrap();
        assert_eq!(store.load_group_stats().unwrap(), first);

        let second = vec![stats_row("C", 1)];
        store.replace_aggregates(&second, &[]).unwrap();
        assert_eq!(store.load_group_stats().unwrap(), second);
    }

    #[test]
    fn test_failed_replace_keeps_prior_run() {
        let mut store = SegmentStore::open_in_memory().unwrap();
        let prior = vec![stats_row("A", 3)];
        let prior_clean = vec![cleaned(1)];
        store.replace_aggregates(&prior, &prior_clean).unwrap();

        // duplicate segments_clean ids violate the primary key on the last insert
        let result = store.replace_aggregates(&[stats_row("B", 4)], &[cleaned(2), cleaned(2)]);
        assert!(matches!(result, Err(StoreError::Sqlite(_))));

        assert_eq!(store.load_group_stats().unwrap(), prior);
        assert_eq!(store.load_cleaned().unwrap(), prior_clean);
    }

    #[test]
    fn test_failed_segment_insert_keeps_prior_state() {
        let mut store = SegmentStore::open_in_memory().unwrap();
        let prior = tracking_state("V1", "A", 0);
        store.commit_transition(&prior, None).unwrap();

        store
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_segments BEFORE INSERT ON segments
                 BEGIN SELECT RAISE(ABORT, 'segments are read-only'); END;",
            )
            .unwrap();

        let next = tracking_state("V1", "B", 45);
        let result = store.commit_transition(&next, Some(&segment("A", "B", 0, 45)));
        assert!(matches!(result, Err(StoreError::Sqlite(_))));

        assert_eq!(store.load_state("V1").unwrap(), Some(prior));
        assert_eq!(store.segment_count().unwrap(), 0);
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 17, 0, 0).unwrap()
    }

    fn tracking_state(vehicle: &str, stop: &str, at: i64) -> VehicleTrackingState {
        VehicleTrackingState {
            vehicle_id: vehicle.into(),
            route_id: "M5".into(),
            direction_id: "0".into(),
            trip_id: "T1".into(),
            current_stop_id: stop.into(),
            current_stop_first_seen_at: Some(base() + chrono::Duration::seconds(at)),
        }
    }

    fn segment(from: &str, to: &str, depart: i64, arrive: i64) -> Segment {
        Segment {
            route_id: "M5".into(),
            direction_id: "0".into(),
            vehicle_id: "V1".into(),
            trip_id: "T1".into(),
            from_stop_id: from.into(),
            to_stop_id: to.into(),
            depart_at: base() + chrono::Duration::seconds(depart),
            arrive_at: base() + chrono::Duration::seconds(arrive),
            travel_time_seconds: arrive - depart,
            recorded_at: base() + chrono::Duration::seconds(arrive),
        }
    }

    fn cleaned(id: i64) -> CleanedSegment {
        let seg = segment("A", "Z", 0, 60);
        CleanedSegment {
            id,
            route_id: seg.route_id,
            direction_id: seg.direction_id,
            vehicle_id: seg.vehicle_id,
            trip_id: seg.trip_id,
            from_stop_id: seg.from_stop_id,
            to_stop_id: seg.to_stop_id,
            depart_at: seg.depart_at,
            arrive_at: seg.arrive_at,
            travel_time_seconds: seg.travel_time_seconds,
            day_of_week: 0,
            hour_of_day: 17,
            time_bucket: "Mon-17".into(),
            is_outlier: false,
        }
    }

    fn stats_row(from: &str, n: usize) -> GroupStatsRow {
        GroupStatsRow {
            route_id: "M5".into(),
            direction_id: "0".into(),
            from_stop_id: from.into(),
            to_stop_id: "Z".into(),
            day_of_week: 0,
            hour_of_day: 17,
            time_bucket: "Mon-17".into(),
            sample_count: n,
            median_seconds: 60.0,
            mad_seconds: 2.5,
            p10_seconds: 50.0,
            p90_seconds: 70.0,
        }
    }
}
