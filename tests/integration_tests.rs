use chrono::{TimeZone, Utc};
use transit_segments::analyzers::analyzer::{clean, coverage};
use transit_segments::collector::process_payload;
use transit_segments::config::CleanConfig;
use transit_segments::output::write_csv;
use transit_segments::parser::parse_feed;
use transit_segments::store::{SegmentStore, TrackingStore};
use transit_segments::tracker::SegmentTracker;

fn ingest_fixtures(store: &mut SegmentStore) -> Vec<transit_segments::collector::TickSummary> {
    let polls: [&[u8]; 3] = [
        include_bytes!("fixtures/vm_poll_1.json"),
        include_bytes!("fixtures/vm_poll_2.json"),
        include_bytes!("fixtures/vm_poll_3.json"),
    ];
    let tracker = SegmentTracker::default();
    let recorded_at = Utc.with_ymd_and_hms(2024, 3, 4, 17, 5, 0).unwrap();

    polls
        .iter()
        .map(|bytes| {
            let payload = parse_feed(bytes).expect("Failed to parse feed");
            process_payload(&tracker, store, &payload, recorded_at)
        })
        .collect()
}

#[test]
fn test_full_pipeline() {
    let mut store = SegmentStore::open_in_memory().expect("Failed to open store");
    let ticks = ingest_fixtures(&mut store);

    assert_eq!(ticks[0].vehicles_seen, 3);
    assert_eq!(ticks[0].processed, 2);
    assert_eq!(ticks[0].skipped, 1);
    assert_eq!(ticks[1].segments, 1);
    assert_eq!(ticks[1].discarded, 1);
    assert_eq!(ticks[2].segments, 2);

    let segments = store.load_segments().unwrap();
    assert_eq!(segments.len(), 3);

    let first_bus: Vec<_> = segments
        .iter()
        .map(|s| &s.segment)
        .filter(|s| s.vehicle_id == "MTA NYCT_7701")
        .collect();
    assert_eq!(first_bus.len(), 2);
    assert_eq!(first_bus[0].from_stop_id, "MTA_400001");
    assert_eq!(first_bus[0].to_stop_id, "MTA_400002");
    assert_eq!(first_bus[0].travel_time_seconds, 100);
    assert_eq!(first_bus[1].from_stop_id, first_bus[0].to_stop_id);
    assert_eq!(first_bus[1].depart_at, first_bus[0].arrive_at);
    assert_eq!(first_bus[1].travel_time_seconds, 120);

    // 5s hop was discarded, so the next segment departs from the arrival at B
    let second_bus: Vec<_> = segments
        .iter()
        .map(|s| &s.segment)
        .filter(|s| s.vehicle_id == "MTA NYCT_7702")
        .collect();
    assert_eq!(second_bus.len(), 1);
    assert_eq!(second_bus[0].from_stop_id, "MTA_400002");
    assert_eq!(second_bus[0].travel_time_seconds, 215);
    assert_eq!(second_bus[0].route_id, "MTA NYCT_M5");
    assert_eq!(second_bus[0].trip_id, "MTA NYCT_MV_A4-Weekday-102000_M5_2");

    let state = store.load_state("MTA NYCT_7701").unwrap().unwrap();
    assert_eq!(state.current_stop_id, "MTA_400003");
    assert!(store.load_state("MTA NYCT_7703").unwrap().is_none());
}

#[test]
fn test_clean_and_report_after_ingest() {
    let mut store = SegmentStore::open_in_memory().expect("Failed to open store");
    ingest_fixtures(&mut store);

    let summary = clean(&mut store, &CleanConfig::default()).expect("Cleaning failed");
    assert_eq!(summary.raw_segments, 3);
    assert_eq!(summary.within_bounds, 3);
    assert_eq!(summary.groups, 2);
    assert_eq!(summary.outliers, 0);

    let stats = store.load_group_stats().unwrap();
    let b_to_c = stats
        .iter()
        .find(|s| s.from_stop_id == "MTA_400002")
        .expect("missing B->C group");
    assert_eq!(b_to_c.sample_count, 2);
    assert_eq!(b_to_c.median_seconds, 167.5);
    assert_eq!(b_to_c.time_bucket, "Mon-17");

    let report = coverage(&store).unwrap();
    assert_eq!(report.raw_segments, 3);
    assert_eq!(report.kept_segments, 3);
    assert_eq!(report.low_coverage.len(), 2);
    assert_eq!(report.unique_stop_pairs, 2);

    let path = std::env::temp_dir().join("transit_segments_integration_clean.csv");
    let written = write_csv(&path, &store.load_cleaned().unwrap(), false).unwrap();
    assert_eq!(written, 3);
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 4);
    std::fs::remove_file(&path).unwrap();
}
