//! Alert dedup window behavior against a real state file.

use chrono::{Duration, TimeZone, Utc};

use cloudsift::dedup::{AlertStatus, Deduplicator};

#[test]
fn test_s5_matches_ten_minutes_apart_share_an_alert() {
    let dir = tempfile::tempdir().unwrap();
    let dedup = Deduplicator::open(&dir.path().join("state.db")).unwrap();
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let t1 = t0 + Duration::minutes(10);

    let first = dedup
        .update_alert_at("R1", "D", "title", "HIGH", 60, t0)
        .unwrap();
    let second = dedup
        .update_alert_at("R1", "D", "title", "HIGH", 60, t1)
        .unwrap();

    assert_eq!(first.alert_id, second.alert_id);
    assert_eq!(second.status, AlertStatus::Recurring);
    assert_eq!(second.updated_at, t1);
    assert_eq!(dedup.open_alert_count("R1", "D").unwrap(), 1);
}

#[test]
fn test_s6_matches_seventy_minutes_apart_roll_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let dedup = Deduplicator::open(&dir.path().join("state.db")).unwrap();
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let t1 = t0 + Duration::minutes(70);

    let first = dedup
        .update_alert_at("R1", "D", "title", "HIGH", 60, t0)
        .unwrap();
    let second = dedup
        .update_alert_at("R1", "D", "title", "HIGH", 60, t1)
        .unwrap();

    assert_ne!(first.alert_id, second.alert_id);
    assert_eq!(second.status, AlertStatus::New);
    assert_eq!(dedup.open_alert_count("R1", "D").unwrap(), 1);
    assert_eq!(dedup.resolved_alert_count("R1", "D").unwrap(), 1);
}

/// The at-most-one-open invariant holds across restarts and many updates.
#[test]
fn test_at_most_one_open_row_over_many_updates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    for round in 0..10 {
        let dedup = Deduplicator::open(&path).unwrap();
        dedup
            .update_alert_at(
                "R1",
                "D",
                "title",
                "HIGH",
                60,
                t0 + Duration::minutes(round * 25),
            )
            .unwrap();
        assert_eq!(dedup.open_alert_count("R1", "D").unwrap(), 1);
    }
}
