//! Windowed alert deduplication with crash-safe state.
//!
//! One open row per (rule, dedup-key): repeated matches inside the window
//! collapse onto the open row, a match after the window resolves it and
//! opens a fresh one with a new alert id. The whole read-then-write runs in
//! a single transaction so retries after failure are idempotent.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Fixed namespace for uuid-v5 dedup keys and alert ids; changing it would
/// orphan every open alert in existing state files.
const DEDUP_NAMESPACE: Uuid = Uuid::from_u128(0x8f1c_73a2_95d4_4e0b_a6f0_3bd3_19c2_77e5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    New,
    Recurring,
}

#[derive(Debug, Clone)]
pub struct AlertInfo {
    pub alert_id: String,
    pub rule_id: String,
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub severity: String,
    pub status: AlertStatus,
}

pub struct Deduplicator {
    conn: Mutex<Connection>,
}

impl Deduplicator {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open dedup database {:?}", path))?;
        Self::init_schema(&conn)?;
        Ok(Deduplicator {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory dedup database")?;
        Self::init_schema(&conn)?;
        Ok(Deduplicator {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                alert_id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                dedup_key TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                resolved_at TIMESTAMP,
                title TEXT,
                severity TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_rule_dedup_resolved
                ON alerts (rule_id, dedup_key, resolved_at);
            "#,
        )
        .context("init alerts schema")?;
        Ok(())
    }

    /// Record a match and return the alert it belongs to. Empty dedup
    /// strings fall back to the title so unrelated matches of the same rule
    /// still separate by message.
    pub fn update_alert(
        &self,
        rule_id: &str,
        dedup: &str,
        title: &str,
        severity: &str,
        window_minutes: i64,
    ) -> Result<AlertInfo> {
        self.update_alert_at(rule_id, dedup, title, severity, window_minutes, Utc::now())
    }

    /// The protocol with an injected clock, used directly by the window
    /// tests.
    pub fn update_alert_at(
        &self,
        rule_id: &str,
        dedup: &str,
        title: &str,
        severity: &str,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<AlertInfo> {
        let dedup = if dedup.is_empty() { title } else { dedup };
        let dedup_key = generate_dedup_key(rule_id, dedup);
        let window_start = now - Duration::minutes(window_minutes);

        let mut conn = self.conn.lock().expect("dedup store lock poisoned");
        let tx = conn.transaction().context("begin dedup transaction")?;

        let open_row: Option<(String, DateTime<Utc>)> = tx
            .query_row(
                "SELECT alert_id, created_at FROM alerts
                 WHERE rule_id = ?1 AND dedup_key = ?2 AND resolved_at IS NULL",
                params![rule_id, dedup_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("query open alert")?;

        let info = match open_row {
            None => {
                let alert_id = generate_alert_id(rule_id, &dedup_key, now);
                tx.execute(
                    "INSERT INTO alerts (alert_id, rule_id, dedup_key, created_at, updated_at, title, severity)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![alert_id, rule_id, dedup_key, now, now, title, severity],
                )
                .context("insert alert")?;

                AlertInfo {
                    alert_id,
                    rule_id: rule_id.to_owned(),
                    dedup_key,
                    created_at: now,
                    updated_at: now,
                    title: title.to_owned(),
                    severity: severity.to_owned(),
                    status: AlertStatus::New,
                }
            }
            Some((old_alert_id, created_at)) if created_at <= window_start => {
                // Window lapsed: close the old row, open a fresh one.
                tx.execute(
                    "UPDATE alerts SET resolved_at = ?1 WHERE alert_id = ?2",
                    params![now, old_alert_id],
                )
                .context("resolve lapsed alert")?;

                let alert_id = generate_alert_id(rule_id, &dedup_key, now);
                tx.execute(
                    "INSERT INTO alerts (alert_id, rule_id, dedup_key, created_at, updated_at, title, severity)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![alert_id, rule_id, dedup_key, now, now, title, severity],
                )
                .context("insert rollover alert")?;

                AlertInfo {
                    alert_id,
                    rule_id: rule_id.to_owned(),
                    dedup_key,
                    created_at: now,
                    updated_at: now,
                    title: title.to_owned(),
                    severity: severity.to_owned(),
                    status: AlertStatus::New,
                }
            }
            Some((alert_id, created_at)) => {
                tx.execute(
                    "UPDATE alerts SET updated_at = ?1, title = ?2, severity = ?3
                     WHERE alert_id = ?4",
                    params![now, title, severity, alert_id],
                )
                .context("update recurring alert")?;

                AlertInfo {
                    alert_id,
                    rule_id: rule_id.to_owned(),
                    dedup_key,
                    created_at,
                    updated_at: now,
                    title: title.to_owned(),
                    severity: severity.to_owned(),
                    status: AlertStatus::Recurring,
                }
            }
        };

        tx.commit().context("commit dedup transaction")?;
        Ok(info)
    }

    /// Number of unresolved rows for a (rule, dedup-key) pair. The protocol
    /// keeps this at most 1.
    pub fn open_alert_count(&self, rule_id: &str, dedup: &str) -> Result<i64> {
        let dedup_key = generate_dedup_key(rule_id, dedup);
        let conn = self.conn.lock().expect("dedup store lock poisoned");
        conn.query_row(
            "SELECT COUNT(*) FROM alerts
             WHERE rule_id = ?1 AND dedup_key = ?2 AND resolved_at IS NULL",
            params![rule_id, dedup_key],
            |row| row.get(0),
        )
        .context("count open alerts")
    }

    /// Number of resolved rows for a (rule, dedup-key) pair.
    pub fn resolved_alert_count(&self, rule_id: &str, dedup: &str) -> Result<i64> {
        let dedup_key = generate_dedup_key(rule_id, dedup);
        let conn = self.conn.lock().expect("dedup store lock poisoned");
        conn.query_row(
            "SELECT COUNT(*) FROM alerts
             WHERE rule_id = ?1 AND dedup_key = ?2 AND resolved_at IS NOT NULL",
            params![rule_id, dedup_key],
            |row| row.get(0),
        )
        .context("count resolved alerts")
    }
}

fn generate_dedup_key(rule_id: &str, dedup: &str) -> String {
    let name = format!("{}:{}", rule_id, dedup);
    Uuid::new_v5(&DEDUP_NAMESPACE, name.as_bytes()).to_string()
}

fn generate_alert_id(rule_id: &str, dedup_key: &str, now: DateTime<Utc>) -> String {
    let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());
    let name = format!("{}:{}:{}", rule_id, dedup_key, nanos);
    Uuid::new_v5(&DEDUP_NAMESPACE, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_first_match_creates_new_alert() {
        let dedup = Deduplicator::open_in_memory().unwrap();
        let info = dedup
            .update_alert_at("R1", "D", "title", "HIGH", 60, t0())
            .unwrap();

        assert_eq!(info.status, AlertStatus::New);
        assert_eq!(info.created_at, t0());
        assert_eq!(info.updated_at, t0());
        assert_eq!(dedup.open_alert_count("R1", "D").unwrap(), 1);
    }

    #[test]
    fn test_match_inside_window_is_recurring_with_same_id() {
        let dedup = Deduplicator::open_in_memory().unwrap();
        let first = dedup
            .update_alert_at("R1", "D", "title", "HIGH", 60, t0())
            .unwrap();
        let second = dedup
            .update_alert_at(
                "R1",
                "D",
                "title",
                "HIGH",
                60,
                t0() + Duration::minutes(10),
            )
            .unwrap();

        assert_eq!(second.status, AlertStatus::Recurring);
        assert_eq!(second.alert_id, first.alert_id);
        assert_eq!(second.updated_at, t0() + Duration::minutes(10));
        assert_eq!(dedup.open_alert_count("R1", "D").unwrap(), 1);
    }

    #[test]
    fn test_window_rollover_resolves_and_reopens() {
        let dedup = Deduplicator::open_in_memory().unwrap();
        let first = dedup
            .update_alert_at("R1", "D", "title", "HIGH", 60, t0())
            .unwrap();
        let second = dedup
            .update_alert_at(
                "R1",
                "D",
                "title",
                "HIGH",
                60,
                t0() + Duration::minutes(70),
            )
            .unwrap();

        assert_eq!(second.status, AlertStatus::New);
        assert_ne!(second.alert_id, first.alert_id);
        assert_eq!(dedup.open_alert_count("R1", "D").unwrap(), 1);
        assert_eq!(dedup.resolved_alert_count("R1", "D").unwrap(), 1);
    }

    #[test]
    fn test_match_exactly_at_window_boundary_rolls_over() {
        let dedup = Deduplicator::open_in_memory().unwrap();
        let first = dedup
            .update_alert_at("R1", "D", "title", "HIGH", 60, t0())
            .unwrap();
        let second = dedup
            .update_alert_at(
                "R1",
                "D",
                "title",
                "HIGH",
                60,
                t0() + Duration::minutes(60),
            )
            .unwrap();

        assert_eq!(second.status, AlertStatus::New);
        assert_ne!(second.alert_id, first.alert_id);
        assert_eq!(dedup.open_alert_count("R1", "D").unwrap(), 1);
        assert_eq!(dedup.resolved_alert_count("R1", "D").unwrap(), 1);
    }

    #[test]
    fn test_empty_dedup_falls_back_to_title() {
        let dedup = Deduplicator::open_in_memory().unwrap();
        let a = dedup
            .update_alert_at("R1", "", "failed login", "LOW", 60, t0())
            .unwrap();
        let b = dedup
            .update_alert_at(
                "R1",
                "failed login",
                "failed login",
                "LOW",
                60,
                t0() + Duration::minutes(1),
            )
            .unwrap();
        assert_eq!(a.alert_id, b.alert_id);
    }

    #[test]
    fn test_distinct_pairs_do_not_interfere() {
        let dedup = Deduplicator::open_in_memory().unwrap();
        let a = dedup
            .update_alert_at("R1", "D1", "t", "LOW", 60, t0())
            .unwrap();
        let b = dedup
            .update_alert_at("R1", "D2", "t", "LOW", 60, t0())
            .unwrap();
        let c = dedup
            .update_alert_at("R2", "D1", "t", "LOW", 60, t0())
            .unwrap();

        assert_ne!(a.alert_id, b.alert_id);
        assert_ne!(a.alert_id, c.alert_id);
        assert_eq!(dedup.open_alert_count("R1", "D1").unwrap(), 1);
        assert_eq!(dedup.open_alert_count("R1", "D2").unwrap(), 1);
    }

    #[test]
    fn test_recurring_updates_title_and_severity() {
        let dedup = Deduplicator::open_in_memory().unwrap();
        dedup
            .update_alert_at("R1", "D", "old title", "LOW", 60, t0())
            .unwrap();
        let info = dedup
            .update_alert_at(
                "R1",
                "D",
                "new title",
                "CRITICAL",
                60,
                t0() + Duration::minutes(5),
            )
            .unwrap();

        assert_eq!(info.title, "new title");
        assert_eq!(info.severity, "CRITICAL");
        assert_eq!(info.status, AlertStatus::Recurring);
    }

    #[test]
    fn test_repeated_rollovers_keep_history() {
        let dedup = Deduplicator::open_in_memory().unwrap();
        let mut at = t0();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let info = dedup
                .update_alert_at("R1", "D", "t", "LOW", 60, at)
                .unwrap();
            ids.push(info.alert_id);
            at += Duration::minutes(90);
        }

        assert_eq!(ids.len(), 3);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3, "every window gets a fresh alert id");
        assert_eq!(dedup.open_alert_count("R1", "D").unwrap(), 1);
        assert_eq!(dedup.resolved_alert_count("R1", "D").unwrap(), 2);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        let first = {
            let dedup = Deduplicator::open(&path).unwrap();
            dedup
                .update_alert_at("R1", "D", "t", "LOW", 60, t0())
                .unwrap()
        };

        let dedup = Deduplicator::open(&path).unwrap();
        let second = dedup
            .update_alert_at("R1", "D", "t", "LOW", 60, t0() + Duration::minutes(5))
            .unwrap();
        assert_eq!(second.alert_id, first.alert_id);
        assert_eq!(second.status, AlertStatus::Recurring);
    }
}
