use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{compact_timestamp, LogParser};
use crate::types::event::NormalizedEvent;

/// GSuite admin activity reports. Identity lives inside the compound `id`
/// object (customer id + time + unique qualifier); only
/// `admin#reports#activity` records are accepted. The document is decoded
/// untyped because the whole report is lifted under `requestParameters`.
pub struct GSuiteParser;

impl GSuiteParser {
    pub fn new() -> Self {
        GSuiteParser
    }
}

impl Default for GSuiteParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for GSuiteParser {
    fn log_type(&self) -> &'static str {
        "GSuite.Reports"
    }

    fn parse(&mut self, line: &str) -> Result<Vec<NormalizedEvent>> {
        let report: Value = serde_json::from_str(line).context("failed to parse GSuite log")?;
        if !report.is_object() {
            bail!("not a JSON object");
        }

        let id = &report["id"];
        if id.is_null() {
            bail!("missing id");
        }

        let Some(time_str) = id["time"].as_str() else {
            bail!("missing time in id");
        };
        let event_time: DateTime<Utc> = time_str
            .parse::<DateTime<Utc>>()
            .context("parse time in id")?;

        let kind = report["kind"].as_str().unwrap_or_default();
        if kind != "admin#reports#activity" {
            bail!("invalid kind: expected admin#reports#activity, got {}", kind);
        }

        let source_ip = report["ipAddress"].as_str().unwrap_or_default().to_string();

        let event_name = report["events"]
            .get(0)
            .and_then(|e| e["name"].as_str())
            .unwrap_or("GSuiteActivity")
            .to_string();

        let unique_qualifier = id["uniqueQualifier"].as_str().unwrap_or_default();
        let stamp = compact_timestamp(event_time);
        let event_id = match id["customerId"].as_str() {
            Some(customer) => format!("gsuite-{}-{}-{}", customer, stamp, unique_qualifier),
            None => format!("gsuite-{}-{}", stamp, unique_qualifier),
        };

        let mut gsuite_data = BTreeMap::new();
        gsuite_data.insert("id".to_string(), report["id"].clone());
        gsuite_data.insert("actor".to_string(), report["actor"].clone());
        gsuite_data.insert("kind".to_string(), Value::String(kind.to_string()));
        gsuite_data.insert("ownerDomain".to_string(), report["ownerDomain"].clone());
        gsuite_data.insert("ipAddress".to_string(), report["ipAddress"].clone());
        gsuite_data.insert("events".to_string(), report["events"].clone());

        let mut event = NormalizedEvent::at(event_time);
        event.event_version = "1.0".to_string();
        event.event_source = "googleapis.com".to_string();
        event.event_name = event_name;
        event.source_ip_address = source_ip;
        event.request_id = event_id.clone();
        event.event_id = event_id;
        event.event_type = "GSuiteActivity".to_string();
        event.request_parameters = Some(gsuite_data);

        Ok(vec![event])
    }
}
