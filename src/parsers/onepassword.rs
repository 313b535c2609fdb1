use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::LogParser;
use crate::types::event::NormalizedEvent;

/// 1Password sign-in attempt events. Identity is the record `uuid`; the
/// timestamp is a naive `YYYY-MM-DD HH:MM:SS` string, taken as UTC.
pub struct OnePasswordParser;

impl OnePasswordParser {
    pub fn new() -> Self {
        OnePasswordParser
    }
}

impl Default for OnePasswordParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for OnePasswordParser {
    fn log_type(&self) -> &'static str {
        "OnePassword.SignInAttempt"
    }

    fn parse(&mut self, line: &str) -> Result<Vec<NormalizedEvent>> {
        let event: SignInAttempt =
            serde_json::from_str(line).context("failed to parse 1Password log")?;

        let Some(uuid) = event.uuid.clone().filter(|u| !u.is_empty()) else {
            bail!("missing uuid");
        };
        let Some(timestamp) = event.timestamp.clone().filter(|t| !t.is_empty()) else {
            bail!("missing timestamp");
        };

        let event_time = NaiveDateTime::parse_from_str(&timestamp, "%Y-%m-%d %H:%M:%S")
            .context("failed to parse timestamp")?
            .and_utc();

        let source_ip = event
            .client
            .as_ref()
            .and_then(|c| c.ip_address.clone())
            .unwrap_or_default();

        let event_name = event
            .attempt_type
            .clone()
            .unwrap_or_else(|| "SignInAttempt".to_string());

        let mut op_data = BTreeMap::new();
        op_data.insert("uuid".to_string(), Value::String(uuid.clone()));
        op_data.insert("session_uuid".to_string(), to_value(&event.session_uuid)?);
        op_data.insert("timestamp".to_string(), Value::String(timestamp));
        op_data.insert("category".to_string(), to_value(&event.category)?);
        op_data.insert("type".to_string(), to_value(&event.attempt_type)?);
        op_data.insert("country".to_string(), to_value(&event.country)?);
        op_data.insert("target_user".to_string(), to_value(&event.target_user)?);
        op_data.insert("client".to_string(), to_value(&event.client)?);

        let mut normalized = NormalizedEvent::at(event_time);
        normalized.event_version = "1.0".to_string();
        normalized.event_source = "1password.com".to_string();
        normalized.event_name = event_name;
        normalized.source_ip_address = source_ip;
        normalized.request_id = uuid.clone();
        normalized.event_id = uuid;
        normalized.event_type = "OnePasswordSignIn".to_string();
        normalized.request_parameters = Some(op_data);

        Ok(vec![normalized])
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<Value> {
    serde_json::to_value(v).context("serialize 1password field")
}

#[derive(Debug, Deserialize)]
struct SignInAttempt {
    uuid: Option<String>,
    session_uuid: Option<String>,
    timestamp: Option<String>,
    category: Option<String>,
    #[serde(rename = "type")]
    attempt_type: Option<String>,
    country: Option<String>,
    target_user: Option<TargetUser>,
    client: Option<Client>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TargetUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Client {
    #[serde(skip_serializing_if = "Option::is_none")]
    app_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    os_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"uuid":"56YE2TYN2VFYRLNSHKPW5NVT5E","session_uuid":"A5K6COGVTBZO4XMKJVEQHJ6G4Y","timestamp":"2024-02-13 22:58:05","category":"credentials_failed","type":"password_secret_bad","country":"US","target_user":{"email":"alice@example.com","uuid":"TXMJPVGZZJBDDDGEQZODDCCBCM"},"client":{"app_name":"1Password Browser Extension","app_version":"20236","ip_address":"198.51.100.70","os_name":"MacOSX","platform_name":"Chrome"}}"#;

    #[test]
    fn test_parses_sign_in_attempt() {
        let mut parser = OnePasswordParser::new();
        let events = parser.parse(SAMPLE).unwrap();
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.event_id, "56YE2TYN2VFYRLNSHKPW5NVT5E");
        assert_eq!(event.event_source, "1password.com");
        assert_eq!(event.event_name, "password_secret_bad");
        assert_eq!(event.source_ip_address, "198.51.100.70");
        assert_eq!(
            event.event_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-02-13 22:58:05"
        );
    }

    #[test]
    fn test_rejects_missing_uuid() {
        let mut parser = OnePasswordParser::new();
        let raw = r#"{"timestamp":"2024-02-13 22:58:05","category":"sign_in"}"#;
        assert!(parser.parse(raw).is_err());
    }

    #[test]
    fn test_rejects_unparseable_timestamp() {
        let mut parser = OnePasswordParser::new();
        let raw = r#"{"uuid":"u-1","timestamp":"2024-02-13T22:58:05Z"}"#;
        assert!(parser.parse(raw).is_err());
    }
}
