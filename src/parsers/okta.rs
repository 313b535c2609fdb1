use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::LogParser;
use crate::types::event::NormalizedEvent;

/// Okta System Log events. Identity is the `uuid` field, time is
/// `published`; source ip prefers the request ip-chain over the client.
pub struct OktaParser;

impl OktaParser {
    pub fn new() -> Self {
        OktaParser
    }
}

impl Default for OktaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for OktaParser {
    fn log_type(&self) -> &'static str {
        "Okta.SystemLog"
    }

    fn parse(&mut self, line: &str) -> Result<Vec<NormalizedEvent>> {
        let event: OktaLogEvent =
            serde_json::from_str(line).context("failed to parse Okta log")?;

        let Some(uuid) = event.uuid.clone() else {
            bail!("missing uuid");
        };
        let Some(published) = event.published else {
            bail!("missing published timestamp");
        };

        let mut source_ip = String::new();
        let mut user_agent = String::new();

        if let Some(client) = &event.client {
            if let Some(ip) = &client.ip_address {
                source_ip = ip.clone();
            }
            if let Some(agent) = client
                .user_agent
                .as_ref()
                .and_then(|ua| ua.raw_user_agent.as_ref())
            {
                user_agent = agent.clone();
            }
        }

        if let Some(ip) = event
            .request
            .as_ref()
            .and_then(|r| r.ip_chain.first())
            .and_then(|entry| entry.ip.as_ref())
        {
            source_ip = ip.clone();
        }

        let event_name = event
            .event_type
            .clone()
            .unwrap_or_else(|| "OktaEvent".to_string());

        let mut okta_data = BTreeMap::new();
        okta_data.insert("uuid".to_string(), Value::String(uuid.clone()));
        okta_data.insert("eventType".to_string(), to_value(&event.event_type)?);
        okta_data.insert("version".to_string(), to_value(&event.version)?);
        okta_data.insert("severity".to_string(), to_value(&event.severity)?);
        okta_data.insert(
            "displayMessage".to_string(),
            to_value(&event.display_message)?,
        );
        okta_data.insert("actor".to_string(), to_value(&event.actor)?);
        okta_data.insert("client".to_string(), to_value(&event.client)?);
        okta_data.insert("request".to_string(), to_value(&event.request)?);
        okta_data.insert("outcome".to_string(), to_value(&event.outcome)?);
        okta_data.insert("target".to_string(), to_value(&event.target)?);
        okta_data.insert("transaction".to_string(), to_value(&event.transaction)?);
        okta_data.insert(
            "authenticationContext".to_string(),
            to_value(&event.authentication_context)?,
        );
        okta_data.insert(
            "securityContext".to_string(),
            to_value(&event.security_context)?,
        );

        let mut normalized = NormalizedEvent::at(published);
        normalized.event_version = "1.0".to_string();
        normalized.event_source = "okta.com".to_string();
        normalized.event_name = event_name;
        normalized.source_ip_address = source_ip;
        normalized.user_agent = user_agent;
        normalized.request_id = uuid.clone();
        normalized.event_id = uuid;
        normalized.event_type = "OktaSystemLog".to_string();
        normalized.request_parameters = Some(okta_data);

        Ok(vec![normalized])
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<Value> {
    serde_json::to_value(v).context("serialize okta field")
}

#[derive(Debug, Deserialize)]
struct OktaLogEvent {
    uuid: Option<String>,
    published: Option<DateTime<Utc>>,
    #[serde(rename = "eventType")]
    event_type: Option<String>,
    version: Option<String>,
    severity: Option<String>,
    #[serde(rename = "displayMessage")]
    display_message: Option<String>,
    actor: Option<Value>,
    client: Option<OktaClient>,
    request: Option<OktaRequest>,
    outcome: Option<Value>,
    target: Option<Value>,
    transaction: Option<Value>,
    #[serde(rename = "authenticationContext")]
    authentication_context: Option<Value>,
    #[serde(rename = "securityContext")]
    security_context: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OktaClient {
    #[serde(rename = "userAgent", skip_serializing_if = "Option::is_none")]
    user_agent: Option<OktaUserAgent>,
    #[serde(rename = "ipAddress", skip_serializing_if = "Option::is_none")]
    ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<String>,
    #[serde(
        rename = "geographicalContext",
        skip_serializing_if = "Option::is_none"
    )]
    geographical_context: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OktaUserAgent {
    #[serde(skip_serializing_if = "Option::is_none")]
    browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    os: Option<String>,
    #[serde(rename = "rawUserAgent", skip_serializing_if = "Option::is_none")]
    raw_user_agent: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OktaRequest {
    #[serde(rename = "ipChain", default)]
    ip_chain: Vec<OktaIpAddress>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OktaIpAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(
        rename = "geographicalContext",
        skip_serializing_if = "Option::is_none"
    )]
    geographical_context: Option<Value>,
}
