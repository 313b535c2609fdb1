use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The uniform post-classification record. Every parser, whatever its source
/// format, emits events in this shape; format-specific fields live under
/// `request_parameters`.
///
/// Invariants: `event_id` is non-empty for every emitted event and
/// `event_time` is a real UTC instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    #[serde(rename = "eventVersion", default)]
    pub event_version: String,
    #[serde(rename = "userIdentity", default)]
    pub user_identity: UserIdentity,
    #[serde(rename = "eventTime")]
    pub event_time: DateTime<Utc>,
    #[serde(rename = "eventSource", default)]
    pub event_source: String,
    #[serde(rename = "eventName", default)]
    pub event_name: String,
    #[serde(rename = "awsRegion", default)]
    pub aws_region: String,
    #[serde(rename = "sourceIPAddress", default)]
    pub source_ip_address: String,
    #[serde(rename = "userAgent", default)]
    pub user_agent: String,
    #[serde(rename = "errorCode", default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    #[serde(
        rename = "errorMessage",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub error_message: String,
    #[serde(
        rename = "requestParameters",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_parameters: Option<BTreeMap<String, Value>>,
    #[serde(
        rename = "responseElements",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub response_elements: Option<BTreeMap<String, Value>>,
    #[serde(rename = "requestID", default)]
    pub request_id: String,
    #[serde(rename = "eventID", default)]
    pub event_id: String,
    #[serde(rename = "eventType", default)]
    pub event_type: String,
    #[serde(rename = "recipientAccountId", default)]
    pub recipient_account_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(rename = "type", default)]
    pub identity_type: String,
    #[serde(rename = "principalId", default)]
    pub principal_id: String,
    #[serde(default)]
    pub arn: String,
    #[serde(rename = "accountId", default)]
    pub account_id: String,
    #[serde(
        rename = "accessKeyId",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub access_key_id: String,
    #[serde(rename = "userName", default, skip_serializing_if = "String::is_empty")]
    pub user_name: String,
    #[serde(
        rename = "sessionContext",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_context: Option<SessionContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub attributes: SessionAttributes,
    #[serde(
        rename = "sessionIssuer",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_issuer: Option<SessionIssuer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionAttributes {
    #[serde(rename = "mfaAuthenticated", default)]
    pub mfa_authenticated: String,
    #[serde(
        rename = "creationDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub creation_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionIssuer {
    #[serde(rename = "type", default)]
    pub issuer_type: String,
    #[serde(rename = "principalId", default)]
    pub principal_id: String,
    #[serde(default)]
    pub arn: String,
    #[serde(rename = "accountId", default)]
    pub account_id: String,
    #[serde(rename = "userName", default, skip_serializing_if = "String::is_empty")]
    pub user_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "ARN", default)]
    pub arn: String,
    #[serde(rename = "accountId", default)]
    pub account_id: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
}

impl NormalizedEvent {
    /// Event with every string field empty, stamped at `event_time`. Parsers
    /// fill in what their format provides.
    pub fn at(event_time: DateTime<Utc>) -> Self {
        NormalizedEvent {
            event_version: String::new(),
            user_identity: UserIdentity::default(),
            event_time,
            event_source: String::new(),
            event_name: String::new(),
            aws_region: String::new(),
            source_ip_address: String::new(),
            user_agent: String::new(),
            error_code: String::new(),
            error_message: String::new(),
            request_parameters: None,
            response_elements: None,
            request_id: String::new(),
            event_id: String::new(),
            event_type: String::new(),
            recipient_account_id: String::new(),
            resources: Vec::new(),
        }
    }
}

/// A NormalizedEvent wrapped with its detected log-type and parse time.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub event: NormalizedEvent,
    pub log_type: String,
    pub event_time: DateTime<Utc>,
    pub parse_time: DateTime<Utc>,
    pub row_id: String,
}

impl ProcessedEvent {
    pub fn new(event: NormalizedEvent, log_type: &str) -> Self {
        let row_id = row_id_for(&event);
        ProcessedEvent {
            event_time: event.event_time,
            parse_time: Utc::now(),
            row_id,
            log_type: log_type.to_owned(),
            event,
        }
    }
}

fn row_id_for(event: &NormalizedEvent) -> String {
    format!(
        "{}-{}",
        event.event_id,
        event.event_time.format("%Y%m%d%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cloudtrail_json_round_trip_field_names() {
        let raw = r#"{
            "eventVersion": "1.08",
            "userIdentity": {"type": "IAMUser", "principalId": "AIDAEXAMPLE", "arn": "arn:aws:iam::123456789012:user/alice", "accountId": "123456789012"},
            "eventTime": "2024-01-01T00:00:00Z",
            "eventSource": "s3.amazonaws.com",
            "eventName": "GetObject",
            "awsRegion": "us-east-1",
            "sourceIPAddress": "192.0.2.1",
            "userAgent": "aws-cli/2.0",
            "requestID": "req-1",
            "eventID": "EXAMPLE-001",
            "eventType": "AwsApiCall",
            "recipientAccountId": "123456789012"
        }"#;

        let event: NormalizedEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_id, "EXAMPLE-001");
        assert_eq!(event.user_identity.identity_type, "IAMUser");
        assert_eq!(event.event_source, "s3.amazonaws.com");

        let out = serde_json::to_value(&event).unwrap();
        assert_eq!(out["eventID"], "EXAMPLE-001");
        assert_eq!(out["sourceIPAddress"], "192.0.2.1");
        assert_eq!(out["userIdentity"]["accountId"], "123456789012");
    }

    #[test]
    fn test_row_id_concatenates_event_id_and_time() {
        let mut event = NormalizedEvent::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        event.event_id = "EXAMPLE-001".to_string();
        let processed = ProcessedEvent::new(event, "AWS.CloudTrail");
        assert_eq!(processed.row_id, "EXAMPLE-001-20240101000000");
        assert_eq!(processed.log_type, "AWS.CloudTrail");
    }

    #[test]
    fn test_missing_event_time_is_a_parse_error() {
        let raw = r#"{"eventID": "abc"}"#;
        assert!(serde_json::from_str::<NormalizedEvent>(raw).is_err());
    }
}
