//! Queue-message envelope decoding.
//!
//! Two shapes arrive on the queue: SNS notifications wrapping S3
//! object-created records (the CloudTrail delivery path), and EventBridge
//! envelopes wrapping partner events (Okta, 1Password, GSuite). Anything
//! else is acknowledged and ignored.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::value::RawValue;

/// One object-created record extracted from an SNS-wrapped S3 notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Object {
    pub bucket: String,
    pub key: String,
}

#[derive(Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Message", default)]
    message: String,
}

#[derive(Deserialize)]
struct S3Notification {
    #[serde(rename = "Records", default)]
    records: Vec<S3Record>,
}

#[derive(Deserialize)]
struct S3Record {
    #[serde(rename = "eventName", default)]
    event_name: String,
    #[serde(default)]
    s3: S3Entity,
}

#[derive(Deserialize, Default)]
struct S3Entity {
    #[serde(default)]
    bucket: S3Bucket,
    #[serde(default)]
    object: S3ObjectEntity,
}

#[derive(Deserialize, Default)]
struct S3Bucket {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize, Default)]
struct S3ObjectEntity {
    #[serde(default)]
    key: String,
}

/// Decode an SNS notification body into its object-created records.
/// `Ok(vec![])` covers both non-Notification envelopes and notifications
/// with no object-created records; either way the message is acked and
/// ignored. A malformed envelope is an error (poisoned message).
pub fn parse_s3_notification(body: &str) -> Result<Vec<S3Object>> {
    let envelope: SnsEnvelope =
        serde_json::from_str(body).context("unmarshal sns envelope")?;

    if envelope.kind != "Notification" {
        return Ok(Vec::new());
    }

    let notification: S3Notification =
        serde_json::from_str(&envelope.message).context("unmarshal s3 notification")?;

    let objects = notification
        .records
        .into_iter()
        .filter(|record| {
            record.event_name == "ObjectCreated:Put"
                || record.event_name == "ObjectCreated:CompleteMultipartUpload"
        })
        .map(|record| S3Object {
            bucket: record.s3.bucket.name,
            key: record.s3.object.key,
        })
        .collect();

    Ok(objects)
}

/// An EventBridge envelope with the partner payload left raw.
#[derive(Debug, Deserialize)]
pub struct EventBridgeEnvelope {
    #[serde(rename = "detail-type", default)]
    pub detail_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub detail: Option<Box<RawValue>>,
}

impl EventBridgeEnvelope {
    /// Presence of detail-type, source and a non-empty detail marks an
    /// EventBridge message.
    pub fn parse(body: &str) -> Option<EventBridgeEnvelope> {
        let envelope: EventBridgeEnvelope = serde_json::from_str(body).ok()?;
        if envelope.detail_type.is_empty() || envelope.source.is_empty() {
            return None;
        }
        envelope.detail.as_ref()?;
        Some(envelope)
    }

    /// Map the partner source onto a registered log-type, used as a
    /// classification hint. Unknown partners get no hint.
    pub fn log_type_hint(&self) -> Option<&'static str> {
        if self.source == "aws.partner/okta.com"
            || self.detail_type == "Okta Log Event"
            || self.detail_type == "okta-systemlog"
        {
            return Some("Okta.SystemLog");
        }
        if self.source == "aws.partner/1password.com" || self.detail_type == "1Password Event" {
            return Some("OnePassword.SignInAttempt");
        }
        if self.source == "google.workspace" || self.detail_type == "GSuite Activity" {
            return Some("GSuite.Reports");
        }
        None
    }

    pub fn detail_json(&self) -> &str {
        self.detail
            .as_ref()
            .map(|raw| raw.get())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sns_body(records: &str) -> String {
        let message = format!(r#"{{"Records":{}}}"#, records);
        serde_json::json!({
            "Type": "Notification",
            "Message": message,
        })
        .to_string()
    }

    #[test]
    fn test_object_created_put_is_extracted() {
        let body = sns_body(
            r#"[{"eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"trail-bucket"},"object":{"key":"AWSLogs/1/CloudTrail/x.json.gz"}}}]"#,
        );
        let objects = parse_s3_notification(&body).unwrap();
        assert_eq!(
            objects,
            vec![S3Object {
                bucket: "trail-bucket".to_string(),
                key: "AWSLogs/1/CloudTrail/x.json.gz".to_string(),
            }]
        );
    }

    #[test]
    fn test_multipart_upload_is_extracted() {
        let body = sns_body(
            r#"[{"eventName":"ObjectCreated:CompleteMultipartUpload","s3":{"bucket":{"name":"b"},"object":{"key":"k"}}}]"#,
        );
        assert_eq!(parse_s3_notification(&body).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_events_are_ignored() {
        let body = sns_body(
            r#"[{"eventName":"ObjectRemoved:Delete","s3":{"bucket":{"name":"b"},"object":{"key":"k"}}}]"#,
        );
        assert!(parse_s3_notification(&body).unwrap().is_empty());
    }

    #[test]
    fn test_non_notification_type_is_ignored() {
        let body = r#"{"Type":"SubscriptionConfirmation","Message":"{}"}"#;
        assert!(parse_s3_notification(body).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        assert!(parse_s3_notification("not json at all").is_err());
    }

    #[test]
    fn test_eventbridge_detection_and_hint() {
        let body = r#"{"detail-type":"Okta Log Event","source":"aws.partner/okta.com","detail":{"uuid":"u-1","published":"2024-03-10T14:02:31.000Z"}}"#;
        let envelope = EventBridgeEnvelope::parse(body).unwrap();
        assert_eq!(envelope.log_type_hint(), Some("Okta.SystemLog"));
        assert!(envelope.detail_json().contains("u-1"));
    }

    #[test]
    fn test_eventbridge_partner_sources() {
        let onepw = r#"{"detail-type":"1Password Event","source":"aws.partner/1password.com","detail":{}}"#;
        assert_eq!(
            EventBridgeEnvelope::parse(onepw).unwrap().log_type_hint(),
            Some("OnePassword.SignInAttempt")
        );

        let gsuite = r#"{"detail-type":"GSuite Activity","source":"google.workspace","detail":{}}"#;
        assert_eq!(
            EventBridgeEnvelope::parse(gsuite).unwrap().log_type_hint(),
            Some("GSuite.Reports")
        );

        let unknown = r#"{"detail-type":"Other","source":"aws.partner/other.com","detail":{}}"#;
        assert_eq!(EventBridgeEnvelope::parse(unknown).unwrap().log_type_hint(), None);
    }

    #[test]
    fn test_plain_sns_is_not_eventbridge() {
        let body = r#"{"Type":"Notification","Message":"{}"}"#;
        assert!(EventBridgeEnvelope::parse(body).is_none());
    }
}
