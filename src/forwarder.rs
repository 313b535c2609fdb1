//! Fans rule matches out to alert destinations, gated by the deduplicator.
//!
//! Output failures do not roll back dedup state: an alert that failed to
//! send is still recorded as seen, so a flapping webhook cannot turn one
//! incident into a page storm.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::dedup::{AlertStatus, Deduplicator};
use crate::engine::Match;
use crate::types::event::NormalizedEvent;

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_id: String,
    pub rule_id: String,
    pub title: String,
    pub severity: String,
    pub event: Option<NormalizedEvent>,
    pub alert_context: BTreeMap<String, Value>,
    pub alert_creation_time: String,
    pub alert_update_time: String,
    pub recurring: bool,
}

/// An alert destination. Failure short-circuits forwarding for the current
/// match only; the next match is still attempted by the caller.
#[async_trait]
pub trait Output: Send + Sync {
    async fn send_alert(&self, alert: &Alert) -> Result<()>;
}

pub struct Forwarder {
    deduplicator: Deduplicator,
    outputs: Vec<Box<dyn Output>>,
    window_minutes: i64,
}

impl Forwarder {
    pub fn new(deduplicator: Deduplicator, outputs: Vec<Box<dyn Output>>, window_minutes: i64) -> Self {
        Forwarder {
            deduplicator,
            outputs,
            window_minutes,
        }
    }

    pub async fn process_match(&self, m: &Match) -> Result<()> {
        let dedup = if m.dedup.is_empty() {
            &m.title
        } else {
            &m.dedup
        };

        let alert_info = self
            .deduplicator
            .update_alert(&m.rule_id, dedup, &m.title, &m.severity, self.window_minutes)
            .context("update alert info")?;

        let mut alert_context = BTreeMap::new();
        if let Some(event) = &m.event {
            alert_context.insert("eventName".to_string(), Value::from(event.event_name.clone()));
            alert_context.insert(
                "eventSource".to_string(),
                Value::from(event.event_source.clone()),
            );
            alert_context.insert(
                "sourceIPAddress".to_string(),
                Value::from(event.source_ip_address.clone()),
            );
            alert_context.insert(
                "recipientAccountId".to_string(),
                Value::from(event.recipient_account_id.clone()),
            );
            alert_context.insert("awsRegion".to_string(), Value::from(event.aws_region.clone()));
        }

        let alert = Alert {
            alert_id: alert_info.alert_id,
            rule_id: m.rule_id.clone(),
            title: alert_info.title,
            severity: alert_info.severity,
            event: m.event.clone(),
            alert_context,
            alert_creation_time: alert_info.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            alert_update_time: alert_info.updated_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            recurring: alert_info.status == AlertStatus::Recurring,
        };

        info!(
            alert_id = %alert.alert_id,
            rule_id = %alert.rule_id,
            severity = %alert.severity,
            recurring = alert.recurring,
            "forwarding alert"
        );

        for output in &self.outputs {
            output.send_alert(&alert).await.context("send alert")?;
        }

        Ok(())
    }
}

/// POSTs the alert JSON to a webhook endpoint. Message formatting is the
/// receiver's concern.
pub struct WebhookOutput {
    client: reqwest::Client,
    url: String,
}

impl WebhookOutput {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build webhook client")?;
        Ok(WebhookOutput {
            client,
            url: url.to_owned(),
        })
    }
}

#[async_trait]
impl Output for WebhookOutput {
    async fn send_alert(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .context("post alert")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("webhook returned {}", status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct RecordingOutput {
        alerts: Arc<Mutex<Vec<Alert>>>,
    }

    #[async_trait]
    impl Output for RecordingOutput {
        async fn send_alert(&self, alert: &Alert) -> Result<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct FailingOutput {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Output for FailingOutput {
        async fn send_alert(&self, _alert: &Alert) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("output unavailable")
        }
    }

    fn a_match(rule_id: &str, dedup: &str) -> Match {
        Match {
            rule_id: rule_id.to_string(),
            title: "suspicious activity".to_string(),
            severity: "HIGH".to_string(),
            dedup: dedup.to_string(),
            event: None,
        }
    }

    fn forwarder_with(outputs: Vec<Box<dyn Output>>) -> Forwarder {
        Forwarder::new(Deduplicator::open_in_memory().unwrap(), outputs, 60)
    }

    #[tokio::test]
    async fn test_first_match_forwards_new_alert() {
        let alerts = Arc::new(Mutex::new(Vec::new()));
        let forwarder = forwarder_with(vec![Box::new(RecordingOutput {
            alerts: alerts.clone(),
        })]);

        forwarder.process_match(&a_match("R1", "D")).await.unwrap();

        let sent = alerts.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].recurring);
        assert_eq!(sent[0].rule_id, "R1");
    }

    #[tokio::test]
    async fn test_repeat_match_forwards_recurring_with_same_id() {
        let alerts = Arc::new(Mutex::new(Vec::new()));
        let forwarder = forwarder_with(vec![Box::new(RecordingOutput {
            alerts: alerts.clone(),
        })]);

        forwarder.process_match(&a_match("R1", "D")).await.unwrap();
        forwarder.process_match(&a_match("R1", "D")).await.unwrap();

        let sent = alerts.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].alert_id, sent[1].alert_id);
        assert!(sent[1].recurring);
    }

    #[tokio::test]
    async fn test_output_failure_keeps_dedup_state() {
        let calls = Arc::new(AtomicUsize::new(0));
        let alerts = Arc::new(Mutex::new(Vec::new()));

        let forwarder = forwarder_with(vec![Box::new(FailingOutput {
            calls: calls.clone(),
        })]);
        assert!(forwarder.process_match(&a_match("R1", "D")).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Same match again: dedup state survived the send failure, so this
        // comes back as recurring, not as a fresh alert.
        let forwarder2 = Forwarder::new(
            forwarder.deduplicator,
            vec![Box::new(RecordingOutput {
                alerts: alerts.clone(),
            })],
            60,
        );
        forwarder2.process_match(&a_match("R1", "D")).await.unwrap();
        assert!(alerts.lock().unwrap()[0].recurring);
    }
}
