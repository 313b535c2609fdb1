use anyhow::{Context, Result};
use aws_config::SdkConfig;

#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

pub struct SqsClient {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsClient {
    pub fn new(config: &SdkConfig, queue_url: &str) -> Self {
        Self {
            client: aws_sdk_sqs::Client::new(config),
            queue_url: queue_url.to_owned(),
        }
    }

    /// Long-poll the queue. Returns up to `max_messages`; an empty vec
    /// means the poll timed out with nothing to do.
    pub async fn receive(
        &self,
        max_messages: i32,
        wait_time_secs: i32,
        visibility_timeout_secs: i32,
    ) -> Result<Vec<QueueMessage>> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_secs)
            .visibility_timeout(visibility_timeout_secs)
            .send()
            .await
            .context("receive message")?;

        let messages = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| {
                let body = message.body?;
                let receipt_handle = message.receipt_handle?;
                Some(QueueMessage {
                    body,
                    receipt_handle,
                })
            })
            .collect();

        Ok(messages)
    }

    /// Acknowledge: delete the message so the queue stops redelivering it.
    pub async fn ack(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .context("delete message")?;
        Ok(())
    }
}
