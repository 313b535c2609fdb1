//! Queue-driven ingestion: object notifications in, alerts and lake
//! partitions out, at-least-once per persisted state.

pub mod envelope;
pub mod s3_key;

use std::io::Read;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cloud_providers::aws::SqsClient;
use crate::datalake::DataLakeWriter;
use crate::engine::RuleEngine;
use crate::forwarder::Forwarder;
use crate::processor::Processor;
use crate::state::StateStore;
use crate::types::event::NormalizedEvent;
use envelope::EventBridgeEnvelope;
use s3_key::parse_cloudtrail_key;

const UNKNOWN: &str = "unknown";

/// Object fetch, the external collaborator boundary of this module.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum ObjectOutcome {
    /// Object was fetched and ran through the full pipeline.
    Processed { events: usize, matches: usize },
    /// Redelivery of the already-recorded key; nothing was fetched.
    Skipped,
}

/// The per-object pipeline: fetch, decompress, classify, persist, detect,
/// forward, record. One instance per receiver; the classifier inside is
/// per-stream state.
pub struct ObjectPipeline {
    fetcher: Arc<dyn ObjectFetcher>,
    processor: Processor,
    state: Arc<StateStore>,
    engine: Arc<RuleEngine>,
    forwarder: Arc<Forwarder>,
    lake_writer: Option<DataLakeWriter>,
}

impl ObjectPipeline {
    pub fn new(
        fetcher: Arc<dyn ObjectFetcher>,
        processor: Processor,
        state: Arc<StateStore>,
        engine: Arc<RuleEngine>,
        forwarder: Arc<Forwarder>,
        lake_writer: Option<DataLakeWriter>,
    ) -> Self {
        ObjectPipeline {
            fetcher,
            processor,
            state,
            engine,
            forwarder,
            lake_writer,
        }
    }

    /// The per-object protocol. Fetch or analyze failures propagate so the
    /// queue message is not acknowledged and redelivers after the
    /// visibility timeout.
    pub async fn handle_object(
        &mut self,
        bucket: &str,
        key: &str,
        token: &CancellationToken,
    ) -> Result<ObjectOutcome> {
        let key_info = parse_cloudtrail_key(key);
        let (account_id, region) = if key_info.is_valid {
            (key_info.account_id.clone(), key_info.region.clone())
        } else {
            debug!(key, "key outside the CloudTrail convention, skipping state tracking");
            (UNKNOWN.to_string(), UNKNOWN.to_string())
        };

        let last_key = self
            .state
            .last_processed_key(bucket, &account_id, &region)
            .unwrap_or_else(|err| {
                warn!(error = %err, "failed to read last processed key");
                String::new()
            });
        if last_key == key {
            info!(bucket, key, "skipping already processed object");
            return Ok(ObjectOutcome::Skipped);
        }

        info!(bucket, key, "processing object");
        let raw = self.fetcher.fetch(bucket, key).await?;
        let data = maybe_gunzip(raw).context("decompress object")?;

        let (events, matches) = self.run_detection(&data, token).await?;

        if account_id != UNKNOWN && region != UNKNOWN {
            if let Err(err) = self
                .state
                .update_last_processed_key(bucket, &account_id, &region, key)
            {
                warn!(error = %err, "failed to update processed-object state");
            }
        }

        info!(bucket, key, events, matches, "object processed");
        Ok(ObjectOutcome::Processed { events, matches })
    }

    /// Shared tail of every ingest mode: stream the bytes into processed
    /// events, fan out to the lake, analyze the batch, forward matches.
    pub async fn run_detection(
        &mut self,
        data: &[u8],
        token: &CancellationToken,
    ) -> Result<(usize, usize)> {
        let mut batch: Vec<NormalizedEvent> = Vec::new();

        for processed in self.processor.process(data, token) {
            if let Some(writer) = &mut self.lake_writer {
                if let Err(err) = writer.write_event(&processed).await {
                    error!(error = %err, "error writing to data lake");
                }
            }
            batch.push(processed.event);
        }

        if token.is_cancelled() {
            bail!("processing cancelled");
        }

        if batch.is_empty() {
            return Ok((0, 0));
        }

        let matches = self
            .engine
            .analyze(&batch, token)
            .await
            .context("analyze batch")?;

        for m in &matches {
            if let Err(err) = self.forwarder.process_match(m).await {
                error!(rule_id = %m.rule_id, error = %err, "error forwarding match");
            }
        }

        Ok((batch.len(), matches.len()))
    }

    /// EventBridge partner events carry a single record and a log-type
    /// hint; no object fetch and no state tracking.
    pub async fn handle_partner_event(
        &mut self,
        envelope: &EventBridgeEnvelope,
        token: &CancellationToken,
    ) -> Result<()> {
        let hint = envelope.log_type_hint();
        let processed = self.processor.process_record(envelope.detail_json(), hint);
        if processed.is_empty() {
            debug!(source = %envelope.source, "partner event did not classify");
            return Ok(());
        }

        let mut batch = Vec::with_capacity(processed.len());
        for event in processed {
            if let Some(writer) = &mut self.lake_writer {
                if let Err(err) = writer.write_event(&event).await {
                    error!(error = %err, "error writing to data lake");
                }
            }
            batch.push(event.event);
        }

        let matches = self
            .engine
            .analyze(&batch, token)
            .await
            .context("analyze partner event")?;
        for m in &matches {
            if let Err(err) = self.forwarder.process_match(m).await {
                error!(rule_id = %m.rule_id, error = %err, "error forwarding match");
            }
        }

        Ok(())
    }

    /// Flush buffered lake writes; called on shutdown.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.lake_writer {
            writer.flush().await.context("flush data lake on shutdown")?;
        }
        Ok(())
    }
}

/// Gzip is detected by magic bytes so both `.json` and `.json.gz` objects
/// flow through the same path.
fn maybe_gunzip(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() < 2 || data[0] != 0x1f || data[1] != 0x8b {
        return Ok(data);
    }
    let mut decoder = MultiGzDecoder::new(data.as_slice());
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).context("gunzip object body")?;
    Ok(decoded)
}

/// The receive loop. Single receiver by default; per-message work is
/// sequential, and a message is only acknowledged after its object fully
/// processed.
pub struct SqsIngestLoop {
    queue: SqsClient,
    pipeline: ObjectPipeline,
    max_messages: i32,
    wait_time_secs: i32,
    visibility_timeout_secs: i32,
}

impl SqsIngestLoop {
    pub fn new(
        queue: SqsClient,
        pipeline: ObjectPipeline,
        max_messages: i32,
        wait_time_secs: i32,
        visibility_timeout_secs: i32,
    ) -> Self {
        SqsIngestLoop {
            queue,
            pipeline,
            max_messages,
            wait_time_secs,
            visibility_timeout_secs,
        }
    }

    pub async fn run(&mut self, token: &CancellationToken) -> Result<()> {
        info!("queue receive loop started");

        while !token.is_cancelled() {
            let messages = tokio::select! {
                received = self.queue.receive(
                    self.max_messages,
                    self.wait_time_secs,
                    self.visibility_timeout_secs,
                ) => match received {
                    Ok(messages) => messages,
                    Err(err) => {
                        // Transient: the message stays on the queue.
                        warn!(error = %err, "queue receive failed");
                        continue;
                    }
                },
                _ = token.cancelled() => break,
            };

            for message in messages {
                if token.is_cancelled() {
                    break;
                }

                match self.process_message(&message.body, token).await {
                    Ok(()) => {
                        if let Err(err) = self.queue.ack(&message.receipt_handle).await {
                            warn!(error = %err, "failed to ack message");
                        }
                    }
                    Err(err) => {
                        // No ack: redelivery after the visibility timeout.
                        warn!(error = %err, "error processing message, leaving for redelivery");
                    }
                }
            }
        }

        self.pipeline.shutdown().await?;
        info!("queue receive loop stopped");
        Ok(())
    }

    async fn process_message(&mut self, body: &str, token: &CancellationToken) -> Result<()> {
        if let Some(eb_envelope) = EventBridgeEnvelope::parse(body) {
            return self.pipeline.handle_partner_event(&eb_envelope, token).await;
        }

        let objects = envelope::parse_s3_notification(body).context("decode queue message")?;
        for object in objects {
            self.pipeline
                .handle_object(&object.bucket, &object.key, token)
                .await
                .with_context(|| format!("handle s3://{}/{}", object.bucket, object.key))?;
        }
        Ok(())
    }
}
