//! Hour-partitioned data-lake batch writer.
//!
//! Events accumulate in a single open buffer keyed on (log-type, hour) and
//! are uploaded as one object per flush so the lake does not fill up with
//! tiny files. Each record is individually gzip-framed; concatenated gzip
//! members are themselves a valid gzip stream, so partial files always
//! decode.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::{table_name, Catalog};
use crate::types::event::ProcessedEvent;

const LAKE_CONTENT_TYPE: &str = "application/x-gzip";

/// The slice of the object store the writer needs. The AWS client
/// implements this; tests use an in-memory store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str)
        -> Result<()>;
}

struct EventBuffer {
    bytes: Vec<u8>,
    events: usize,
    created_at: DateTime<Utc>,
    log_type: String,
    hour: DateTime<Utc>,
}

pub struct DataLakeWriter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    buffer: Option<EventBuffer>,
    max_size: usize,
    max_age: Duration,
    catalog: Option<Arc<dyn Catalog>>,
    seen_log_types: HashSet<String>,
}

impl DataLakeWriter {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: &str, max_size: usize, max_age: Duration) -> Self {
        DataLakeWriter {
            store,
            bucket: bucket.to_owned(),
            buffer: None,
            max_size,
            max_age,
            catalog: None,
            seen_log_types: HashSet::new(),
        }
    }

    pub fn with_catalog(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        max_size: usize,
        max_age: Duration,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        let mut writer = Self::new(store, bucket, max_size, max_age);
        writer.catalog = Some(catalog);
        writer
    }

    /// Append one event. Flushes first when the open buffer belongs to a
    /// different (log-type, hour), and afterwards when the buffer crosses
    /// the size or age threshold.
    pub async fn write_event(&mut self, event: &ProcessedEvent) -> Result<()> {
        let event_hour = truncate_to_hour(event.event_time);

        let needs_rotate = match &self.buffer {
            Some(buffer) => buffer.log_type != event.log_type || buffer.hour != event_hour,
            None => false,
        };
        if needs_rotate {
            self.flush().await.context("flush buffer")?;
        }

        if self.buffer.is_none() {
            self.register_log_type(&event.log_type).await;
            self.buffer = Some(EventBuffer {
                bytes: Vec::new(),
                events: 0,
                created_at: Utc::now(),
                log_type: event.log_type.clone(),
                hour: event_hour,
            });
        }

        let event_json = serde_json::to_vec(&event.event).context("marshal event")?;
        let compressed = compress_record(&event_json).context("compress event")?;

        let buffer = self.buffer.as_mut().expect("buffer just ensured");
        buffer.bytes.extend_from_slice(&compressed);
        buffer.events += 1;

        let over_size = buffer.bytes.len() > self.max_size;
        let over_age = Utc::now() - buffer.created_at > self.max_age;
        if over_size || over_age {
            self.flush().await.context("flush buffer")?;
        }

        Ok(())
    }

    /// Upload whatever is buffered; called on shutdown so partial buffers
    /// are persisted before return.
    pub async fn flush(&mut self) -> Result<()> {
        let Some(buffer) = self.buffer.take() else {
            return Ok(());
        };
        if buffer.bytes.is_empty() {
            return Ok(());
        }

        let key = generate_lake_key(&buffer);
        debug!(
            key = %key,
            events = buffer.events,
            bytes = buffer.bytes.len(),
            "flushing data lake buffer"
        );

        self.store
            .put_object(&self.bucket, &key, buffer.bytes, LAKE_CONTENT_TYPE)
            .await
            .context("put lake object")?;

        // Partition registration failures must not lose uploaded data.
        if let Some(catalog) = &self.catalog {
            use chrono::{Datelike, Timelike};
            if let Err(err) = catalog
                .add_partition(
                    &buffer.log_type,
                    buffer.hour.year(),
                    buffer.hour.month(),
                    buffer.hour.day(),
                    buffer.hour.hour(),
                )
                .await
            {
                warn!(log_type = %buffer.log_type, error = %err, "failed to register partition");
            }
        }

        Ok(())
    }

    async fn register_log_type(&mut self, log_type: &str) {
        let Some(catalog) = &self.catalog else {
            return;
        };
        if self.seen_log_types.contains(log_type) {
            return;
        }

        if let Err(err) = catalog.ensure_database().await {
            warn!(error = %err, "failed to ensure catalog database");
            return;
        }
        if let Err(err) = catalog.create_table(log_type).await {
            warn!(log_type, error = %err, "failed to create catalog table");
            return;
        }
        self.seen_log_types.insert(log_type.to_owned());
    }
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::hours(1))
        .unwrap_or(t)
}

fn generate_lake_key(buffer: &EventBuffer) -> String {
    let table = table_name(&buffer.log_type);
    format!(
        "logs/{}/year={}/month={}/day={}/hour={}/{}-{}.json.gz",
        table,
        buffer.hour.format("%Y"),
        buffer.hour.format("%m"),
        buffer.hour.format("%d"),
        buffer.hour.format("%H"),
        buffer.hour.format("%Y%m%dT%H%M%SZ"),
        Uuid::new_v4()
    )
}

fn compress_record(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
