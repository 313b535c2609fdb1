//! The processed-event stream: raw object bytes in, deduplicated
//! [`ProcessedEvent`]s out.
//!
//! CloudTrail delivers files as a JSON object with a `Records` array; every
//! other supported format is line-oriented. Both paths run each record
//! through the adaptive classifier and drop events whose id the bloom
//! filter has probably seen before.

use std::sync::Arc;

use serde_json::value::RawValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bloom::BloomFilter;
use crate::classification::AdaptiveClassifier;
use crate::parsers::default_parsers;
use crate::types::event::ProcessedEvent;

pub struct Processor {
    classifier: AdaptiveClassifier,
    bloom_filter: Option<Arc<BloomFilter>>,
}

impl Processor {
    pub fn new() -> Self {
        Processor {
            classifier: AdaptiveClassifier::new(default_parsers()),
            bloom_filter: None,
        }
    }

    pub fn with_bloom_filter(bloom_filter: Arc<BloomFilter>) -> Self {
        Processor {
            classifier: AdaptiveClassifier::new(default_parsers()),
            bloom_filter: Some(bloom_filter),
        }
    }

    pub fn classifier(&self) -> &AdaptiveClassifier {
        &self.classifier
    }

    /// Lazily process a whole object. The returned stream borrows the
    /// processor (one classifier per stream) and checks for cancellation
    /// between records, closing early when the token fires.
    pub fn process<'a>(
        &'a mut self,
        data: &'a [u8],
        token: &'a CancellationToken,
    ) -> ProcessedEventStream<'a> {
        let source = detect_source(data);
        ProcessedEventStream {
            processor: self,
            source,
            token,
            pending: Vec::new(),
        }
    }

    /// Classify a single pre-extracted record (the EventBridge path), with
    /// an optional log-type hint from the envelope.
    pub fn process_record(&mut self, record: &str, log_type_hint: Option<&str>) -> Vec<ProcessedEvent> {
        let result = match log_type_hint {
            Some(hint) => self.classifier.classify_with_hint(record, hint),
            None => self.classifier.classify(record),
        };

        if !result.matched {
            debug!(misses = result.num_miss, "record did not classify");
            return Vec::new();
        }

        let log_type = result.log_type;
        result
            .events
            .into_iter()
            .filter(|event| self.first_sighting(&event.event_id))
            .map(|event| ProcessedEvent::new(event, &log_type))
            .collect()
    }

    /// True exactly once per event id (modulo the configured false-positive
    /// rate); adds the id as a side effect.
    fn first_sighting(&self, event_id: &str) -> bool {
        match &self.bloom_filter {
            Some(filter) => {
                if filter.test(event_id) {
                    false
                } else {
                    filter.add(event_id);
                    true
                }
            }
            None => true,
        }
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

enum Source {
    /// Pre-split records from a CloudTrail file body.
    Records(std::vec::IntoIter<String>),
    /// Anything else, scanned line by line.
    Lines(std::vec::IntoIter<String>),
}

fn detect_source(data: &[u8]) -> Source {
    #[derive(serde::Deserialize)]
    struct CloudTrailFile<'a> {
        #[serde(rename = "Records", borrow)]
        records: Option<Vec<&'a RawValue>>,
    }

    if let Ok(file) = serde_json::from_slice::<CloudTrailFile>(data) {
        if let Some(records) = file.records {
            if !records.is_empty() {
                let owned: Vec<String> =
                    records.into_iter().map(|r| r.get().to_owned()).collect();
                return Source::Records(owned.into_iter());
            }
        }
    }

    let lines: Vec<String> = String::from_utf8_lossy(data)
        .lines()
        .map(|l| l.to_owned())
        .collect();
    Source::Lines(lines.into_iter())
}

pub struct ProcessedEventStream<'a> {
    processor: &'a mut Processor,
    source: Source,
    token: &'a CancellationToken,
    pending: Vec<ProcessedEvent>,
}

impl Iterator for ProcessedEventStream<'_> {
    type Item = ProcessedEvent;

    fn next(&mut self) -> Option<ProcessedEvent> {
        loop {
            if let Some(event) = self.pending.pop() {
                return Some(event);
            }

            if self.token.is_cancelled() {
                return None;
            }

            let record = match &mut self.source {
                Source::Records(records) => records.next()?,
                Source::Lines(lines) => lines.next()?,
            };

            if record.is_empty() {
                continue;
            }

            let mut produced = self.processor.process_record(&record, None);
            // popped from the back, so keep file order
            produced.reverse();
            self.pending = produced;
        }
    }
}
