//! Adaptive multi-format classification.
//!
//! The classifier probes registered parsers in penalty order: every miss
//! pops the candidate and bumps its penalty, every hit resets the winner's
//! penalty to zero. Workloads are heavily skewed toward one log-type per
//! source, so after a handful of lines the right parser sits at the heap
//! root and classification is a single peek.

pub mod parser_queue;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::Utc;

use crate::parsers::LogParser;
use crate::types::event::NormalizedEvent;
use parser_queue::{ParserPriorityQueue, ParserQueueItem};

#[derive(Debug, Default, Clone)]
pub struct ClassifierResult {
    pub events: Vec<NormalizedEvent>,
    pub matched: bool,
    pub log_type: String,
    pub num_miss: usize,
}

/// Aggregate counters across all lines seen by one classifier.
#[derive(Debug, Default, Clone)]
pub struct ClassifierStats {
    pub classify_time_micros: u64,
    pub bytes_processed: u64,
    pub line_count: u64,
    pub event_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
}

/// Per-parser counters, keyed by log-type.
#[derive(Debug, Default, Clone)]
pub struct ParserStats {
    pub parse_time_micros: u64,
    pub bytes_processed: u64,
    pub line_count: u64,
    pub event_count: u64,
}

pub struct AdaptiveClassifier {
    parsers: ParserPriorityQueue,
    stats: ClassifierStats,
    parser_stats: HashMap<String, ParserStats>,
}

/// A parser panic is a parser miss, not a pipeline crash.
fn safe_parse(item: &mut ParserQueueItem, line: &str) -> anyhow::Result<Vec<NormalizedEvent>> {
    let parser = &mut item.parser;
    match catch_unwind(AssertUnwindSafe(|| parser.parse(line))) {
        Ok(result) => result,
        Err(_) => anyhow::bail!("parser {:?} panicked", item.log_type),
    }
}

impl AdaptiveClassifier {
    pub fn new(parsers: Vec<(&'static str, Box<dyn LogParser>)>) -> Self {
        AdaptiveClassifier {
            parsers: ParserPriorityQueue::new(parsers),
            stats: ClassifierStats::default(),
            parser_stats: HashMap::new(),
        }
    }

    pub fn stats(&self) -> &ClassifierStats {
        &self.stats
    }

    pub fn parser_stats(&self) -> &HashMap<String, ParserStats> {
        &self.parser_stats
    }

    /// Try parsers in penalty order until one owns the line. The winner's
    /// penalty resets to 0; every miss costs one penalty point. Items popped
    /// along the way are pushed back before returning, so the heap always
    /// holds the full parser set between calls.
    pub fn classify(&mut self, line: &str) -> ClassifierResult {
        if line.is_empty() {
            return ClassifierResult::default();
        }

        let start = Utc::now();
        let mut result = ClassifierResult::default();
        let line_trimmed = line.trim();

        if !line_trimmed.is_empty() {
            let mut set_aside: Vec<ParserQueueItem> = Vec::new();

            while !self.parsers.is_empty() {
                let parse_start = Utc::now();
                let (log_type, outcome) = {
                    // Unwrap is fine: the loop condition guarantees a root.
                    let root = self.parsers.root_mut().unwrap();
                    (root.log_type, safe_parse(root, line_trimmed))
                };
                let parse_micros =
                    (Utc::now() - parse_start).num_microseconds().unwrap_or(0) as u64;

                match outcome {
                    Ok(events) => {
                        self.parsers.set_root_penalty(0);
                        result.matched = true;
                        result.log_type = log_type.to_string();

                        let parser_stat = self
                            .parser_stats
                            .entry(log_type.to_string())
                            .or_default();
                        parser_stat.parse_time_micros += parse_micros;
                        parser_stat.bytes_processed += line_trimmed.len() as u64;
                        parser_stat.line_count += 1;
                        parser_stat.event_count += events.len() as u64;

                        result.events = events;
                        break;
                    }
                    Err(_) => {
                        let mut item = self
                            .parsers
                            .pop_root()
                            .expect("heap root vanished during classify");
                        item.penalty += 1;
                        set_aside.push(item);
                        result.num_miss += 1;
                    }
                }
            }

            for item in set_aside {
                self.parsers.push(item);
            }
        }

        self.record_line(line_trimmed, start, &result);
        result
    }

    /// Hinted variant: try the named parser first without touching any
    /// penalties; fall back to the normal protocol on a miss.
    pub fn classify_with_hint(&mut self, line: &str, log_type_hint: &str) -> ClassifierResult {
        if line.is_empty() {
            return ClassifierResult::default();
        }

        let line_trimmed = line.trim();
        if !line_trimmed.is_empty() {
            if let Some(item) = self.parsers.find_mut(log_type_hint) {
                let start = Utc::now();
                let log_type = item.log_type;
                if let Ok(events) = safe_parse(item, line_trimmed) {
                    let result = ClassifierResult {
                        matched: true,
                        log_type: log_type.to_string(),
                        num_miss: 0,
                        events,
                    };
                    self.record_line(line_trimmed, start, &result);
                    return result;
                }
            }
        }

        self.classify(line)
    }

    fn record_line(&mut self, line: &str, start: chrono::DateTime<Utc>, result: &ClassifierResult) {
        self.stats.classify_time_micros +=
            (Utc::now() - start).num_microseconds().unwrap_or(0) as u64;
        self.stats.bytes_processed += line.len() as u64;
        self.stats.line_count += 1;
        if result.matched {
            self.stats.success_count += 1;
            self.stats.event_count += result.events.len() as u64;
        } else if result.num_miss != 0 {
            self.stats.failure_count += 1;
        }
    }

    /// Log-type label currently at the heap root; what the next line will
    /// be probed with first.
    pub fn front_log_type(&self) -> Option<&'static str> {
        self.parsers.peek().map(|item| item.log_type)
    }
}
