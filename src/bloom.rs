//! Persistent probabilistic set of observed event ids.
//!
//! A positive answer means *probably seen*; a negative answer is definitive.
//! The filter is shared across every classifier call in the process under a
//! reader-writer discipline and persisted with a temp-file-then-rename swap
//! so a crash mid-save never corrupts the previous state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use growable_bloom_filter::GrowableBloom;
use tracing::{info, warn};

pub struct BloomFilter {
    inner: RwLock<GrowableBloom>,
    path: PathBuf,
}

impl BloomFilter {
    /// Load the filter from `path`, or start a fresh one when the file is
    /// missing or unreadable. Corruption is an operator warning, not a
    /// startup failure: a fresh filter only costs duplicate lake writes
    /// until it re-warms.
    pub fn load(path: &Path, expected_items: usize, false_positive_rate: f64) -> Result<Self> {
        let filter = match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<GrowableBloom>(&bytes) {
                Ok(filter) => {
                    info!(path = %path.display(), "loaded bloom filter from disk");
                    filter
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to read bloom filter, creating new one"
                    );
                    GrowableBloom::new(false_positive_rate, expected_items)
                }
            },
            Err(_) => {
                info!(
                    capacity = expected_items,
                    false_positive_rate, "creating new bloom filter"
                );
                GrowableBloom::new(false_positive_rate, expected_items)
            }
        };

        Ok(BloomFilter {
            inner: RwLock::new(filter),
            path: path.to_path_buf(),
        })
    }

    pub fn test(&self, data: &str) -> bool {
        let filter = self.inner.read().expect("bloom filter lock poisoned");
        filter.contains(data)
    }

    pub fn add(&self, data: &str) {
        let mut filter = self.inner.write().expect("bloom filter lock poisoned");
        filter.insert(data);
    }

    /// Write to `<path>.tmp` and rename over the target. Rename is atomic on
    /// the filesystems we run on; a crash leaves either the old or the new
    /// file, never a torn one.
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let filter = self.inner.read().expect("bloom filter lock poisoned");
            let bytes = serde_json::to_vec(&*filter).context("serialize bloom filter")?;
            fs::write(&tmp_path, bytes)
                .with_context(|| format!("write bloom temp file {:?}", tmp_path))?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("rename bloom filter into place at {:?}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_test() {
        let dir = tempfile::tempdir().unwrap();
        let filter = BloomFilter::load(&dir.path().join("bloom.state"), 1000, 0.001).unwrap();

        assert!(!filter.test("event-1"));
        filter.add("event-1");
        assert!(filter.test("event-1"));
        assert!(!filter.test("event-2"));
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bloom.state");

        let filter = BloomFilter::load(&path, 1000, 0.001).unwrap();
        filter.add("persisted-event");
        filter.save().unwrap();

        let reloaded = BloomFilter::load(&path, 1000, 0.001).unwrap();
        assert!(reloaded.test("persisted-event"));
        assert!(!reloaded.test("never-seen"));
    }

    #[test]
    fn test_corrupt_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bloom.state");
        fs::write(&path, b"definitely not a bloom filter").unwrap();

        let filter = BloomFilter::load(&path, 1000, 0.001).unwrap();
        assert!(!filter.test("anything"));
        filter.add("anything");
        assert!(filter.test("anything"));
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bloom.state");
        let filter = BloomFilter::load(&path, 100, 0.01).unwrap();
        filter.add("x");
        filter.save().unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
