//! Directory-watch ingestion mode: poll a directory tree for JSON/JSONL
//! files and run each new one through the object pipeline. Files already in
//! `processed_files` are skipped, so restarts pick up where they left off.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ingest::ObjectPipeline;
use crate::state::StateStore;

pub struct DirectoryWatcher {
    dir: PathBuf,
    state: Arc<StateStore>,
    poll_interval: Duration,
}

impl DirectoryWatcher {
    pub fn new(dir: &Path, state: Arc<StateStore>, poll_interval: Duration) -> Self {
        DirectoryWatcher {
            dir: dir.to_path_buf(),
            state,
            poll_interval,
        }
    }

    /// Scan, process, sleep, repeat until cancelled. A final pass is not
    /// attempted on shutdown; unprocessed files are picked up next run.
    pub async fn watch(
        &self,
        pipeline: &mut ObjectPipeline,
        token: &CancellationToken,
    ) -> Result<()> {
        info!(dir = %self.dir.display(), "watching directory");

        while !token.is_cancelled() {
            self.scan_once(pipeline, token).await?;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = token.cancelled() => break,
            }
        }

        pipeline.shutdown().await?;
        Ok(())
    }

    /// One pass over the tree: process every unseen json/jsonl file.
    pub async fn scan_once(
        &self,
        pipeline: &mut ObjectPipeline,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut files = Vec::new();
        collect_log_files(&self.dir, &mut files)?;
        files.sort();

        for path in files {
            if token.is_cancelled() {
                break;
            }

            let path_str = path.to_string_lossy().to_string();
            if self.state.is_file_processed(&path_str)? {
                continue;
            }

            let metadata = std::fs::metadata(&path)
                .with_context(|| format!("stat {:?}", path))?;
            if metadata.len() == 0 {
                continue;
            }

            info!(path = %path.display(), "processing file");
            let data = std::fs::read(&path).with_context(|| format!("read {:?}", path))?;

            match pipeline.run_detection(&data, token).await {
                Ok((events, matches)) => {
                    info!(path = %path.display(), events, matches, "file processed");
                    self.state.mark_file_processed(&path_str)?;
                }
                Err(err) => {
                    // Left unmarked: retried on the next scan.
                    warn!(path = %path.display(), error = %err, "error processing file");
                }
            }
        }

        Ok(())
    }
}

fn collect_log_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "cannot read directory");
            return Ok(());
        }
    };

    for entry in entries {
        let entry = entry.context("read directory entry")?;
        let path = entry.path();
        if path.is_dir() {
            collect_log_files(&path, files)?;
        } else if is_log_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_log_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("json") | Some("jsonl")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_log_file() {
        assert!(is_log_file(Path::new("/logs/a.json")));
        assert!(is_log_file(Path::new("/logs/a.jsonl")));
        assert!(!is_log_file(Path::new("/logs/a.txt")));
        assert!(!is_log_file(Path::new("/logs/nodot")));
    }

    #[test]
    fn test_collect_log_files_recurses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("nested/b.jsonl"), "{}").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), "x").unwrap();

        let mut files = Vec::new();
        collect_log_files(dir.path(), &mut files).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_missing_directory_is_not_fatal() {
        let mut files = Vec::new();
        collect_log_files(Path::new("/no/such/dir"), &mut files).unwrap();
        assert!(files.is_empty());
    }
}
