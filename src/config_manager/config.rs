use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_CONFIG_FILE_LOCATION_FROM_HOME: &str = ".config/cloudsift/cloudsift.toml";

const DEFAULT_AWS_REGION: &str = "us-east-1";
const DEFAULT_STATE_FILE: &str = "cloudsift.db";
const DEFAULT_PYTHON: &str = "python3";
const DEFAULT_ENGINE_PATH: &str = "engines/engine.py";
const DEFAULT_BLOOM_EXPECTED_ITEMS: usize = 10_000_000;
const DEFAULT_BLOOM_FALSE_POSITIVE_RATE: f64 = 0.001;
const DEFAULT_LAKE_MAX_BUFFER_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_LAKE_MAX_BUFFER_AGE_SECS: i64 = 60;
const DEFAULT_DEDUP_WINDOW_MINUTES: i64 = 60;
const DEFAULT_QUEUE_WAIT_TIME_SECS: i32 = 20;
const DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS: i32 = 300;
const DEFAULT_QUEUE_MAX_MESSAGES: i32 = 10;
const DEFAULT_RECEIVER_CONCURRENCY: usize = 1;
const DEFAULT_WATCH_POLL_INTERVAL_SECS: u64 = 2;

/// On-disk shape; everything optional so a partial file overlays the
/// defaults.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ConfigFile {
    pub aws_region: Option<String>,
    pub sqs_queue_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub data_lake_bucket: Option<String>,
    pub glue_database: Option<String>,
    pub rules_dir: Option<String>,
    pub python: Option<String>,
    pub engine_path: Option<String>,
    pub state_file: Option<String>,
    pub bloom_file: Option<String>,
    pub bloom_expected_items: Option<usize>,
    pub bloom_false_positive_rate: Option<f64>,
    pub lake_max_buffer_bytes: Option<usize>,
    pub lake_max_buffer_age_secs: Option<i64>,
    pub dedup_window_minutes: Option<i64>,
    pub queue_wait_time_secs: Option<i32>,
    pub queue_visibility_timeout_secs: Option<i32>,
    pub queue_max_messages: Option<i32>,
    pub receiver_concurrency: Option<usize>,
    pub watch_poll_interval_secs: Option<u64>,
    pub alert_webhook_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub aws_region: String,
    pub sqs_queue_url: String,
    pub s3_bucket: String,
    pub data_lake_bucket: String,
    pub glue_database: String,
    pub rules_dir: String,
    pub python: String,
    pub engine_path: String,
    pub state_file: String,
    pub bloom_file: String,
    pub bloom_expected_items: usize,
    pub bloom_false_positive_rate: f64,
    pub lake_max_buffer_bytes: usize,
    pub lake_max_buffer_age_secs: i64,
    pub dedup_window_minutes: i64,
    pub queue_wait_time_secs: i32,
    pub queue_visibility_timeout_secs: i32,
    pub queue_max_messages: i32,
    pub receiver_concurrency: usize,
    pub watch_poll_interval_secs: u64,
    pub alert_webhook_url: String,
}

pub struct ConfigManager;

impl ConfigManager {
    fn get_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_FILE_LOCATION_FROM_HOME))
    }

    pub fn default_config() -> Config {
        Self::merge(ConfigFile::default())
    }

    fn merge(file: ConfigFile) -> Config {
        Config {
            aws_region: file
                .aws_region
                .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string()),
            sqs_queue_url: file.sqs_queue_url.unwrap_or_default(),
            s3_bucket: file.s3_bucket.unwrap_or_default(),
            data_lake_bucket: file.data_lake_bucket.unwrap_or_default(),
            glue_database: file.glue_database.unwrap_or_default(),
            rules_dir: file.rules_dir.unwrap_or_default(),
            python: file.python.unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
            engine_path: file
                .engine_path
                .unwrap_or_else(|| DEFAULT_ENGINE_PATH.to_string()),
            state_file: file
                .state_file
                .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string()),
            bloom_file: file.bloom_file.unwrap_or_default(),
            bloom_expected_items: file
                .bloom_expected_items
                .unwrap_or(DEFAULT_BLOOM_EXPECTED_ITEMS),
            bloom_false_positive_rate: file
                .bloom_false_positive_rate
                .unwrap_or(DEFAULT_BLOOM_FALSE_POSITIVE_RATE),
            lake_max_buffer_bytes: file
                .lake_max_buffer_bytes
                .unwrap_or(DEFAULT_LAKE_MAX_BUFFER_BYTES),
            lake_max_buffer_age_secs: file
                .lake_max_buffer_age_secs
                .unwrap_or(DEFAULT_LAKE_MAX_BUFFER_AGE_SECS),
            dedup_window_minutes: file
                .dedup_window_minutes
                .unwrap_or(DEFAULT_DEDUP_WINDOW_MINUTES),
            queue_wait_time_secs: file
                .queue_wait_time_secs
                .unwrap_or(DEFAULT_QUEUE_WAIT_TIME_SECS),
            queue_visibility_timeout_secs: file
                .queue_visibility_timeout_secs
                .unwrap_or(DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS),
            queue_max_messages: file.queue_max_messages.unwrap_or(DEFAULT_QUEUE_MAX_MESSAGES),
            receiver_concurrency: file
                .receiver_concurrency
                .unwrap_or(DEFAULT_RECEIVER_CONCURRENCY),
            watch_poll_interval_secs: file
                .watch_poll_interval_secs
                .unwrap_or(DEFAULT_WATCH_POLL_INTERVAL_SECS),
            alert_webhook_url: file.alert_webhook_url.unwrap_or_default(),
        }
    }

    fn load_config_file(path: &PathBuf) -> Result<ConfigFile> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("parse config file {:?}", path))
    }

    /// Defaults, overlaid by the config file when present, overlaid by
    /// `CLOUDSIFT_*` environment variables.
    pub fn load_config() -> Config {
        let mut config = match Self::get_config_path() {
            Some(path) if path.exists() => match Self::load_config_file(&path) {
                Ok(file) => Self::merge(file),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to load config, using defaults");
                    Self::default_config()
                }
            },
            _ => Self::default_config(),
        };

        Self::apply_env_overrides(&mut config);
        config
    }

    fn apply_env_overrides(config: &mut Config) {
        if let Ok(value) = std::env::var("CLOUDSIFT_AWS_REGION") {
            config.aws_region = value;
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_SQS_QUEUE_URL") {
            config.sqs_queue_url = value;
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_DATA_LAKE_BUCKET") {
            config.data_lake_bucket = value;
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_GLUE_DATABASE") {
            config.glue_database = value;
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_RULES_DIR") {
            config.rules_dir = value;
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_STATE_FILE") {
            config.state_file = value;
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_BLOOM_FILE") {
            config.bloom_file = value;
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_BLOOM_EXPECTED_ITEMS") {
            if let Ok(parsed) = value.parse() {
                config.bloom_expected_items = parsed;
            }
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_BLOOM_FALSE_POSITIVE_RATE") {
            if let Ok(parsed) = value.parse() {
                config.bloom_false_positive_rate = parsed;
            }
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_DEDUP_WINDOW_MINUTES") {
            if let Ok(parsed) = value.parse() {
                config.dedup_window_minutes = parsed;
            }
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_RECEIVER_CONCURRENCY") {
            if let Ok(parsed) = value.parse() {
                config.receiver_concurrency = parsed;
            }
        }
        if let Ok(value) = std::env::var("CLOUDSIFT_ALERT_WEBHOOK_URL") {
            config.alert_webhook_url = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConfigManager::default_config();
        assert_eq!(config.aws_region, DEFAULT_AWS_REGION);
        assert_eq!(config.dedup_window_minutes, 60);
        assert_eq!(config.queue_wait_time_secs, 20);
        assert_eq!(config.queue_visibility_timeout_secs, 300);
        assert_eq!(config.queue_max_messages, 10);
        assert_eq!(config.receiver_concurrency, 1);
        assert_eq!(config.lake_max_buffer_bytes, 50 * 1024 * 1024);
        assert_eq!(config.bloom_false_positive_rate, 0.001);
    }

    #[test]
    fn test_partial_file_overlays_defaults() {
        let raw = r#"
            aws_region = "eu-west-1"
            dedup_window_minutes = 30
        "#;
        let file: ConfigFile = toml::from_str(raw).unwrap();
        let config = ConfigManager::merge(file);
        assert_eq!(config.aws_region, "eu-west-1");
        assert_eq!(config.dedup_window_minutes, 30);
        // untouched fields keep their defaults
        assert_eq!(config.queue_max_messages, 10);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        // keeps old config files working across option renames
        let raw = r#"
            aws_region = "eu-west-1"
            retired_option = true
        "#;
        let file: Result<ConfigFile> =
            toml::from_str(raw).map_err(anyhow::Error::from);
        assert!(file.is_ok());
    }
}
