use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::config_manager::ConfigManager;

#[derive(Parser, Debug)]
#[command(name = "cloudsift", about = "Security-log ingestion and detection pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume object notifications from SQS (the daemon mode)
    Sqs(SqsArgs),
    /// Process a single local JSONL/JSON file and exit
    Once(OnceArgs),
    /// Watch a directory tree for new log files
    Watch(WatchArgs),
}

#[derive(Default, Args, Debug, Clone)]
pub struct SqsArgs {
    /// queue URL to receive object notifications from
    #[clap(long)]
    pub queue_url: Option<String>,

    /// rules directory handed to the detection engine
    #[clap(long)]
    pub rules: Option<String>,

    /// S3 bucket for the processed-event data lake
    #[clap(long)]
    pub data_lake_bucket: Option<String>,

    /// bloom filter state file for event dedup
    #[clap(long)]
    pub bloom_file: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct OnceArgs {
    /// path to the jsonl file to process
    pub file: String,

    /// rules directory handed to the detection engine
    #[clap(long)]
    pub rules: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// directory tree to watch for json/jsonl files
    pub dir: String,

    /// rules directory handed to the detection engine
    #[clap(long)]
    pub rules: Option<String>,
}

pub fn process_cli() -> Result<()> {
    let cli = Cli::parse();

    crate::tracing::init_tracing();
    let mut config = ConfigManager::load_config();

    match cli.command {
        Command::Sqs(args) => {
            if let Some(queue_url) = args.queue_url {
                config.sqs_queue_url = queue_url;
            }
            if let Some(rules) = args.rules {
                config.rules_dir = rules;
            }
            if let Some(bucket) = args.data_lake_bucket {
                config.data_lake_bucket = bucket;
            }
            if let Some(bloom_file) = args.bloom_file {
                config.bloom_file = bloom_file;
            }
            crate::run_sqs(config)
        }
        Command::Once(args) => {
            if let Some(rules) = args.rules {
                config.rules_dir = rules;
            }
            crate::run_once(config, &args.file)
        }
        Command::Watch(args) => {
            if let Some(rules) = args.rules {
                config.rules_dir = rules;
            }
            crate::run_watch(config, &args.dir)
        }
    }
}
