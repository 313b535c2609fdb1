pub mod bloom;
pub mod catalog;
pub mod classification;
pub mod cli;
pub mod cloud_providers;
pub mod config_manager;
pub mod datalake;
pub mod dedup;
pub mod engine;
pub mod forwarder;
pub mod ingest;
pub mod parsers;
pub mod processor;
pub mod state;
pub mod tracing;
pub mod types;
pub mod watcher;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use tokio_util::sync::CancellationToken;
use ::tracing::{error, info, warn};

use crate::bloom::BloomFilter;
use crate::catalog::{Catalog, GlueCatalog};
use crate::cloud_providers::aws::{load_sdk_config, S3Client, SqsClient};
use crate::config_manager::Config;
use crate::datalake::DataLakeWriter;
use crate::dedup::Deduplicator;
use crate::engine::RuleEngine;
use crate::forwarder::{Forwarder, Output, WebhookOutput};
use crate::ingest::{ObjectPipeline, SqsIngestLoop};
use crate::processor::Processor;
use crate::state::StateStore;
use crate::watcher::DirectoryWatcher;

fn build_forwarder(config: &Config) -> Result<Arc<Forwarder>> {
    let deduplicator = Deduplicator::open(Path::new(&config.state_file))
        .context("open alert deduplicator")?;

    let mut outputs: Vec<Box<dyn Output>> = Vec::new();
    if !config.alert_webhook_url.is_empty() {
        outputs.push(Box::new(WebhookOutput::new(&config.alert_webhook_url)?));
    }

    Ok(Arc::new(Forwarder::new(
        deduplicator,
        outputs,
        config.dedup_window_minutes,
    )))
}

fn build_engine(config: &Config) -> Result<Arc<RuleEngine>> {
    if config.rules_dir.is_empty() {
        bail!("rules directory is required");
    }
    Ok(Arc::new(RuleEngine::new(
        &config.python,
        &config.engine_path,
        &config.rules_dir,
    )))
}

fn load_bloom_filter(config: &Config) -> Result<Option<Arc<BloomFilter>>> {
    if config.bloom_file.is_empty() {
        return Ok(None);
    }
    let filter = BloomFilter::load(
        Path::new(&config.bloom_file),
        config.bloom_expected_items,
        config.bloom_false_positive_rate,
    )?;
    Ok(Some(Arc::new(filter)))
}

fn build_processor(bloom_filter: &Option<Arc<BloomFilter>>) -> Processor {
    match bloom_filter {
        Some(filter) => Processor::with_bloom_filter(filter.clone()),
        None => Processor::new(),
    }
}

async fn build_lake_writer(
    config: &Config,
    sdk_config: &aws_config::SdkConfig,
) -> Option<DataLakeWriter> {
    if config.data_lake_bucket.is_empty() {
        return None;
    }

    let store = Arc::new(S3Client::new(sdk_config));
    let max_age = Duration::seconds(config.lake_max_buffer_age_secs);

    if config.glue_database.is_empty() {
        return Some(DataLakeWriter::new(
            store,
            &config.data_lake_bucket,
            config.lake_max_buffer_bytes,
            max_age,
        ));
    }

    let catalog: Arc<dyn Catalog> = Arc::new(GlueCatalog::new(
        aws_sdk_glue::Client::new(sdk_config),
        &config.glue_database,
        &config.data_lake_bucket,
    ));
    if let Err(err) = catalog.ensure_database().await {
        warn!(error = %err, "failed to ensure glue database");
    }

    Some(DataLakeWriter::with_catalog(
        store,
        &config.data_lake_bucket,
        config.lake_max_buffer_bytes,
        max_age,
        catalog,
    ))
}

fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            signal_token.cancel();
        }
    });
    token
}

/// The daemon mode: pull object notifications from the queue until
/// interrupted, then flush buffers and persist the bloom filter.
#[tokio::main]
pub async fn run_sqs(config: Config) -> Result<()> {
    if config.sqs_queue_url.is_empty() {
        bail!("queue URL is required in sqs mode");
    }

    info!(queue = %config.sqs_queue_url, "starting SQS processor");

    let sdk_config = load_sdk_config(&config.aws_region).await;
    let state = Arc::new(StateStore::open(Path::new(&config.state_file))?);
    let engine = build_engine(&config)?;
    let forwarder = build_forwarder(&config)?;
    let bloom_filter = load_bloom_filter(&config)?;

    let token = shutdown_token();

    let receivers = config.receiver_concurrency.max(1);
    let mut tasks = Vec::with_capacity(receivers);
    for receiver_id in 0..receivers {
        let queue = SqsClient::new(&sdk_config, &config.sqs_queue_url);
        let fetcher = Arc::new(S3Client::new(&sdk_config));
        let lake_writer = build_lake_writer(&config, &sdk_config).await;
        // classifier state is per receiver, never shared
        let pipeline = ObjectPipeline::new(
            fetcher,
            build_processor(&bloom_filter),
            state.clone(),
            engine.clone(),
            forwarder.clone(),
            lake_writer,
        );
        let mut ingest_loop = SqsIngestLoop::new(
            queue,
            pipeline,
            config.queue_max_messages,
            config.queue_wait_time_secs,
            config.queue_visibility_timeout_secs,
        );

        let loop_token = token.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = ingest_loop.run(&loop_token).await {
                error!(receiver_id, error = %err, "receiver loop failed");
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }

    if let Some(filter) = &bloom_filter {
        if let Err(err) = filter.save() {
            warn!(error = %err, "failed to save bloom filter");
        }
    }

    Ok(())
}

/// Process one local file through classify → detect → alert and exit.
#[tokio::main]
pub async fn run_once(config: Config, file: &str) -> Result<()> {
    info!(file, "processing file");

    let sdk_config = load_sdk_config(&config.aws_region).await;
    let state = Arc::new(StateStore::open(Path::new(&config.state_file))?);
    let engine = build_engine(&config)?;
    let forwarder = build_forwarder(&config)?;
    let bloom_filter = load_bloom_filter(&config)?;

    let mut pipeline = ObjectPipeline::new(
        Arc::new(S3Client::new(&sdk_config)),
        build_processor(&bloom_filter),
        state,
        engine,
        forwarder,
        build_lake_writer(&config, &sdk_config).await,
    );

    let data = std::fs::read(file).with_context(|| format!("open file {}", file))?;
    let token = CancellationToken::new();
    let (events, matches) = pipeline.run_detection(&data, &token).await?;
    pipeline.shutdown().await?;

    if let Some(filter) = &bloom_filter {
        filter.save().ok();
    }

    info!(events, matches, "finished processing file");
    println!("processed {} events, {} matches", events, matches);
    Ok(())
}

/// Watch a directory tree, feeding new json/jsonl files through the
/// pipeline until interrupted.
#[tokio::main]
pub async fn run_watch(config: Config, dir: &str) -> Result<()> {
    let sdk_config = load_sdk_config(&config.aws_region).await;
    let state = Arc::new(StateStore::open(Path::new(&config.state_file))?);
    let engine = build_engine(&config)?;
    let forwarder = build_forwarder(&config)?;
    let bloom_filter = load_bloom_filter(&config)?;

    let mut pipeline = ObjectPipeline::new(
        Arc::new(S3Client::new(&sdk_config)),
        build_processor(&bloom_filter),
        state.clone(),
        engine,
        forwarder,
        build_lake_writer(&config, &sdk_config).await,
    );

    let token = shutdown_token();
    let watcher = DirectoryWatcher::new(
        Path::new(dir),
        state,
        StdDuration::from_secs(config.watch_poll_interval_secs),
    );
    watcher.watch(&mut pipeline, &token).await?;

    if let Some(filter) = &bloom_filter {
        if let Err(err) = filter.save() {
            warn!(error = %err, "failed to save bloom filter");
        }
    }

    Ok(())
}
