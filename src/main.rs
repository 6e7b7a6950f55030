use clap::Parser;
use miette::{IntoDiagnostic, Result};
use paybatch::application::aggregator::AggregationEngine;
use paybatch::application::dedup::DeduplicationService;
use paybatch::application::pipeline::{PaymentPipeline, UnavailablePolicy};
use paybatch::config::AppConfig;
use paybatch::domain::batch::Batch;
use paybatch::domain::message::PaymentMessage;
use paybatch::domain::ports::{ClockRef, DedupStorageBox, DedupStorageFactory, FlushSinkRef};
use paybatch::infrastructure::clock::TokioClock;
use paybatch::infrastructure::in_memory::InMemoryDedupStorage;
use paybatch::interfaces::csv::batch_writer::BatchWriter;
use paybatch::interfaces::csv::message_reader::MessageReader;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input payment messages CSV file
    input: PathBuf,

    /// JSON configuration file. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent dedup database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Number of messages that completes a batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Milliseconds after the first message before a batch completes (0 disables)
    #[arg(long)]
    batch_timeout_ms: Option<u64>,

    /// Milliseconds a dedup record stays live
    #[arg(long)]
    dedup_ttl_ms: Option<u64>,

    /// Keep aggregating when the dedup store is unreachable
    #[arg(long)]
    fail_open: bool,
}

impl Cli {
    fn load_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => {
                AppConfig::from_json_reader(File::open(path).into_diagnostic()?)
                    .into_diagnostic()?
            }
            None => AppConfig::default(),
        };
        if let Some(size) = self.batch_size {
            config.aggregation.size_threshold = size;
        }
        if let Some(timeout_ms) = self.batch_timeout_ms {
            config.aggregation.timeout_ms = timeout_ms;
        }
        if self.dedup_ttl_ms.is_some() {
            config.dedup.ttl_ms = self.dedup_ttl_ms;
        }
        config.dedup.fail_open |= self.fail_open;
        config.validate().into_diagnostic()?;
        Ok(config)
    }
}

/// Picks the dedup backend. Every store the factory yields shares the same data.
fn storage_factory(
    db_path: Option<PathBuf>,
    config: &AppConfig,
) -> Result<DedupStorageFactory> {
    if let Some(db_path) = db_path {
        #[cfg(feature = "storage-rocksdb")]
        {
            use paybatch::infrastructure::rocksdb::RocksDBStore;
            info!(path = %db_path.display(), "using persistent dedup storage");
            let store = RocksDBStore::open(db_path).into_diagnostic()?;
            return Ok(Box::new(move || Box::new(store.clone()) as DedupStorageBox));
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        {
            let _ = db_path;
            tracing::warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
            );
        }
    }
    let store = InMemoryDedupStorage::with_shards(config.dedup.storage_shards);
    Ok(Box::new(move || Box::new(store.clone()) as DedupStorageBox))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    let storage = storage_factory(cli.db_path.clone(), &config)?;
    let clock: ClockRef = Arc::new(TokioClock::current().into_diagnostic()?);
    let dedup = Arc::new(DeduplicationService::with_lock_stripes(
        storage(),
        clock.clone(),
        config.dedup.lock_stripes,
    ));

    let (tx, mut rx) = mpsc::unbounded_channel::<Batch<PaymentMessage>>();
    let sink: FlushSinkRef<PaymentMessage> = Arc::new(tx);
    let engine = AggregationEngine::build(clock, Some(sink), config.aggregation.shards);

    let on_unavailable = if config.dedup.fail_open {
        UnavailablePolicy::FailOpen
    } else {
        UnavailablePolicy::FailClosed
    };
    let pipeline = PaymentPipeline::new(dedup, engine, config.aggregation.policy())
        .with_ttl(config.dedup.ttl())
        .with_unavailable_policy(on_unavailable);

    // Process messages
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = MessageReader::new(file);
    for message in reader.messages() {
        match message {
            Ok(message) => {
                if let Err(e) = pipeline.ingest(message).await {
                    error!("Error processing message: {}", e);
                }
            }
            Err(e) => {
                error!("Error reading message: {}", e);
            }
        }
    }

    // Flush whatever is still open, then release the sink so the channel closes
    pipeline.shutdown();
    drop(pipeline);
    let mut batches = Vec::new();
    while let Some(batch) = rx.recv().await {
        batches.push(batch);
    }
    info!(batches = batches.len(), "replay finished");

    let stdout = io::stdout();
    let mut writer = BatchWriter::new(stdout.lock());
    writer.write_batches(&batches).into_diagnostic()?;

    Ok(())
}
