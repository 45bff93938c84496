//! Timeflow CLI
//!
//! Command-line interface for a local timeflow store:
//! - Put events and read ranges
//! - Run streaming queries
//! - Feed the sampler
//! - Run a self-contained demo

use anyhow::Context;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use timeflow::config::{generate_default_config, Config};
use timeflow::pipeline::EventStream;
use timeflow::query::{parse, Node, Registry, TYPE_FAUCET, TYPE_MOVING_AVERAGE};
use timeflow::sampler::{SampleKind, Sampler, SamplerConfig};
use timeflow::storage::codec::decode_value;
use timeflow::storage::{now, Event, EventStore, StorageConfig, Store, Timestamp, Value};
use tokio::time::{interval, sleep, Duration};
use tokio_util::sync::CancellationToken;

/// Accepted wall-clock format, always UTC
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DEMO_LATENCY_KEY: &str = "demo.latency";
const DEMO_REQUESTS_KEY: &str = "demo.requests";

#[derive(Parser)]
#[command(name = "timeflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Time-ordered event store with live queries and sampling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store one event
    Put {
        /// Event key
        key: String,
        /// Value; parsed as a number or boolean when possible, otherwise text
        value: String,
        /// Event time as "YYYY-MM-DD HH:MM:SS" (UTC) or unix seconds (default: now)
        #[arg(short, long)]
        time: Option<String>,
    },

    /// Print the records of a key in a time range as JSON
    Range {
        /// Event key
        key: String,
        /// Range start, "YYYY-MM-DD HH:MM:SS" (UTC) or unix seconds
        #[arg(short, long)]
        from: String,
        /// Range end (default: now)
        #[arg(short, long)]
        to: Option<String>,
    },

    /// Run a streaming query and print its events as JSON lines
    Query {
        /// Query document, or @path to read it from a file
        query: String,
        /// Stop after this many seconds (default: run until Ctrl-C)
        #[arg(short, long)]
        seconds: Option<u64>,
    },

    /// Record one sample and flush it
    Sample {
        /// counter or timer
        kind: String,
        /// Event key
        key: String,
        /// Sample value
        value: f64,
        /// Sample rate in (0, 1]
        #[arg(short, long, default_value = "1.0")]
        rate: f64,
    },

    /// Feed synthetic samples through the sampler and watch a moving average
    Demo {
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },

    /// Print the default config file
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    timeflow::logging::init(&config.logging);

    tracing::debug!("Timeflow v{}", env!("CARGO_PKG_VERSION"));

    let storage_config = StorageConfig::from(&config.storage);
    let sampler_config = SamplerConfig::from(&config.sampler);

    match cli.command {
        Commands::Put { key, value, time } => {
            let store = open_store(&storage_config)?;

            let time = match time.as_deref() {
                None => now(),
                Some(s) => parse_time(s).unwrap_or_else(|e| {
                    tracing::warn!("Error parsing time, using now: {}", e);
                    now()
                }),
            };
            let value = parse_value(&value);

            store.put(&[Event::new(key.as_str(), time, value.clone())]).await?;
            println!("Stored {} = {} at {}", key, value, format_time(time));
        }

        Commands::Range { key, from, to } => {
            let store = open_store(&storage_config)?;

            let from = parse_time(&from)?;
            let to = match to.as_deref() {
                Some(s) => parse_time(s)?,
                None => now(),
            };

            let series = store.get(&key, from, to).await?;
            println!("{}", serde_json::to_string_pretty(&series)?);
        }

        Commands::Query { query, seconds } => {
            let store = open_store(&storage_config)?;

            let text = match query.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read query file {}", path))?,
                None => query,
            };

            let registry = Registry::with_defaults(store);
            let source = parse(&text)?.eval(&registry)?;
            let printed = print_stream(source.stream().await?, seconds).await?;
            tracing::info!(events = printed, "Query finished");
        }

        Commands::Sample {
            kind,
            key,
            value,
            rate,
        } => {
            let store = open_store(&storage_config)?;
            let kind: SampleKind = kind.parse()?;

            let sampler = Sampler::new(sampler_config, Arc::clone(&store));
            sampler.sample(&key, value, rate, kind)?;

            let events = sampler.flush();
            store.put(&events).await?;
            for event in &events {
                println!("Flushed {} {} = {}", kind, event.key, event.value());
            }
        }

        Commands::Demo { seconds } => {
            // Always volatile so the demo never touches the real data directory
            let demo_config = StorageConfig {
                data_dir: None,
                ..storage_config
            };
            run_demo(open_store(&demo_config)?, sampler_config, seconds).await?;
        }

        Commands::Config => {
            print!("{}", generate_default_config());
        }
    }

    Ok(())
}

fn open_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.data_dir {
        Some(dir) => tracing::info!("Data directory: {:?}", dir),
        None => tracing::info!("Running in memory"),
    }

    let store = EventStore::open(config).context("Failed to open event store")?;
    Ok(Arc::new(store))
}

fn parse_time(s: &str) -> anyhow::Result<Timestamp> {
    if let Ok(ts) = s.trim().parse::<i64>() {
        return Ok(ts);
    }

    let dt = NaiveDateTime::parse_from_str(s.trim(), TIME_FORMAT).with_context(|| {
        format!("Invalid time {:?}: expected \"YYYY-MM-DD HH:MM:SS\" or unix seconds", s)
    })?;
    Ok(dt.and_utc().timestamp())
}

fn format_time(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Numbers and booleans keep their type; anything else is stored as text
fn parse_value(raw: &str) -> Value {
    decode_value(raw).unwrap_or_else(|_| Value::Str(raw.to_string()))
}

/// Print events as JSON lines until the stream ends, the deadline passes or
/// Ctrl-C; the stream is stopped on every exit path
async fn print_stream(mut stream: EventStream, seconds: Option<u64>) -> anyhow::Result<usize> {
    let deadline = sleep(seconds.map_or(Duration::MAX, Duration::from_secs));
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut printed = 0;
    let result = loop {
        tokio::select! {
            _ = &mut deadline => break Ok(()),
            _ = &mut ctrl_c => break Ok(()),
            event = stream.recv() => match event {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(line) => {
                        println!("{}", line);
                        printed += 1;
                    }
                    Err(e) => break Err(e),
                },
                None => break Ok(()),
            },
        }
    };

    stream.stop();
    result?;
    Ok(printed)
}

async fn run_demo(store: Arc<dyn Store>, config: SamplerConfig, seconds: u64) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let sampler = Arc::new(Sampler::new(config, Arc::clone(&store)));
    let flusher = Arc::clone(&sampler).run(cancel.clone());
    let generator = tokio::spawn(generate_load(Arc::clone(&sampler), cancel.clone()));

    let registry = Registry::with_defaults(store);
    let query = Node::new(TYPE_MOVING_AVERAGE).param("window", 3).upstream(
        Node::new(TYPE_FAUCET)
            .param("key", DEMO_LATENCY_KEY)
            .param("from", -60),
    );
    println!("{}", serde_json::to_string(&query)?);

    let stream = query.eval(&registry)?.stream().await?;
    let printed = print_stream(stream, Some(seconds)).await?;

    cancel.cancel();
    generator.await?;
    flusher.await?;

    tracing::info!(events = printed, "Demo finished");
    Ok(())
}

/// Synthetic traffic: a latency wave sampled as a timer and a counter sampled at 50%
async fn generate_load(sampler: Arc<Sampler>, cancel: CancellationToken) {
    let mut ticker = interval(Duration::from_millis(50));
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tick += 1;
        let latency = 50.0 + 40.0 * (tick as f64 / 20.0).sin();

        if let Err(e) = sampler.sample(DEMO_LATENCY_KEY, latency, 1.0, SampleKind::Timer) {
            tracing::warn!("Demo sample failed: {}", e);
        }
        if tick % 2 == 0 {
            if let Err(e) = sampler.sample(DEMO_REQUESTS_KEY, 1.0, 0.5, SampleKind::Counter) {
                tracing::warn!("Demo sample failed: {}", e);
            }
        }
    }
}
