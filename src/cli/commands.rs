//! CLI command definitions for fact-forge.
//!
//! One binary, three roles: `feed` assembles the corpus, `reader` and
//! `stocker` run the two worker kinds. Everything except per-run arguments
//! comes from the environment.

use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ForgeConfig;
use crate::export::DatasetAssembler;
use crate::goals::{GoalSet, ReaderProcessor};
use crate::llm::ChatClient;
use crate::metrics::{export_metrics, init_metrics};
use crate::scheduler::{
    RedisStore, RequestCoordinator, ResultStore, TaskProcessor, WorkerLoop, WorkerStats,
};
use crate::search::SearchClient;
use crate::stock::{AlphaVantageClient, StockProcessor};

/// Distributed fact-extraction pipeline for building financial training data.
#[derive(Parser)]
#[command(name = "fact-forge")]
#[command(about = "Build financial training corpora with Redis-coordinated workers")]
#[command(version)]
#[command(
    long_about = "fact-forge coordinates search/extraction and stock-performance workers through Redis.\n\nStart one or more workers, then run the feeder:\n  fact-forge reader\n  fact-forge stocker\n  fact-forge feed --num-points 100"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate datapoints and write a Parquet corpus.
    Feed(FeedArgs),

    /// Run the search/extraction worker.
    Reader(WorkerArgs),

    /// Run the stock-performance worker.
    Stocker(WorkerArgs),
}

/// Arguments for `fact-forge feed`.
#[derive(Parser, Debug)]
pub struct FeedArgs {
    /// Number of datapoints to generate (at most one per ticker).
    #[arg(short = 'n', long, default_value = "10", env = "FEED_NUM_POINTS")]
    pub num_points: usize,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments shared by the worker subcommands.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Worker name used in logs (overrides WORKER_ID).
    #[arg(long)]
    pub worker_id: Option<String>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = ForgeConfig::from_env()?;

    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics registry unavailable");
    }

    match cli.command {
        Commands::Feed(args) => run_feed_command(config, args).await,
        Commands::Reader(args) => run_reader_command(config, args).await,
        Commands::Stocker(args) => run_stocker_command(config, args).await,
    }
}

/// Connects to the store and checks it answers. Failure here is fatal.
async fn connect_store(config: &ForgeConfig) -> anyhow::Result<Arc<dyn ResultStore>> {
    let store = RedisStore::connect(&config.store.redis_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", config.store.redis_url, e))?;
    store
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("Store at {} is not answering: {}", config.store.redis_url, e))?;

    info!(url = %config.store.redis_url, "Connected to store");
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn run_feed_command(config: ForgeConfig, args: FeedArgs) -> anyhow::Result<()> {
    config.validate_for_feeder()?;
    let store = connect_store(&config).await?;

    let coordinator = Arc::new(RequestCoordinator::new(store, config.coordinator.clone()));
    let assembler = DatasetAssembler::new(
        coordinator.clone(),
        config.queues.clone(),
        config.feeder.clone(),
    );

    let summary = tokio::select! {
        result = assembler.run(args.num_points) => result?,
        _ = shutdown_signal() => {
            anyhow::bail!("Feed run interrupted");
        }
    };

    debug!(metrics = %export_metrics(), "Final metrics");

    if args.json {
        #[derive(Serialize)]
        struct FeedOutput<'a> {
            status: &'a str,
            summary: &'a crate::export::FeedSummary,
            coordinator: crate::scheduler::CoordinatorStats,
        }

        let output = FeedOutput {
            status: if summary.examples > 0 { "success" } else { "empty" },
            summary: &summary,
            coordinator: coordinator.stats(),
        };
        let json_output = serde_json::to_string_pretty(&output)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        let stats = &summary.stats;
        println!("✓ Feed run completed");
        match &summary.corpus_path {
            Some(path) => println!("  Corpus: {}", path.display()),
            None => println!("  Corpus: none written"),
        }
        println!(
            "  Datapoints: {} requested, {} generated, {} failed, {} skipped ({} cached fetches)",
            stats.requested, stats.generated, stats.failed, stats.skipped, stats.cached
        );
        println!("  Metrics: {}", summary.metrics.join(", "));
    }

    Ok(())
}

async fn run_reader_command(mut config: ForgeConfig, args: WorkerArgs) -> anyhow::Result<()> {
    if let Some(id) = args.worker_id {
        config.worker = config.worker.with_worker_id(id);
    }
    config.validate_for_reader()?;

    let goals = GoalSet::load(&config.reader.prompt_templates_path)?;
    info!(goals = goals.len(), "Loaded goal definitions");

    let reader = &config.reader;
    let search = SearchClient::new(
        reader.search_api_url_web.clone(),
        reader.search_api_url_news.clone(),
        reader.search_api_key.clone(),
    )?;
    let llm = ChatClient::new(reader.model_api_url.clone(), None)?;
    llm.wait_until_ready(
        &reader.model_name,
        reader.llm_ready_attempts,
        reader.llm_ready_timeout,
        reader.llm_ready_delay,
    )
    .await?;

    let store = connect_store(&config).await?;
    let processor = ReaderProcessor::new(goals, Arc::new(search), Arc::new(llm), reader.clone());

    let stats = run_worker(
        store,
        Arc::new(processor),
        &config.queues.search_queue,
        &config,
    )
    .await;
    report_worker_stats("reader", &stats);
    Ok(())
}

async fn run_stocker_command(mut config: ForgeConfig, args: WorkerArgs) -> anyhow::Result<()> {
    if let Some(id) = args.worker_id {
        config.worker = config.worker.with_worker_id(id);
    }
    config.validate_for_stocker()?;

    let stocker = &config.stocker;
    let client = AlphaVantageClient::new(
        stocker.api_url.clone(),
        stocker.api_key.clone(),
        stocker.request_timeout,
    )?;

    let store = connect_store(&config).await?;
    let processor = StockProcessor::new(store.clone(), Arc::new(client), stocker.clone());

    let stats = run_worker(
        store,
        Arc::new(processor),
        &config.queues.stock_queue,
        &config,
    )
    .await;
    report_worker_stats("stocker", &stats);
    Ok(())
}

async fn run_worker(
    store: Arc<dyn ResultStore>,
    processor: Arc<dyn TaskProcessor>,
    queue: &str,
    config: &ForgeConfig,
) -> WorkerStats {
    let worker = WorkerLoop::new(store, processor, queue, config.worker.clone());
    worker.run(shutdown_signal()).await
}

fn report_worker_stats(role: &str, stats: &WorkerStats) {
    info!(
        role = role,
        processed = stats.processed,
        failed = stats.failed,
        discarded = stats.discarded,
        "Worker stopped"
    );
    println!("✓ {} stopped", role);
    println!(
        "  Entries: {} processed, {} failed, {} discarded",
        stats.processed, stats.failed, stats.discarded
    );
}
