use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use whiz_search::api;
use whiz_search::config::Config;
use whiz_search::queue::fs::LocalFs;
use whiz_search::queue::worker::Worker;
use whiz_search::queue::TaskQueue;
use whiz_search::state::AppState;

#[derive(Parser)]
#[command(name = "whiz-search", version, about = "Multi-collection knowledge-base search")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve POST /query and GET /health (default)
    Serve,
    /// Process tasks from the shared queue directory until Ctrl-C
    Worker,
    /// Drop a task into the queue's todo directory
    Submit {
        /// Task type: search, ping or wait
        #[arg(long = "type")]
        task_type: String,
        /// Extra payload fields as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Run one query and print the results as JSON
    Search {
        query: String,
        #[arg(short = 'n', long)]
        n_results: Option<usize>,
        /// Blend in lexical scoring
        #[arg(long)]
        hybrid: bool,
    },
    /// Print todo/processing/completed counts
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Worker => run_worker(config).await,
        Command::Submit { task_type, payload } => submit(&config, &task_type, &payload),
        Command::Search {
            query,
            n_results,
            hybrid,
        } => search(config, &query, n_results, hybrid).await,
        Command::Status => {
            let counts = open_queue(&config)?.counts()?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            Ok(())
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Vector store: {}", config.chroma.base_url);
    tracing::info!(
        "Embeddings: {} ({}, model {})",
        config.embedding.provider,
        config.embedding.base_url,
        config.embedding.model
    );
    tracing::info!("Collections: {}", config.collections.join(", "));

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config)?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn open_queue(config: &Config) -> anyhow::Result<TaskQueue> {
    let fs = LocalFs::open(&config.queue.root).with_context(|| {
        format!("Failed to open queue directory {}", config.queue.root.display())
    })?;
    Ok(TaskQueue::new(Arc::new(fs), &config.queue.machine_name))
}

async fn run_worker(config: Config) -> anyhow::Result<()> {
    let queue = open_queue(&config)?;
    tracing::info!(
        "Queue root {} as machine {}",
        config.queue.root.display(),
        queue.machine()
    );

    let state = AppState::new(config.clone())?;
    let worker = Worker::new(
        queue,
        state.engine.clone(),
        state.hybrid.clone(),
        &config.queue,
        &config.search,
    );

    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing current task");
            let _ = tx.send(true);
        }
        // Keep the sender alive so the worker only stops on request
        std::future::pending::<()>().await;
    });

    worker.run(rx).await
}

fn submit(config: &Config, task_type: &str, payload: &str) -> anyhow::Result<()> {
    let mut fields: Map<String, Value> =
        serde_json::from_str(payload).context("--payload must be a JSON object")?;
    fields.insert("type".to_string(), Value::String(task_type.to_string()));

    let name = open_queue(config)?.submit(Value::Object(fields))?;
    println!("{name}");
    Ok(())
}

async fn search(
    config: Config,
    query: &str,
    n_results: Option<usize>,
    hybrid: bool,
) -> anyhow::Result<()> {
    let state = AppState::new(config)?;
    let n = state.result_count(n_results);

    let outcome = if hybrid {
        state.hybrid.search(query, n).await
    } else {
        state.engine.search(query, n).await
    };
    if outcome.backend_unavailable() {
        anyhow::bail!("Knowledge base is unavailable: every collection failed");
    }

    if !outcome.failed_collections.is_empty() {
        tracing::warn!("Failed collections: {}", outcome.failed_collections.join(", "));
    }
    println!("{}", serde_json::to_string_pretty(&outcome.results)?);
    Ok(())
}
