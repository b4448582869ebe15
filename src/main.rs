//! Sumi-Distill main entry point
//!
//! This is the command-line interface for the Sumi-Distill summarization
//! pipeline.

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use sumi_distill::config::{load_config_with_hash, Config, ExecutionStrategy};
use sumi_distill::pipeline::print_statistics;
use sumi_distill::summarize::SummaryEvent;
use sumi_distill::{OpenAiProvider, Pipeline};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Sumi-Distill: Summarize web documents
///
/// Sumi-Distill fetches each URL, extracts its readable text, splits it into
/// token-bounded chunks and condenses them through a language model. Results
/// are cached, so repeating a request is free until the entry expires.
#[derive(Parser, Debug)]
#[command(name = "sumi-distill")]
#[command(version = "1.0.0")]
#[command(about = "Summarize web documents with a language model", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// URLs or local file paths to summarize together
    #[arg(value_name = "URL", required = true)]
    urls: Vec<String>,

    /// Focus the summary on a question or topic
    #[arg(long)]
    query: Option<String>,

    /// Print the final summary as it is generated
    #[arg(long, conflicts_with = "dry_run")]
    stream: bool,

    /// Fetch, extract and chunk, then report without calling the provider
    #[arg(long)]
    dry_run: bool,

    /// Drop expired cache entries before running
    #[arg(long)]
    purge_cache: bool,

    /// Increase logging verbosity (-v, -vv, -vvv); -v also prints statistics
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.stream {
        config.pipeline.execution_strategy = ExecutionStrategy::Streaming;
    }

    let provider = OpenAiProvider::from_config(&config.provider).context("Failed to set up provider")?;
    let pipeline = Pipeline::init(&config, Arc::new(provider)).context("Failed to initialize pipeline")?;

    if cli.purge_cache {
        let removed = pipeline.purge_cache().context("Failed to purge cache")?;
        tracing::info!("Purged {} cache entries", removed);
    }

    let result = if cli.dry_run {
        handle_dry_run(&pipeline, &config, &cli.urls).await
    } else {
        tokio::select! {
            result = handle_summarize(&pipeline, &cli) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, cancelling request");
                Err(anyhow::anyhow!("Interrupted"))
            }
        }
    };

    if cli.verbose > 0 {
        println!();
        print_statistics(&pipeline.stats());
    }
    pipeline.shutdown().await;

    result
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs go to stderr so that stdout carries only the summary.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_distill=info,warn"),
            1 => EnvFilter::new("sumi_distill=debug,info"),
            2 => EnvFilter::new("sumi_distill=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows what would be sent to the provider
async fn handle_dry_run(pipeline: &Pipeline, config: &Config, urls: &[String]) -> anyhow::Result<()> {
    let prepared = pipeline.prepare(urls).await?;

    println!("=== Sumi-Distill Dry Run ===\n");

    println!("Inputs ({}):", urls.len());
    for url in urls {
        println!("  - {}", url);
    }

    println!("\nPipeline:");
    println!("  Provider: {} ({})", config.provider.name, config.provider.model);
    println!("  Strategy: {}", config.pipeline.execution_strategy.as_str());
    println!(
        "  Failure policy: {}",
        config.pipeline.per_chunk_failure_policy.as_str()
    );
    println!(
        "  Max concurrent map calls: {}",
        config.pipeline.max_concurrent_map_calls
    );

    println!("\nExtracted text:");
    println!("  Bytes: {}", prepared.text.len());
    println!("  Structural blocks: {}", prepared.hints.blocks.len());
    if prepared.degraded_extraction {
        println!("  ! Some documents used the naive extraction fallback");
    }

    println!("\nChunks ({}):", prepared.chunks.len());
    for chunk in &prepared.chunks {
        println!(
            "  #{:<3} {:>5} tokens  bytes {}..{}{}",
            chunk.chunk_index,
            chunk.token_count,
            chunk.start_pos,
            chunk.end_pos,
            if chunk.is_semantic_boundary { "" } else { "  (hard split)" }
        );
    }

    println!(
        "\n✓ Would make {} map call(s) plus a reduce step",
        prepared.chunks.len()
    );

    Ok(())
}

/// Handles the main summarize operation
async fn handle_summarize(pipeline: &Pipeline, cli: &Cli) -> anyhow::Result<()> {
    tracing::info!("Summarizing {} input(s)", cli.urls.len());

    if !cli.stream {
        let summary = pipeline.summarize(&cli.urls, cli.query.as_deref()).await?;
        println!("{}", summary);
        return Ok(());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        let mut printed = false;
        while let Some(event) = rx.recv().await {
            match event {
                SummaryEvent::Delta(text) => {
                    printed = true;
                    let _ = write!(stdout, "{}", text);
                    let _ = stdout.flush();
                }
                SummaryEvent::ChunkDone {
                    chunk_index,
                    status,
                    completed,
                    total,
                } => {
                    tracing::debug!(chunk_index, ?status, "Mapped {}/{}", completed, total);
                }
                SummaryEvent::State(state) => tracing::debug!("Engine state: {}", state),
                SummaryEvent::Complete => {
                    let _ = writeln!(stdout);
                }
            }
        }
        printed
    });

    let result = pipeline
        .summarize_with_events(&cli.urls, cli.query.as_deref(), Some(tx))
        .await;
    // The sender is dropped with the request, which ends the printer
    let printed = printer.await.unwrap_or(false);
    let summary = result?;
    if !printed {
        println!("{}", summary);
    }

    Ok(())
}
