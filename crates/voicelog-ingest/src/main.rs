//! Voicelog Ingest - export ingestion tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use voicelog_common::logging::{init_logging, LogConfig, LogLevel};

use voicelog_ingest::{
    config::{IngestConfig, PipelineConfig},
    driver::{IngestionDriver, Summary},
    filename::FileNameParser,
    markup::MarkupExtractor,
    normalize::{IdentifierPolicy, IdentifierPrecedence, RecordNormalizer},
    reconcile::DuplicatePolicy,
    source::{LocalDirSource, ObjectSource, S3ObjectSource},
    store::{AggregateStore, MemoryStore, PgAggregateStore},
};

#[derive(Parser, Debug)]
#[command(name = "voicelog-ingest")]
#[command(author, version, about = "Ingest phone-service exports into conversation aggregates")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest every export document under a prefix
    Run(RunArgs),

    /// Parse one local export file and print what it yields
    Inspect {
        /// Export file; its name must follow the export naming convention
        file: PathBuf,

        #[command(flatten)]
        identifiers: IdentifierArgs,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Key prefix to list (defaults to S3_PREFIX, or everything)
    #[arg(short, long)]
    prefix: Option<String>,

    /// Read documents from a local export directory instead of S3
    #[arg(long, env = "VOICELOG_LOCAL_DIR")]
    local_dir: Option<PathBuf>,

    /// Write to an in-memory store and discard the result
    #[arg(long)]
    dry_run: bool,

    /// Objects processed concurrently
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Behaviour for identifiers that already have stored state
    #[arg(long, value_name = "history|skip-existing")]
    policy: Option<DuplicatePolicy>,

    /// Reject objects whose file name timestamp does not parse
    #[arg(long)]
    strict_timestamps: bool,

    #[command(flatten)]
    identifiers: IdentifierArgs,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct IdentifierArgs {
    /// How identifiers are written before they become store keys
    #[arg(long, value_name = "verbatim|strip-plus")]
    identifier_policy: Option<IdentifierPolicy>,

    /// Which identifier wins when the file name and markup disagree
    #[arg(long, value_name = "markup|filename")]
    precedence: Option<IdentifierPrecedence>,
}

impl IdentifierArgs {
    fn apply(&self, pipeline: &mut PipelineConfig) {
        if let Some(policy) = self.identifier_policy {
            pipeline.identifier_policy = policy;
        }
        if let Some(precedence) = self.precedence {
            pipeline.identifier_precedence = precedence;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("voicelog-ingest")
        .filter_directives("sqlx=warn,aws_config=warn,aws_smithy_runtime=warn,html5ever=warn")
        .build();

    // Merge with environment variables (they take precedence)
    let log_config = log_config.merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Inspect { file, identifiers } => inspect(file, identifiers).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = IngestConfig::load()?;

    if let Some(dir) = args.local_dir {
        config.source.local_dir = Some(dir);
    }
    if let Some(concurrency) = args.concurrency {
        config.pipeline.concurrency = concurrency;
    }
    if let Some(policy) = args.policy {
        config.pipeline.duplicate_policy = policy;
    }
    if args.strict_timestamps {
        config.pipeline.strict_timestamps = true;
    }
    args.identifiers.apply(&mut config.pipeline);
    config.validate()?;

    let source: Arc<dyn ObjectSource> = match &config.source.local_dir {
        Some(dir) => Arc::new(LocalDirSource::new(dir)),
        None => Arc::new(S3ObjectSource::new(&config.source.s3).await),
    };

    let store: Arc<dyn AggregateStore> = if args.dry_run {
        info!("Dry run: aggregates are kept in memory and discarded");
        Arc::new(MemoryStore::new())
    } else {
        let store = PgAggregateStore::connect(&config.store)
            .await
            .context("Failed to connect to the aggregate database")?;
        store
            .migrate()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
        Arc::new(store)
    };

    let prefix = match (args.prefix, &config.source.local_dir) {
        (Some(prefix), _) => prefix,
        (None, Some(_)) => String::new(),
        (None, None) => config.source.s3.prefix.clone(),
    };

    let driver = IngestionDriver::new(source, store, config.pipeline.clone())?;

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    let summary = driver.run_prefix(&prefix, token).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_report(&summary);
    }

    Ok(())
}

async fn inspect(file: PathBuf, identifiers: IdentifierArgs) -> Result<()> {
    let key = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("Inspect needs a file path, not a directory")?;
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut pipeline = PipelineConfig::default();
    identifiers.apply(&mut pipeline);

    let parser = FileNameParser::new();
    let meta = parser.parse(&key)?;
    let filename_timestamp = parser.timestamp(&meta).map_err(|e| e.to_string());
    let extraction = MarkupExtractor::new()?.extract(&bytes, meta.category)?;

    let normalizer =
        RecordNormalizer::new(pipeline.identifier_policy, pipeline.identifier_precedence);
    let canonical: Vec<_> = extraction
        .records
        .iter()
        .cloned()
        .map(|raw| match normalizer.normalize(&meta, raw) {
            Ok(record) => json!({ "record": record }),
            Err(e) => json!({ "discarded": e.to_string(), "kind": e.kind() }),
        })
        .collect();

    let report = json!({
        "metadata": meta,
        "filename_timestamp": filename_timestamp.ok(),
        "shape": extraction.shape,
        "extracted": extraction.records,
        "skipped_fragments": extraction.skips,
        "canonical": canonical,
    });

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn print_report(summary: &Summary) {
    println!("Run {}", summary.run_id);
    println!(
        "  objects:  {} total, {} succeeded, {} skipped, {} failed, {} not started",
        summary.total, summary.succeeded, summary.skipped, summary.failed, summary.not_started
    );
    println!(
        "  records:  {} inserted, {} appended, {} duplicate, {} discarded",
        summary.records_inserted,
        summary.records_appended,
        summary.records_duplicate,
        summary.records_discarded
    );
    println!("  fragments skipped: {}", summary.fragments_skipped);
    println!(
        "  finished in {:.2}s{}",
        summary.duration_secs,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
}

/// Cancel the run on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, letting in-flight objects finish");
        },
        _ = terminate => {
            info!("Received terminate signal, letting in-flight objects finish");
        },
    }

    token.cancel();
}
