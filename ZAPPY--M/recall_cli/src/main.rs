mod config;
mod session;

use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use zappy_memory_data::{
    metadata_text, MemoryCoordinator, MemoryRecord, MemoryTelemetry, Metadata,
};
use zappy_task_engine::{
    CapabilityRegistry, LoopbackExecutor, ProcessExecutor, Purpose, RoutingExecutor, TaskEngine,
    TaskExecutor, TaskMode, TaskTelemetry,
};

use crate::{
    config::{AppConfig, ExecutorKind},
    session::Session,
};

#[derive(Parser, Debug)]
#[command(name = "recall", version, about = "Task runner with short- and long-term memory")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the long-term database path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Forces debug logging.
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reads tasks from stdin; a blank line runs the pending batch.
    Run(RunArgs),
    /// Stores a memory.
    Remember {
        content: String,
        /// Write straight to long-term storage.
        #[arg(long)]
        long: bool,
        /// Short-term lifetime in seconds.
        #[arg(long)]
        ttl: Option<u64>,
        /// Metadata entry, repeatable.
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Searches both memory tiers.
    Recall {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Deletes a long-term memory.
    Forget { id: Uuid },
    /// Lists the newest long-term memories.
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[arg(long)]
    mode: Option<TaskMode>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long, value_enum)]
    executor: Option<ExecutorKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.memory.db_path.clone_from(db);
    }
    let level = config.log_level(cli.debug)?;
    init_tracing(level);

    let logger = Arc::new(
        JsonLogger::with_options(&config.logging.file, config.logger_options(level))
            .with_context(|| format!("failed to open log {}", config.logging.file.display()))?,
    );
    let memory = MemoryCoordinator::open(&config.memory_config())
        .with_context(|| format!("failed to open {}", config.memory.db_path.display()))?
        .with_telemetry(
            MemoryTelemetry::builder("memory_data")
                .logger(Arc::clone(&logger))
                .build()?,
        );
    logger.log(
        &LogRecord::new("recall_cli", LogLevel::Info, "started").with_metadata(&json!({
            "command": format!("{:?}", cli.command),
            "db": config.memory.db_path,
        })),
    )?;

    let mut stdout = io::stdout().lock();
    match cli.command {
        Commands::Run(args) => {
            if let Some(mode) = args.mode {
                config.engine.mode = mode;
            }
            if let Some(concurrency) = args.concurrency {
                config.engine.concurrency = concurrency;
            }
            if let Some(executor) = args.executor {
                config.engine.executor = executor;
            }
            let engine = TaskEngine::new(build_executor(&config), config.engine.concurrency)
                .with_telemetry(
                    TaskTelemetry::builder("task_engine")
                        .logger(Arc::clone(&logger))
                        .build()?,
                );
            tracing::info!(
                mode = %config.engine.mode,
                concurrency = engine.concurrency(),
                "enter tasks, blank line to run, EOF to quit"
            );
            let session = Session::new(memory, engine, config.engine.mode, config.task_ttl());
            session
                .drive(BufReader::new(tokio::io::stdin()), &mut stdout)
                .await?;
            return Ok(());
        }
        Commands::Remember {
            content,
            long,
            ttl,
            meta,
        } => {
            let meta: Metadata = meta
                .into_iter()
                .map(|(key, value)| (key, value.into()))
                .collect();
            let record = if long {
                if ttl.is_some() {
                    bail!("--ttl only applies to short-term memories");
                }
                memory.remember_long(content, meta)?
            } else {
                let ttl = ttl.map_or(config.memory_config().default_ttl, Duration::from_secs);
                eprintln!("{}", short_term_notice(ttl));
                memory.remember_short_for(content, Some(ttl), meta)?
            };
            print_record(&mut stdout, &record)?;
        }
        Commands::Recall { query, limit } => {
            for record in memory.recall(&query, limit)? {
                print_record(&mut stdout, &record)?;
            }
        }
        Commands::Forget { id } => {
            if memory.forget_long(&id)? {
                writeln!(stdout, "forgot {id}")?;
            } else {
                writeln!(stdout, "no long-term memory {id}")?;
            }
        }
        Commands::List { limit } => {
            for record in memory.recent_long(limit)? {
                print_record(&mut stdout, &record)?;
            }
        }
    }
    memory.shutdown().context("failed to close memory")?;
    Ok(())
}

fn init_tracing(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.label()));
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn build_executor(config: &AppConfig) -> Arc<dyn TaskExecutor> {
    let kind = config.engine.executor;
    let timeout = config.engine.process_timeout_secs.map(Duration::from_secs);
    let registry = CapabilityRegistry::new().with(Purpose::General, move || {
        let executor: Arc<dyn TaskExecutor> = match kind {
            ExecutorKind::Loopback => Arc::new(LoopbackExecutor),
            ExecutorKind::Process => {
                let process = ProcessExecutor::new();
                Arc::new(match timeout {
                    Some(limit) => process.timeout(limit),
                    None => process,
                })
            }
        };
        Ok(executor)
    });
    Arc::new(RoutingExecutor::new(registry))
}

fn print_record(out: &mut impl Write, record: &MemoryRecord) -> Result<()> {
    let tier = if record.expires_at.is_some() {
        "short"
    } else {
        "long"
    };
    writeln!(
        out,
        "{} | {tier} | {} | {} | {}",
        record.id,
        record.created_at.to_rfc3339(),
        record.content,
        metadata_text(&record.metadata)
    )?;
    Ok(())
}

fn short_term_notice(ttl: Duration) -> String {
    format!(
        "note: short-term memories live in this process only (ttl {}s) and are gone when \
         `recall` exits; pass --long to persist",
        ttl.as_secs()
    )
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}
