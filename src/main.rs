use clap::{Parser, Subcommand};
use clawtrics::config::ClawtricsConfig;
use clawtrics::engine::{EngineError, MetricsEngine};
use clawtrics::metrics::MetricsSnapshot;
use clawtrics::report;
use std::path::PathBuf;
use std::process::ExitCode;

/// Correlate OpenClaw agent runs from gateway logs and report usage metrics.
#[derive(Parser, Debug)]
#[command(name = "clawtrics", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file path
    #[arg(short, long, default_value = "clawtrics.toml", global = true)]
    config: PathBuf,

    /// Days to include (overrides config)
    #[arg(short, long, global = true)]
    days: Option<u32>,

    /// Log directory to read instead of the configured sources (repeatable)
    #[arg(long = "log-dir", value_name = "DIR", global = true)]
    log_dirs: Vec<PathBuf>,

    /// Parallel file workers (overrides config)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Totals, duration percentiles, top tools, models and channels
    Summary,
    /// Per-day table for the last two weeks
    Daily,
    /// Tool invocation counts
    Tools,
    /// Model, provider and thinking-mode usage
    Models,
    /// Tool transitions and shell commands
    Chains,
    /// Error counts by kind
    Errors,
    /// Full snapshot as pretty-printed JSON
    Json,
    /// Serve the metrics API and live stream
    #[cfg(feature = "serve")]
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
        /// Port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "clawtrics=debug"
    } else if cli.quiet {
        "clawtrics=warn"
    } else {
        "clawtrics=info"
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn load_config(cli: &Cli) -> Result<ClawtricsConfig, Box<dyn std::error::Error>> {
    let mut config = ClawtricsConfig::load(&cli.config)?;
    if let Some(days) = cli.days {
        config.window.days = days;
    }
    if let Some(workers) = cli.workers {
        config.ingest.workers = workers;
    }
    if !cli.log_dirs.is_empty() {
        config.override_roots(&cli.log_dirs);
    }
    config.validate()?;
    Ok(config)
}

async fn snapshot(config: ClawtricsConfig) -> Result<MetricsSnapshot, EngineError> {
    let days = config.window.days;
    MetricsEngine::new(config)?.snapshot(days).await
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;

    let out = match cli.command.unwrap_or(Command::Summary) {
        Command::Summary => report::summary(&snapshot(config).await?),
        Command::Daily => report::daily(&snapshot(config).await?),
        Command::Tools => report::tools(&snapshot(config).await?),
        Command::Models => report::models(&snapshot(config).await?),
        Command::Chains => report::chains(&snapshot(config).await?),
        Command::Errors => report::errors(&snapshot(config).await?),
        Command::Json => serde_json::to_string_pretty(&snapshot(config).await?)?,
        #[cfg(feature = "serve")]
        Command::Serve { bind, port } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.serve.bind = bind;
            }
            if let Some(port) = port {
                config.serve.port = port;
            }
            return clawtrics::serve::run(config).await;
        }
    };
    println!("{out}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
