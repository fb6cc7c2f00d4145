use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use failtrack::config::AppConfig;
use failtrack::reconcile::types::BuildOutcome;
use failtrack::reconcile::BuildCompletion;
use failtrack::render::{parse_changes, BuildContext};
use failtrack::server::{create_router, AppState};
use failtrack::shutdown::wait_for_shutdown;

#[derive(Parser)]
#[command(name = "failtrack", about = "Keeps a GitHub issue open while a CI job is failing")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the build webhook (default)
    Serve,
    /// Reconcile a single completed build and exit
    Notify {
        /// Job name
        #[arg(long)]
        job: String,
        /// Build result: success, failure, unstable, or anything else
        #[arg(long)]
        outcome: String,
        #[arg(long)]
        build_number: Option<u64>,
        /// Display name of the build, e.g. "#42"
        #[arg(long)]
        build: Option<String>,
        #[arg(long)]
        build_url: Option<String>,
        /// Repository to file issues in when the job has none configured
        #[arg(long)]
        repository: Option<String>,
        /// File holding the build output
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// How many trailing log lines to keep
        #[arg(long, default_value_t = 200)]
        log_lines: usize,
        /// Changes since the last success, one `author|revision|message` per
        /// line, or a JSON array
        #[arg(long)]
        changes: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Notify {
            job,
            outcome,
            build_number,
            build,
            build_url,
            repository,
            log_file,
            log_lines,
            changes,
        } => {
            let log_tail = match log_file {
                Some(path) => read_log_tail(&path, log_lines).await,
                None => Vec::new(),
            };
            let changes = match changes.as_deref().map(parse_changes).transpose() {
                Ok(changes) => changes.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unparseable --changes");
                    Vec::new()
                }
            };
            let completion = BuildCompletion {
                context: BuildContext {
                    job_name: job.clone(),
                    build_number,
                    display_name: build.unwrap_or_default(),
                    url: build_url.unwrap_or_default(),
                    log_tail,
                    changes,
                },
                job,
                outcome: BuildOutcome::from(outcome.as_str()),
                repository,
                previous_builds: Vec::new(),
            };
            notify(config, completion).await
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    if config.webhook_secret().is_empty() {
        anyhow::bail!("runner.webhook_secret must be set to serve build webhooks");
    }

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        store = %config.store.dir.display(),
        "Starting failtrack server"
    );

    let state = Arc::new(AppState::new(config.clone()).await?);
    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// One-shot reconciliation. Problems are reported, but the exit status stays
/// zero so the calling build is never failed by issue tracking.
async fn notify(config: AppConfig, completion: BuildCompletion) -> anyhow::Result<()> {
    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(error = %e, "GitHub issue tracking will not run for this build");
            return Ok(());
        }
    };

    let report = state.handle_completion(&completion).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn read_log_tail(path: &std::path::Path, lines: usize) -> Vec<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let contents = String::from_utf8_lossy(&bytes);
            let all: Vec<&str> = contents.lines().collect();
            let start = all.len().saturating_sub(lines);
            all[start..].iter().map(|l| l.to_string()).collect()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read build log");
            Vec::new()
        }
    }
}
