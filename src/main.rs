use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use threadlens::{
    ClaudeAnalyzer, JobPhase, JobRegistry, SqliteStorage, ThreadLensConfig,
};
use tokio::fs;
use tracing::{info, Level};

#[derive(Parser)]
#[clap(name = "threadlens")]
#[clap(about = "Chat transcript thread extraction and batch analysis")]
#[clap(version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (JSON)
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to serve on
        #[clap(short, long)]
        port: Option<u16>,
    },

    /// Extract threads from a raw transcript log into a session
    Extract {
        /// Input log file
        #[clap(short, long)]
        input: PathBuf,

        /// Session to add the threads to (a new one is created if omitted)
        #[clap(short, long)]
        session: Option<String>,
    },

    /// Analyze not-yet-analyzed threads of a session and wait for the result
    Analyze {
        /// Session id
        #[clap(short, long)]
        session: String,

        /// How many threads to analyze in this run
        #[clap(short = 'n', long)]
        count: Option<usize>,
    },

    /// Print a session's consolidated report as JSON
    Report {
        /// Session id
        #[clap(short, long)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = if let Some(config_path) = &cli.config {
        let content = fs::read_to_string(config_path)
            .await
            .with_context(|| format!("reading config from {}", config_path.display()))?;
        serde_json::from_str::<ThreadLensConfig>(&content).context("parsing config file")?
    } else {
        ThreadLensConfig::default()
    };
    if config.analyzer_api_key.is_none() {
        config.analyzer_api_key = std::env::var("ANTHROPIC_API_KEY").ok();
    }

    match cli.command {
        Commands::Serve { port } => {
            require_api_key(&config)?;
            let port = port.unwrap_or(config.port);
            let registry = build_registry(&config).await?;
            threadlens::web::serve(registry, port).await?;
        }

        Commands::Extract { input, session } => {
            let raw = fs::read_to_string(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let registry = build_registry(&config).await?;
            let outcome = registry.extract_threads(session, &raw).await?;
            for warning in &outcome.warnings {
                eprintln!("warning: {}", warning);
            }
            println!(
                "session {}: {} threads",
                outcome.session_id, outcome.thread_count
            );
        }

        Commands::Analyze { session, count } => {
            require_api_key(&config)?;
            let registry = build_registry(&config).await?;
            let requested = registry.start_analysis(&session, count).await?;
            info!("analyzing {} threads", requested);
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let progress = registry.get_progress(&session).await?;
                match progress.phase {
                    JobPhase::Analyzing | JobPhase::Cancelling => {
                        info!(
                            "analyzed {}/{}",
                            progress.analyzed_count, progress.requested_count
                        );
                    }
                    JobPhase::Failed => {
                        anyhow::bail!(
                            "analysis failed: {}",
                            progress.last_error.unwrap_or_default()
                        );
                    }
                    _ => break,
                }
            }
            let report = registry.get_report(&session).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Report { session } => {
            let registry = build_registry(&config).await?;
            let report = registry.get_report(&session).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn require_api_key(config: &ThreadLensConfig) -> Result<()> {
    if config.analyzer_api_key.is_none() {
        anyhow::bail!("no analyzer API key configured (set ANTHROPIC_API_KEY)");
    }
    Ok(())
}

async fn build_registry(config: &ThreadLensConfig) -> Result<JobRegistry> {
    let storage = Arc::new(SqliteStorage::new(&config.database_path).await?);
    let api_key = config.analyzer_api_key.clone().unwrap_or_default();
    let analyzer = Arc::new(ClaudeAnalyzer::new(
        config.analyzer_base_url.clone(),
        api_key,
        config.analyzer_model.clone(),
        Duration::from_secs(config.analyzer_timeout_secs),
    )?);
    Ok(JobRegistry::new(config.clone(), storage, analyzer))
}
