use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use weft_core::AgentType;
use weft_engine::{EngineConfig, WorkflowEngine};
use weft_store::SqliteStore;

#[derive(Parser)]
#[command(name = "weft", about = "Weft — workflow coordination engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the maintenance loop until interrupted
    Maintain,
    /// Run one maintenance pass and print its report
    Sweep,
    /// List sessions with batch and checkpoint counts
    Sessions {
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List active agents
    Agents {
        /// Only agents of this type (execution, monitoring, quality, custom)
        #[arg(long = "type")]
        agent_type: Option<AgentType>,
    },
    /// List tasks ready to run
    Ready {
        /// Only tasks of this batch
        #[arg(long)]
        batch: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print task counts of a batch
    Batch { batch_id: String },
    /// Print quality-gate statistics over the configured window
    Gates {
        /// Only gates of this type
        #[arg(long = "type")]
        gate_type: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct WeftConfig {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default)]
    engine: EngineConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

async fn load_config(path: &Path) -> anyhow::Result<WeftConfig> {
    let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
    })?;
    let config: WeftConfig = toml::from_str(&config_str)?;
    config.engine.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let db_path = config.data_dir.join("weft.db");
    let store = Arc::new(SqliteStore::open(&db_path)?);
    info!(path = %db_path.display(), "Store opened");
    let engine = WorkflowEngine::with_system_clock(store, config.engine)?;

    match cli.command {
        Commands::Maintain => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let handle = engine.spawn_maintenance(shutdown_rx);
            info!(
                interval_secs = engine.config().sweep_interval_seconds,
                "Maintenance loop running, Ctrl-C to stop"
            );
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
            shutdown_tx.send(true)?;
            handle.await?;
        }
        Commands::Sweep => {
            let report = engine.maintenance().run_once().await?;
            print_json(&report)?;
        }
        Commands::Sessions { skip, limit } => {
            let sessions = engine.sessions().list_with_stats(skip, limit).await?;
            if sessions.is_empty() {
                println!("No sessions.");
            } else {
                print_json(&sessions)?;
            }
        }
        Commands::Agents { agent_type } => {
            let agents = engine.registry().list_active(agent_type, None).await?;
            if agents.is_empty() {
                println!("No active agents.");
            } else {
                print_json(&agents)?;
            }
        }
        Commands::Ready { batch, limit } => {
            let ready = engine
                .scheduler()
                .ready_tasks(batch.as_deref(), limit)
                .await?;
            print_json(&ready)?;
        }
        Commands::Batch { batch_id } => {
            match engine.scheduler().get_batch(&batch_id).await? {
                Some(detail) => {
                    let stats = engine.scheduler().batch_statistics(&batch_id).await?;
                    println!("{} ({})", detail.batch.name, detail.batch.status);
                    print_json(&stats)?;
                }
                None => println!("No batch '{batch_id}'."),
            }
        }
        Commands::Gates { gate_type } => {
            let stats = engine
                .gates()
                .statistics(gate_type.as_deref(), None)
                .await?;
            print_json(&stats)?;
        }
    }

    Ok(())
}
