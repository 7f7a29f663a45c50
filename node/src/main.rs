//! Cross-shard engine node binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xshard_core::NodeConfig;
use xshard_node::NodeBuilder;

#[derive(Parser)]
#[command(name = "xshard-node")]
#[command(about = "Cross-shard commit, checkpoint and rollback engine")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides the configuration file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulated cross-shard transfers
    Simulate {
        /// Number of transfers to run
        #[arg(short, long, default_value = "1")]
        rounds: usize,

        /// Break balance conservation on the last shard to force a rollback
        #[arg(long)]
        faulty: bool,

        /// Persist transactions and checkpoints to the data directory
        #[arg(long)]
        persist: bool,
    },

    /// Show what a previous run left in the data directory
    Inspect,

    /// Evict aged checkpoints and finished transactions from the data directory
    Cleanup,

    /// Print the default configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => NodeConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Simulate {
            rounds,
            faulty,
            persist,
        } => {
            let mut builder = NodeBuilder::new().config(config);
            if persist {
                builder = builder.persist();
            }
            let node = builder.build()?;

            let reports = node.simulate(rounds, faulty).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }

        Commands::Inspect => {
            info!("Inspecting {}", config.data_dir.display());
            let node = NodeBuilder::new().config(config).persist().build()?;
            println!("{}", serde_json::to_string_pretty(&node.inspect()?)?);
        }

        Commands::Cleanup => {
            let node = NodeBuilder::new().config(config).persist().build()?;
            let report = node.cleanup()?;
            println!(
                "Evicted {} checkpoints, removed {} transactions",
                report.checkpoints_evicted, report.transactions_removed
            );
        }

        Commands::Config => {
            println!("{}", config.to_json()?);
        }
    }

    Ok(())
}
