use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relayer_core::{
    bus::open_bus_factory,
    chains,
    relayer::{self, DefaultChainFactory},
    Config, Server,
};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a config file
    ValidateConfig {
        /// Config file path (.json or .toml)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Run every enabled handler until interrupted
    Start {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Queue a single source tx by hash
    Relay {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// Source chain id
        #[arg(long)]
        chain: u64,
        /// Source tx hash
        #[arg(long)]
        tx: String,
    },
}

fn print_summary(config: &Config) {
    println!("Config is valid");
    match config.poly.chain_id {
        Some(id) => println!("- poly: chain id {}, {} nodes", id, config.poly.nodes.len()),
        None => println!("- poly: {} nodes", config.poly.nodes.len()),
    }
    println!("- chains:");
    for chain in &config.chains {
        let enabled: Vec<&str> = chain
            .handlers()
            .iter()
            .filter(|h| h.enabled())
            .map(|h| h.name())
            .collect();
        println!(
            "  - {} ({}): {}",
            chains::chain_name(chain.chain_id),
            chain.chain_id,
            enabled.join(", ")
        );
    }
    match &config.bus.path {
        Some(path) => println!("- bus: sled at {:?}", path),
        None => println!("- bus: in memory"),
    }
    println!(
        "- relayer: poll {}s, retry {}s up to {}s",
        config.relayer.poll_interval, config.relayer.retry_delay, config.relayer.max_retry_delay
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            info!("Validating config file {:?}", config);
            let config = Config::load(config)?;
            print_summary(&config);
            Ok(())
        }
        Commands::Start { config } => {
            info!("Starting relayer with config {:?}", config);
            let config = Config::load(config)?;

            let mut server = Server::from_config(config)?;
            if let Err(e) = server.start().await {
                error!("Relayer failed to start: {}", e);
                server.stop().await?;
                return Err(e.into());
            }
            info!("Relayer is running, press ctrl-c to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            server.stop().await?;
            info!("Relayer stopped");
            Ok(())
        }
        Commands::Relay { config, chain, tx } => {
            let config = Config::load(config)?;
            if config.bus.path.is_none() {
                anyhow::bail!("Relay needs a persistent bus, set bus.path in the config");
            }
            let buses = open_bus_factory(&config.bus)?;
            let factory = DefaultChainFactory::new(config.poly.clone());
            let queued = relayer::replay(&config, &factory, buses.as_ref(), chain, &tx).await?;
            println!("{}", serde_json::to_string_pretty(&queued)?);
            Ok(())
        }
    }
}
