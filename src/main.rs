//! elastic-fleet CLI - provision and launch a simulation slave fleet.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use elastic_fleet::config::{self, RunConfig};
use elastic_fleet::fleet::FleetClient;
use elastic_fleet::fleet::digitalocean::DigitalOceanClient;
use elastic_fleet::orchestrator::Orchestrator;
use elastic_fleet::partition::partition;
use elastic_fleet::remote::RemoteExecutor;
use elastic_fleet::remote::ssh::SshExecutor;
use elastic_fleet::report::ConsoleReporter;

#[derive(Parser)]
#[command(name = "elastic-fleet")]
#[command(about = "Provision a fleet of simulation slaves and launch them", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the slaves, distribute the simulations and launch them
    Run {
        /// Override the number of slaves polled and bootstrapped at once
        #[arg(short, long)]
        parallel: Option<usize>,
    },

    /// Show how the simulations would be split, without creating anything
    Plan,

    /// Validate configuration file
    Validate,

    /// Write a sample configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { parallel } => run_fleet(&cli.config, parallel, cli.verbose).await,
        Commands::Plan => plan_fleet(&cli.config),
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(&cli.config),
    }
}

fn load(config_path: &Path) -> Result<RunConfig> {
    config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
}

async fn run_fleet(config_path: &Path, parallel: Option<usize>, verbose: bool) -> Result<()> {
    let mut config = load(config_path)?;
    if let Some(parallel) = parallel {
        config.max_parallel = parallel;
    }

    info!("Loaded configuration from {}", config_path.display());

    let fleet = DigitalOceanClient::new(&config.api_url, &config.api_key);
    let executor = SshExecutor::new(&config.ssh);
    info!("Using fleet provider: {}", fleet.name());
    info!("Using remote executor: {}", executor.name());

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining work");
            signal_token.cancel();
        }
    });

    let orchestrator = Orchestrator::new(config, fleet, executor, ConsoleReporter::new(verbose))
        .with_cancellation_token(token);

    let report = orchestrator.run().await?;
    std::process::exit(report.exit_code());
}

fn plan_fleet(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    let plan = partition(&config.simulations, config.slaves_used)?;

    println!(
        "{} simulations over {} slaves",
        config.simulations.len(),
        plan.len()
    );
    for (index, shard) in plan.shards().iter().enumerate() {
        let jobs: Vec<String> = shard.iter().map(|job| job.to_string()).collect();
        println!("  slave {}: {}", index + 1, jobs.join(", "));
    }

    if !plan.dropped().is_empty() {
        println!();
        println!(
            "{}",
            console::style(format!(
                "{} simulations will not run: they do not divide evenly",
                plan.dropped().len()
            ))
            .yellow()
        );
    }

    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Slaves: {}", config.slaves_used);
            println!("  Simulations: {}", config.simulations.len());
            println!(
                "  Image: {} ({}, {})",
                config.slave_image.id, config.slave_image.region, config.slave_image.size
            );
            println!("  Master ip: {}", config.local_ip);
            println!("  Max parallel: {}", config.parallelism());
            println!(
                "  Alternate delivery: {}",
                if config.google_drive { "on" } else { "off" }
            );
            if let Some(id) = &config.master_droplet_id {
                println!("  Master droplet: {}", id);
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
    }

    let sample = json!({
        "api-key": "YOUR-DIGITALOCEAN-TOKEN",
        "slaves-used": 2,
        "slave-name": "elastic-slave",
        "slave-image": {
            "region": "nyc3",
            "size": "s-2vcpu-4gb",
            "id": "ubuntu-22-04-x64",
            "ssh_keys": []
        },
        "simulations": ["sim-1", "sim-2", "sim-3", "sim-4"],
        "local-ip": "10.0.0.1",
        "google-drive": false,
        "max-parallel": 1,
        "readiness": {
            "action-poll-secs": 60,
            "probe-interval-secs": 30,
            "max-action-polls": 60,
            "max-probe-attempts": 40,
            "errored-actions": "fail"
        }
    });

    std::fs::write(path, serde_json::to_string_pretty(&sample)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  elastic-fleet run");

    Ok(())
}
