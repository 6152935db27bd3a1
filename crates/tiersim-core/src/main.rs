//! TierSim CLI — simulate distributed service topologies without servers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tiersim_core::config::SimConfig;
use tiersim_core::metrics::format_table;
use tiersim_core::scenarios;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tiersim",
    about = "Simulate distributed service topologies without servers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario from a TOML configuration file.
    Run {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
        /// Override the configured horizon (milliseconds).
        #[arg(long)]
        horizon_ms: Option<f64>,
        /// Override the configured seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Output the full report to a JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the built-in multi-tier data center sample.
    Sample {
        /// Simulated-time horizon in milliseconds.
        #[arg(long, default_value = "5000")]
        horizon_ms: f64,
        /// Random seed.
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Output the full report to a JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse and validate a configuration file without running it.
    Check {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            horizon_ms,
            seed,
            output,
        } => {
            let mut sim_config = SimConfig::from_file(&config).unwrap_or_else(|e| {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            });
            if let Some(h) = horizon_ms {
                sim_config.simulation.horizon_ms = h;
            }
            if let Some(s) = seed {
                sim_config.simulation.seed = s;
            }

            let mut sim = sim_config.build().unwrap_or_else(|e| {
                eprintln!("Error building topology: {}", e);
                std::process::exit(1);
            });
            sim.run(sim_config.simulation.horizon_ms);
            let report = sim.report();
            println!("{}", format_table(&report));
            write_output(output.as_deref(), &report);
        }
        Commands::Sample {
            horizon_ms,
            seed,
            output,
        } => {
            let mut sim = scenarios::datacenter(seed).unwrap_or_else(|e| {
                eprintln!("Error building sample topology: {}", e);
                std::process::exit(1);
            });
            println!("=== Data Center Simulation ===");
            println!("Web frontends: loginweb, checkoutweb, planweb, payweb");
            println!("Services: userdataserv, checkoutserv, walletserv, authserv,");
            println!("          fulfillmentserv, planningserv");
            println!("DB proxies and databases: one pair per service");
            println!();
            println!("Simulating {} ms of traffic...", horizon_ms);

            sim.run(horizon_ms);
            let report = sim.report();
            println!("{}", format_table(&report));
            write_output(output.as_deref(), &report);
        }
        Commands::Check { config } => match SimConfig::from_file(&config) {
            Ok(c) => {
                println!(
                    "OK: {} ({} tiers, {} sources, horizon {} ms)",
                    c.simulation.name,
                    c.tiers.len(),
                    c.sources.len(),
                    c.simulation.horizon_ms
                );
            }
            Err(e) => {
                eprintln!("Invalid config: {}", e);
                std::process::exit(1);
            }
        },
    }
}

fn write_output(path: Option<&std::path::Path>, report: &tiersim_core::RunReport) {
    if let Some(path) = path {
        let json = match serde_json::to_string_pretty(report) {
            Ok(j) => j,
            Err(e) => {
                eprintln!("Error serializing report: {}", e);
                std::process::exit(1);
            }
        };
        std::fs::write(path, json).unwrap_or_else(|e| {
            eprintln!("Error writing output: {}", e);
            std::process::exit(1);
        });
        println!("Report written to {}", path.display());
    }
}
