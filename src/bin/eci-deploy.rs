//! # ECI Deploy CLI
//!
//! Command-line entry point for building and deploying the ECI platform
//! onto a local k3d cluster.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use eci_deploy::config::ConfigManager;
use eci_deploy::error::DeployError;
use eci_deploy::logging::{init_structured_logging, log_error};
use eci_deploy::orchestration::{
    Collaborators, DeployOptions, DeployReport, OrchestrationDriver, SmokeResult,
};
use eci_deploy::reconcile::ReconcileSummary;
use eci_deploy::UnitStatus;
use serde::Serialize;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "eci-deploy")]
#[command(about = "Build, import and deploy the ECI platform on k3d")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Directory holding eci-deploy.yaml (default: discovered from the working directory)
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// Environment section to merge (development, test, production)
    #[arg(short, long, global = true)]
    environment: Option<String>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build stale images, import them and reconcile the cluster
    Deploy {
        /// Build without the layer cache
        #[arg(long)]
        no_cache: bool,

        /// Skip the gateway smoke checks
        #[arg(long)]
        skip_smoke: bool,
    },

    /// Rebuild every image regardless of freshness, then deploy
    Rebuild {
        #[arg(long)]
        no_cache: bool,
    },

    /// Show the phase of every deployment unit
    Status,

    /// Run one remediation pass over unhealthy units
    Fix,

    /// Run the gateway smoke checks
    Smoke,

    /// Delete the cluster
    Down,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration with secrets masked
    Show,
    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_guard = init_structured_logging(cli.verbose);

    let code = match run(&cli).await {
        Ok(()) => 0,
        Err(e) => match e.downcast_ref::<DeployError>() {
            Some(deploy_error) => {
                log_error("cli", command_name(&cli.command), &deploy_error.to_string(), None);
                eprintln!("❌ {}", deploy_error.report());
                deploy_error.exit_code()
            }
            None => {
                log_error("cli", command_name(&cli.command), &format!("{e:#}"), None);
                eprintln!("❌ {e:#}");
                1
            }
        },
    };

    // process::exit skips destructors; flush the JSON log first
    drop(log_guard);
    process::exit(code);
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Deploy { .. } => "deploy",
        Commands::Rebuild { .. } => "rebuild",
        Commands::Status => "status",
        Commands::Fix => "fix",
        Commands::Smoke => "smoke",
        Commands::Down => "down",
        Commands::Config { .. } => "config",
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let manager = match &cli.environment {
        Some(environment) => {
            ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        }
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .map_err(DeployError::from)?;

    if let Commands::Config { action } = &cli.command {
        return match action {
            ConfigAction::Show => {
                let rendered = serde_json::to_string_pretty(&manager.debug_config())
                    .context("rendering configuration")?;
                println!("{rendered}");
                Ok(())
            }
            ConfigAction::Validate => {
                println!("✅ Configuration valid");
                println!("Environment: {}", manager.environment());
                match manager.config_file() {
                    Some(path) => println!("Config File: {}", path.display()),
                    None => println!("Config File: <built-in defaults>"),
                }
                println!("Targets: {}", manager.config().targets.len());
                println!("Units: {}", manager.config().units.len());
                Ok(())
            }
        };
    }

    let config = manager.config().clone();
    let driver = OrchestrationDriver::new(config.clone(), Collaborators::docker_k3d(&config));

    match &cli.command {
        Commands::Deploy {
            no_cache,
            skip_smoke,
        } => {
            let report = driver
                .deploy(DeployOptions {
                    no_cache: *no_cache,
                    force_rebuild_all: false,
                    skip_smoke: *skip_smoke,
                })
                .await?;
            print_deploy_report(&report, cli.format)
        }
        Commands::Rebuild { no_cache } => {
            let report = driver.rebuild(*no_cache).await?;
            print_deploy_report(&report, cli.format)
        }
        Commands::Status => {
            let statuses = driver.status().await?;
            print_statuses(&statuses, cli.format)
        }
        Commands::Fix => {
            let summary = driver.fix().await?;
            print_reconcile_summary(&summary, cli.format)
        }
        Commands::Smoke => {
            let report = driver.smoke().await?;
            match cli.format {
                OutputFormat::Json => print_json(&report),
                OutputFormat::Table => {
                    println!(
                        "✅ Gateway {} healthy after {} attempt(s), token issued",
                        report.gateway_url, report.health_attempts
                    );
                    Ok(())
                }
            }
        }
        Commands::Down => {
            driver.down().await?;
            println!("🗑️ Cluster {} deleted", config.cluster.name);
            Ok(())
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("rendering output")?);
    Ok(())
}

fn print_deploy_report(report: &DeployReport, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }

    println!("🚀 Deploy run {}", report.run_id);
    println!();
    println!("Freshness:");
    for verdict in &report.verdicts {
        let marker = if verdict.decision.is_stale() { "🔨" } else { "✅" };
        println!("  {marker} {:<12} {}", verdict.target, verdict.reason);
    }

    println!();
    println!(
        "Builds: {} built, {} skipped in {}ms",
        report.builds.scheduled_count(),
        report.builds.skipped.len(),
        report.builds.elapsed_ms
    );
    println!(
        "Import: {} image(s) in {} call(s)",
        report.import.imported,
        report.import.call_count()
    );

    println!();
    print_reconcile_summary(&report.reconcile, format)?;

    if let Some(smoke) = &report.smoke {
        match smoke {
            SmokeResult::Passed(smoke) => println!(
                "Smoke: ✅ healthy after {} attempt(s)",
                smoke.health_attempts
            ),
            SmokeResult::Failed { message } => println!("Smoke: ⚠️ {message}"),
        }
    }

    println!();
    println!("Finished in {}ms", report.elapsed_ms);
    Ok(())
}

fn print_reconcile_summary(summary: &ReconcileSummary, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(summary);
    }

    let headline = if summary.is_degraded() {
        "⚠️ Deployment degraded"
    } else {
        "✅ Deployment healthy"
    };
    println!(
        "{headline}: {}/{} units running",
        summary.running_count(),
        summary.units.len()
    );
    for status in &summary.units {
        println!("  {}", status.summary_line());
    }
    if !summary.remediated.is_empty() {
        println!("Remediated: {}", summary.remediated.join(", "));
    }
    for warning in &summary.warnings {
        println!("⚠️ {warning}");
    }
    Ok(())
}

fn print_statuses(statuses: &[UnitStatus], format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(&statuses);
    }
    println!("📋 Unit status:");
    for status in statuses {
        let marker = if status.is_ready() { "✅" } else { "❌" };
        println!("  {marker} {}", status.summary_line());
    }
    Ok(())
}
