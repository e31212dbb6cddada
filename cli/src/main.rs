// vnetmesh — Transit Mesh Reconciler CLI
//
// Cross-platform (macOS, Linux, Windows) command-line interface for the
// vnetmesh reconciliation loop.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use vnetmesh_core::{
    AzureCredentials, AzureProvider, LoopDriver, MeshSettings, PeeringPresence, Reconciler,
};

#[derive(Parser)]
#[command(name = "vnetmesh")]
#[command(about = "vnetmesh — Transit Mesh Reconciler", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation loop until terminated
    Run {
        /// Seconds to idle between passes (overrides the config file)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Run exactly one reconciliation pass and exit
    Once,
    /// Show what a pass would change, without mutating anything
    Plan,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the active configuration
    Show,
    /// Set a config value
    Set { key: String, value: String },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    // Mirror everything to a log file next to the process, like the console
    let log_path = Path::new(&config.log_file);
    let log_dir = match log_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let log_name = log_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "vnetmesh.log".into());
    let file_appender = tracing_appender::rolling::never(log_dir, log_name);
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(file_writer.and(std::io::stdout))
        .init();

    match cli.command {
        Commands::Run { interval } => cmd_run(config, interval).await,
        Commands::Once => cmd_once(config).await,
        Commands::Plan => cmd_plan(config).await,
        Commands::Config { action } => cmd_config(config, action),
    }
}

fn build_reconciler(settings: MeshSettings) -> Result<Reconciler> {
    settings.validate().context("Invalid mesh settings")?;
    let creds = AzureCredentials::from_env()
        .context("Azure credentials missing from the environment")?;
    let provider = AzureProvider::new(creds).context("Failed to build provider client")?;
    Ok(Reconciler::new(Arc::new(provider), settings))
}

async fn cmd_run(config: config::Config, interval: Option<u64>) -> Result<()> {
    let mut settings = config.mesh;
    if let Some(secs) = interval {
        settings.idle_interval_secs = secs;
    }
    let idle = settings.idle_interval();
    let reconciler = build_reconciler(settings)?;

    println!(
        "{} idle interval {}s, stop with ctrl-c",
        "Starting reconciliation loop:".bold(),
        idle.as_secs()
    );
    let mut driver = LoopDriver::new(reconciler, idle);
    driver.run().await;
    Ok(())
}

async fn cmd_once(config: config::Config) -> Result<()> {
    let reconciler = build_reconciler(config.mesh)?;
    let summary = reconciler.run_pass().await;
    println!("{} {}", "Pass complete:".bold(), summary);
    if summary.failures > 0 {
        anyhow::bail!("{} operations failed; see the log", summary.failures);
    }
    Ok(())
}

async fn cmd_plan(config: config::Config) -> Result<()> {
    let reconciler = build_reconciler(config.mesh)?;
    let plan = reconciler.plan().await;

    if plan.pairs.is_empty() && plan.teardowns.is_empty() && plan.unmatched.is_empty() {
        println!("{}", "Nothing to do: no mesh members found".dimmed());
        return Ok(());
    }

    if !plan.pairs.is_empty() {
        println!("{}", "Matched pairs:".bold());
        for pair in &plan.pairs {
            let action = match pair.presence {
                PeeringPresence::Established => "up to date".green(),
                PeeringPresence::Absent => "create both peering halves".yellow(),
                PeeringPresence::GatewayHalf => "complete participant side".yellow(),
                PeeringPresence::ParticipantHalf => "complete gateway side".yellow(),
            };
            println!(
                "  {} {} -> {}  [{}]",
                "peer".cyan(),
                pair.participant,
                pair.gateway,
                action
            );
            match pair.gateway_address.as_deref() {
                Some(address) => println!(
                    "  {} {} via {}",
                    "route".cyan(),
                    pair.participant,
                    address
                ),
                None => println!(
                    "  {} {} {}",
                    "route".cyan(),
                    pair.participant,
                    "deferred: gateway has no address tag".yellow()
                ),
            }
        }
    }

    if !plan.teardowns.is_empty() {
        println!("{}", "Teardowns:".bold());
        for item in &plan.teardowns {
            println!(
                "  {} {} between {} and {}",
                "remove".red(),
                item.peering_name,
                item.participant,
                item.counterpart
            );
        }
    }

    if !plan.unmatched.is_empty() {
        println!("{}", "Participants with no gateway:".bold());
        for name in &plan.unmatched {
            println!("  {}", name.yellow());
        }
    }

    Ok(())
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let rendered = serde_json::to_string_pretty(&config)?;
            println!("{rendered}");
        }
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} {} = {}", "Set".green(), key, value);
        }
        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }
    Ok(())
}
