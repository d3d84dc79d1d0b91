//! WolfElect - Leader Election over a Coordination Service
//!
//! Command-line front end: configuration checks and an in-process
//! simulation of an election group.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfelect::config::WolfElectConfig;
use wolfelect::coord::MemoryService;
use wolfelect::election::{ElectionEvent, EventFilter, Participant};
use wolfelect::error::{Error, Result};

/// WolfElect - Leader Election over a Coordination Service
#[derive(Parser)]
#[command(name = "wolfelect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfelect.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an election between in-process voters
    Simulate {
        /// Number of voters
        #[arg(short, long, default_value_t = 3)]
        voters: usize,

        /// Make the global leader leave once everyone has joined
        #[arg(long)]
        leader_leaves: bool,

        /// Time to let notifications settle, in milliseconds
        #[arg(long, default_value_t = 100)]
        settle_ms: u64,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfelect.toml")]
        output: PathBuf,

        /// Election group path
        #[arg(long, default_value = "/wolfelect")]
        path: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing config file is fine for the simulator; validate reports its own errors
    let config = if cli.config.exists() && !matches!(cli.command, Commands::Validate) {
        WolfElectConfig::from_file(&cli.config)?
    } else {
        WolfElectConfig::default()
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, &config.logging.format);

    match cli.command {
        Commands::Simulate {
            voters,
            leader_leaves,
            settle_ms,
            json,
        } => run_simulate(config, voters, leader_leaves, Duration::from_millis(settle_ms), json).await,
        Commands::Init { output, path } => run_init(output, path),
        Commands::Validate => run_validate(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// One line of simulation output
#[derive(Serialize)]
struct EventLine<'a> {
    voter: &'a str,
    #[serde(flatten)]
    event: &'a ElectionEvent,
}

/// Run an election between in-process voters
async fn run_simulate(
    config: WolfElectConfig,
    voters: usize,
    leader_leaves: bool,
    settle: Duration,
    json: bool,
) -> Result<()> {
    if voters == 0 {
        return Err(Error::Config("at least one voter is required".into()));
    }

    let group = config.group_path()?;
    let prefix = config.election.prefix.clone().unwrap_or_else(|| "voter".to_string());
    let service = MemoryService::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, ElectionEvent)>();

    let mut participants = Vec::with_capacity(voters);
    for i in 0..voters {
        let label = format!("{}_{}", prefix, i);
        let participant = Participant::new(&group, Arc::new(service.session().await))?;

        let events = participant.subscribe(EventFilter::all()).await;
        let sink = tx.clone();
        let voter = label.clone();
        tokio::spawn(events.into_stream().for_each(move |event| {
            let _ = sink.send((voter.clone(), event));
            futures::future::ready(())
        }));

        let node = participant.join(Some(label.as_str())).await?;
        tracing::info!("{} joined as {}", label, node);
        participants.push((label, participant));
    }

    if leader_leaves {
        tokio::time::sleep(settle).await;
        let (label, leader) = &participants[0];
        tracing::info!("{} leaving", label);
        leader.leave().await?;
    }

    tokio::time::sleep(settle).await;
    drop(tx);

    while let Ok((voter, event)) = rx.try_recv() {
        if json {
            let line = EventLine { voter: &voter, event: &event };
            println!("{}", serde_json::to_string(&line).map_err(|e| Error::Internal(e.to_string()))?);
        } else {
            println!("{:<12} {}", voter, event);
        }
    }

    if !json {
        println!();
        println!("Final State");
        println!("===========");
        for (label, participant) in &participants {
            let state = participant.snapshot().await;
            match state.self_node {
                Some(node) => println!(
                    "{:<12} node={} rank={} leader={} follower={}{}",
                    label,
                    node,
                    state.rank.map_or("-".to_string(), |r| r.to_string()),
                    state.current_leader.as_deref().unwrap_or("-"),
                    state.current_follower.as_deref().unwrap_or("-"),
                    if state.is_global_leader { " (GLOBAL LEADER)" } else { "" },
                ),
                None => println!("{:<12} (left)", label),
            }
        }
    }

    for (_, participant) in &participants {
        participant.leave().await?;
    }
    Ok(())
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, path: String) -> Result<()> {
    let config_content = format!(
        r#"# WolfElect Configuration

[election]
# Path of the election group node
path = "{}"
# Label placed before the sequence number of this candidate's node
# prefix = "node-1"

[logging]
level = "info"
format = "pretty"
"#,
        path
    );

    // Reject a bad path before writing anything
    WolfElectConfig::from_str(&config_content)?;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfElectConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Election Path: {}", config.election.path);
            println!("  Prefix: {}", config.election.prefix.as_deref().unwrap_or("(none)"));
            println!("  Log Level: {}", config.logging.level);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
