use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use remora_agent::{enroll, Agent};
use remora_core::error::CredentialError;
use remora_core::{config, credentials, AgentConfig};

#[derive(Parser)]
#[command(name = "remora-agent", version, about = "Remora remote terminal agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Server address (host:port), overrides stored credentials
    #[arg(long)]
    server: Option<String>,

    /// Device identifier, overrides stored credentials
    #[arg(long)]
    id: Option<String>,

    /// Use TLS, overrides stored credentials
    #[arg(long, action = ArgAction::Set)]
    ssl: Option<bool>,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Reconnect automatically when the connection is lost
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    reconnect: bool,

    /// Heartbeat interval in seconds
    #[arg(long)]
    heartbeat: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Enroll this machine with a server using an install token
    Enroll(EnrollArgs),
    /// Remove stored credentials
    Unenroll,
    /// Show enrollment status
    Status,
}

#[derive(Args)]
struct EnrollArgs {
    /// Server address (host:port)
    #[arg(long)]
    server: String,

    /// One-time install token
    #[arg(long)]
    token: String,

    /// Device identifier (defaults to the hostname)
    #[arg(long)]
    id: Option<String>,

    /// Use TLS
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    ssl: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("remora_agent={default},remora_core={default}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Enroll(args)) => {
            init_logging(args.debug);
            enroll::enroll(enroll::EnrollOptions {
                server: args.server,
                install_token: args.token,
                device_id: args.id,
                tls: args.ssl,
                insecure: args.insecure,
            })
            .await
        }
        Some(Command::Unenroll) => match credentials::delete() {
            Ok(()) => {
                println!("Credentials removed.");
                Ok(())
            }
            Err(CredentialError::NotEnrolled) => {
                println!("Not enrolled.");
                Ok(())
            }
            Err(e) => Err(e).context("failed to remove credentials"),
        },
        Some(Command::Status) => {
            match credentials::load() {
                Ok(creds) => {
                    println!("Enrolled with {} as {}", creds.server_addr, creds.device_id);
                    println!("Agent id: {}", creds.agent_id);
                    println!("TLS: {}", creds.tls);
                }
                Err(CredentialError::NotEnrolled) => {
                    println!("Not enrolled. Run: remora-agent enroll --server <host:port> --token <token>");
                }
                Err(e) => return Err(e).context("failed to read credentials"),
            }
            Ok(())
        }
        None => run_agent(cli.run).await,
    }
}

async fn run_agent(args: RunArgs) -> Result<()> {
    let creds = match credentials::load() {
        Ok(creds) => Some(creds),
        Err(CredentialError::NotEnrolled) => None,
        Err(e) => return Err(e).context("failed to read credentials"),
    };

    // CLI overrides beat stored credentials; running without either
    // enrollment or --server is a usage error.
    let mut config = match creds {
        Some(creds) => AgentConfig {
            server_addr: creds.server_addr,
            device_id: creds.device_id,
            token: creds.agent_token,
            tls: creds.tls,
            ..Default::default()
        },
        None => {
            if args.server.is_none() {
                eprintln!("Not enrolled and no --server given.");
                eprintln!("Run: remora-agent enroll --server <host:port> --token <token>");
                std::process::exit(1);
            }
            AgentConfig::default()
        }
    };

    if let Some(server) = args.server {
        config.server_addr = server;
    }
    if let Some(id) = args.id {
        config.device_id = id;
    }
    if let Some(ssl) = args.ssl {
        config.tls = ssl;
    }
    if let Some(heartbeat) = args.heartbeat {
        config.heartbeat_secs = heartbeat;
    }
    config.insecure = args.insecure;
    config.reconnect = args.reconnect;
    config.debug = args.debug;

    init_logging(config.debug);
    config.validate().context("invalid configuration")?;

    info!(
        server = %config.server_addr,
        device_id = %config.device_id,
        hostname = %config::hostname(),
        tls = config.tls,
        reconnect = config.reconnect,
        "starting remora-agent"
    );

    let agent = Arc::new(Agent::new(config));
    {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                agent.stop();
            }
        });
    }

    agent.run().await?;
    info!("remora-agent stopped");
    Ok(())
}
