// ============================================
// File: crates/capone-client/src/main.rs
// ============================================
//! # Client Entry Point
//!
//! ## Usage
//! ```bash
//! # What does the host expose on that port?
//! capone-client query --config client.conf \
//!     --remote-key <hex> --remote-host box --remote-port 1237
//!
//! # Establish a session, printing its identifier and capability
//! capone-client request --config client.conf \
//!     --remote-key <hex> --remote-host box --remote-port 1237 \
//!     --service-type exec -- ls -l
//!
//! # Drive the session
//! capone-client connect --config client.conf \
//!     --remote-key <hex> --remote-host box --remote-port 1237 \
//!     --service-type exec --session-id <id> --session-cap <cap>
//!
//! # Tear a session down
//! capone-client terminate --config client.conf \
//!     --remote-key <hex> --remote-host box --remote-port 1237 \
//!     --session-id <id> --session-cap <cap>
//! ```
//!
//! The process exit status is the error class of whatever failed, so
//! scripts can tell an unauthorized capability from a vanished session.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use capone_client::proto;
use capone_client::{ClientError, Result};
use capone_core::caps::Capability;
use capone_core::crypto::keys::{SignKeyPair, SignPublicKey};
use capone_core::error::CoreError;
use capone_core::protocol::messages::Command;
use capone_service::plugins;
use capone_service::{Config, Session};

// ============================================
// CLI Definition
// ============================================

/// Capone service invocation client.
#[derive(Parser, Debug)]
#[command(name = "capone-client")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "error")]
    log_level: String,
}

/// Options every command needs to reach a remote service.
#[derive(Args, Debug)]
struct RemoteOpts {
    /// Path to the configuration file holding this identity's keys
    #[arg(short, long, value_name = "CFGFILE")]
    config: PathBuf,

    /// Hex public key the remote host must present
    #[arg(long, value_name = "KEY")]
    remote_key: String,

    /// Remote host name or address
    #[arg(long, value_name = "HOST")]
    remote_host: String,

    /// Remote service port
    #[arg(long, value_name = "PORT")]
    remote_port: u16,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask a service for its description
    Query {
        #[command(flatten)]
        remote: RemoteOpts,
    },

    /// Request a session, receiving a delegatable capability
    Request {
        #[command(flatten)]
        remote: RemoteOpts,

        /// Service type, selecting the parameter format
        #[arg(long, value_name = "TYPE")]
        service_type: String,

        /// Service-specific parameters
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Connect to a previously requested session
    Connect {
        #[command(flatten)]
        remote: RemoteOpts,

        /// Service type, selecting the plugin that drives the session
        #[arg(long, value_name = "TYPE")]
        service_type: String,

        /// Session identifier returned by request
        #[arg(long, value_name = "ID")]
        session_id: u32,

        /// Capability string returned by request
        #[arg(long, value_name = "CAP")]
        session_cap: String,
    },

    /// Terminate a session
    Terminate {
        #[command(flatten)]
        remote: RemoteOpts,

        /// Session identifier to terminate
        #[arg(long, value_name = "ID")]
        session_id: u32,

        /// Capability authorizing the termination
        #[arg(long, value_name = "CAP")]
        session_cap: String,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Err(e) = run(cli.command).await {
        eprintln!("capone-client: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Query { remote } => cmd_query(remote).await,
        Commands::Request {
            remote,
            service_type,
            args,
        } => cmd_request(remote, service_type, args).await,
        Commands::Connect {
            remote,
            service_type,
            session_id,
            session_cap,
        } => cmd_connect(remote, service_type, session_id, session_cap).await,
        Commands::Terminate {
            remote,
            session_id,
            session_cap,
        } => cmd_terminate(remote, session_id, session_cap).await,
    }
}

// ============================================
// Commands
// ============================================

async fn cmd_query(remote: RemoteOpts) -> Result<()> {
    let (_, keys, remote_key) = load_identity(&remote)?;

    let mut channel = proto::connect(
        &remote.remote_host,
        remote.remote_port,
        &keys,
        &remote_key,
        Command::Query,
    )
    .await?;

    let description = proto::query(&mut channel).await?;
    println!("name:     {}", description.name);
    println!("category: {}", description.category);
    println!("type:     {}", description.kind);
    println!("version:  {}", description.version);
    println!("location: {}", description.location);
    println!("port:     {}", description.port);

    Ok(())
}

async fn cmd_request(remote: RemoteOpts, service_type: String, args: Vec<String>) -> Result<()> {
    let (_, keys, remote_key) = load_identity(&remote)?;
    let plugin = plugins::by_type(&service_type)?;
    let parameters = plugin.parse_params(&args).map_err(ClientError::Core)?;

    let mut channel = proto::connect(
        &remote.remote_host,
        remote.remote_port,
        &keys,
        &remote_key,
        Command::Request,
    )
    .await?;

    let (identifier, cap) = proto::request_session(&mut channel, parameters).await?;
    println!("session:    {identifier}");
    println!("capability: {cap}");

    Ok(())
}

async fn cmd_connect(
    remote: RemoteOpts,
    service_type: String,
    session_id: u32,
    session_cap: String,
) -> Result<()> {
    let (config, keys, remote_key) = load_identity(&remote)?;
    let plugin = plugins::by_type(&service_type)?;
    let cap: Capability = session_cap.parse().map_err(ClientError::Core)?;

    let mut channel = proto::connect(
        &remote.remote_host,
        remote.remote_port,
        &keys,
        &remote_key,
        Command::Connect,
    )
    .await?;

    let session = Session {
        identifier: session_id,
        creator: keys.public_key(),
        parameters: Vec::new(),
        cap,
        created_at: std::time::SystemTime::now(),
    };

    proto::invoke_session(&mut channel, &session, plugin.as_ref(), &config).await
}

async fn cmd_terminate(remote: RemoteOpts, session_id: u32, session_cap: String) -> Result<()> {
    let (_, keys, remote_key) = load_identity(&remote)?;
    let cap: Capability = session_cap.parse().map_err(ClientError::Core)?;

    let mut channel = proto::connect(
        &remote.remote_host,
        remote.remote_port,
        &keys,
        &remote_key,
        Command::Terminate,
    )
    .await?;

    proto::terminate(&mut channel, session_id, &cap).await
}

// ============================================
// Helpers
// ============================================

/// Loads the local identity and the expected remote key.
fn load_identity(remote: &RemoteOpts) -> Result<(Config, SignKeyPair, SignPublicKey)> {
    let config = Config::load(&remote.config)?;
    let keys = config.sign_keypair()?;
    let remote_key =
        SignPublicKey::from_hex(&remote.remote_key).map_err(|e: CoreError| ClientError::Core(e))?;
    Ok((config, keys, remote_key))
}

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}
