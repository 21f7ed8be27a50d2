// ============================================
// File: crates/capone-server/src/main.rs
// ============================================
//! # Server Entry Point
//!
//! ## Usage
//! ```bash
//! capone-server --config /etc/capone.conf
//! capone-server --config /etc/capone.conf --request-acl allowed-requesters
//! ```
//! Without ACL files, any authenticated identity may query and request.

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use capone_server::{Acl, Server};
use capone_service::Config;

// ============================================
// CLI Definition
// ============================================

/// Capone service host.
#[derive(Parser, Debug)]
#[command(name = "capone-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "CFGFILE")]
    config: PathBuf,

    /// File listing identities allowed to issue requests
    #[arg(long, value_name = "FILE")]
    request_acl: Option<PathBuf>,

    /// File listing identities allowed to issue queries
    #[arg(long, value_name = "FILE")]
    query_acl: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "error")]
    log_level: String,
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        eprintln!("capone-server: {e:#}");
        std::process::exit(255);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)?;
    let keys = config.sign_keypair()?;

    let request_acl = load_acl(cli.request_acl.as_deref())?;
    let query_acl = load_acl(cli.query_acl.as_deref())?;

    let server = Server::new(config, keys, request_acl, query_acl)?;
    server.run().await?;

    Ok(())
}

/// Loads an ACL file, or falls back to a wildcard ACL.
fn load_acl(path: Option<&Path>) -> anyhow::Result<Acl> {
    Ok(match path {
        Some(path) => Acl::from_file(path)?,
        None => Acl::allow_all(),
    })
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
