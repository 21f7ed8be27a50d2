// ============================================
// File: crates/capone-service/src/plugins/exec.rs
// ============================================
//! # Exec Plugin
//!
//! ## Creation Reason
//! Remote shell execution: the service host spawns the requested
//! command and relays the channel against the child's stdio; the
//! invoking side relays the channel against its own terminal.
//!
//! ## Parameters
//! The command followed by its arguments, e.g. `["ls", "-l", "/tmp"]`.
//!
//! ## Child Lifecycle
//! The relay pump runs until either the channel or the child's stdio
//! closes; the child is then awaited, so no zombie is left behind.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use capone_core::channel::Channel;
use capone_core::crypto::keys::SignPublicKey;
use capone_core::error::CoreError;

use crate::config::Config;
use crate::plugin::{ServicePlugin, Session};
use crate::plugins::test::{decode_params, encode_params};

/// Shell execution over a relayed channel.
pub struct ExecPlugin;

#[async_trait]
impl ServicePlugin for ExecPlugin {
    fn category(&self) -> &'static str {
        "Shell"
    }

    fn service_type(&self) -> &'static str {
        "exec"
    }

    fn version(&self) -> &'static str {
        "0.0.1"
    }

    fn parse_params(&self, args: &[String]) -> capone_core::Result<Vec<u8>> {
        if args.is_empty() {
            return Err(CoreError::invalid_argument("exec requires a command"));
        }
        encode_params(args)
    }

    fn validate_params(&self, params: &[u8]) -> capone_core::Result<()> {
        let argv = decode_params(params)?;
        if argv.is_empty() {
            return Err(CoreError::invalid_argument("exec requires a command"));
        }
        Ok(())
    }

    async fn serve(
        &self,
        channel: &mut Channel,
        invoker: &SignPublicKey,
        session: &Session,
        _cfg: &Config,
    ) -> capone_core::Result<()> {
        let argv = decode_params(&session.parameters)?;
        if argv.is_empty() {
            return Err(CoreError::invalid_argument("exec requires a command"));
        }

        debug!(command = %argv[0], %invoker, "spawning command");

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::invalid_argument("child stdout missing"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::invalid_argument("child stdin missing"))?;

        let mut stdio = tokio::io::join(stdout, stdin);
        let relayed = channel.relay(&mut stdio).await;

        // Close our pipe ends before reaping, so the child sees EOF.
        drop(stdio);
        let status = child.wait().await?;
        debug!(%status, "command finished");

        relayed
    }

    async fn invoke(
        &self,
        channel: &mut Channel,
        _session: &Session,
        _cfg: &Config,
    ) -> capone_core::Result<()> {
        let mut stdio = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
        channel.relay(&mut stdio).await
    }
}

// ============================================
// Tests
// ============================================
