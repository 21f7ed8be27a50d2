// ============================================
// File: crates/capone-client/src/proto.rs
// ============================================
//! # Client Protocol
//!
//! ## Creation Reason
//! The counterpart of the server's command dispatch: every operation
//! opens with a handshake and a `ConnectionInitiation`, then speaks the
//! command-specific body.
//!
//! ## Operation Sketch
//! ```text
//! query:      ──► ConnectionInitiation{QUERY}
//!             ◄── ServiceDescription
//!
//! request:    ──► ConnectionInitiation{REQUEST} SessionRequest
//!             ◄── SessionMessage{id, cap}
//!
//! connect:    ──► ConnectionInitiation{CONNECT} SessionInitiation
//!             ◄── SessionResult
//!             ═══ plugin traffic ═══
//!
//! terminate:  ──► ConnectionInitiation{TERMINATE} SessionTermination
//!             ◄── SessionResult
//! ```

use tracing::debug;

use capone_core::caps::Capability;
use capone_core::channel::Channel;
use capone_core::crypto::keys::{SignKeyPair, SignPublicKey};
use capone_core::handshake;
use capone_core::protocol::messages::{
    Command, ConnectionInitiation, ServiceDescription, SessionInitiation, SessionMessage,
    SessionRequest, SessionResult, SessionTermination,
};
use capone_service::config::Config;
use capone_service::plugin::{ServicePlugin, Session};

use crate::error::{ClientError, Result};

// ============================================
// Connection Setup
// ============================================

/// Handshakes an open channel and announces the command it will carry.
///
/// # Errors
/// Handshake failures (including a remote key mismatch) and transport
/// errors.
pub async fn initiate_command(
    channel: &mut Channel,
    keys: &SignKeyPair,
    remote_key: &SignPublicKey,
    command: Command,
) -> Result<()> {
    handshake::initiate_encryption(channel, keys, remote_key).await?;
    channel
        .write_message(&ConnectionInitiation::new(command))
        .await?;
    debug!(%command, remote = %remote_key, "command initiated");
    Ok(())
}

/// Connects to a service host and prepares one command.
///
/// # Errors
/// Connection and handshake failures.
pub async fn connect(
    host: &str,
    port: u16,
    keys: &SignKeyPair,
    remote_key: &SignPublicKey,
    command: Command,
) -> Result<Channel> {
    let mut channel = Channel::connect_tcp(host, port).await.map_err(ClientError::Core)?;
    initiate_command(&mut channel, keys, remote_key, command).await?;
    Ok(channel)
}

// ============================================
// Commands
// ============================================

/// Completes a Query: reads the service description.
///
/// # Errors
/// Transport errors, or `MalformedMessage` when the server answered
/// with a failure code instead.
pub async fn query(channel: &mut Channel) -> Result<ServiceDescription> {
    Ok(channel.read_message().await?)
}

/// Completes a Request: sends the parameters, returns the session
/// identifier and the capability delegated to this identity.
///
/// # Errors
/// Transport errors, or `MalformedMessage` when the request was
/// refused.
pub async fn request_session(
    channel: &mut Channel,
    parameters: Vec<u8>,
) -> Result<(u32, Capability)> {
    channel.write_message(&SessionRequest { parameters }).await?;

    let session: SessionMessage = channel.read_message().await?;
    debug!(identifier = session.identifier, "session granted");
    Ok((session.identifier, session.cap))
}

/// Completes a Connect up to the server's acknowledgement. On success
/// the channel belongs to the service protocol.
///
/// # Errors
/// `Remote` with the server's error class when the Connect was
/// refused.
pub async fn start_session(
    channel: &mut Channel,
    identifier: u32,
    cap: &Capability,
) -> Result<()> {
    channel
        .write_message(&SessionInitiation {
            identifier,
            cap: cap.clone(),
        })
        .await?;

    let result: SessionResult = channel.read_message().await?;
    if !result.is_ok() {
        return Err(ClientError::Remote(result.result));
    }
    Ok(())
}

/// Connects to a session and hands the channel to the plugin's
/// invoking side.
///
/// # Errors
/// As `start_session`, plus whatever the plugin raises.
pub async fn invoke_session(
    channel: &mut Channel,
    session: &Session,
    plugin: &dyn ServicePlugin,
    cfg: &Config,
) -> Result<()> {
    start_session(channel, session.identifier, &session.cap).await?;
    plugin.invoke(channel, session, cfg).await?;
    Ok(())
}

/// Completes a Terminate and returns after the framed ack.
///
/// # Errors
/// `Remote` with the server's error class when the capability did not
/// authorize the termination.
pub async fn terminate(channel: &mut Channel, identifier: u32, cap: &Capability) -> Result<()> {
    channel
        .write_message(&SessionTermination {
            identifier,
            cap: cap.clone(),
        })
        .await?;

    let result: SessionResult = channel.read_message().await?;
    if !result.is_ok() {
        return Err(ClientError::Remote(result.result));
    }
    Ok(())
}
