// ============================================
// File: crates/capone-server/src/dispatch.rs
// ============================================
//! # Connection Command Dispatch
//!
//! ## Creation Reason
//! The server-side state machine. After accepting a connection and
//! completing the handshake, exactly one command is read and handled:
//!
//! | Command | Guard | Action |
//! |---------|-------|--------|
//! | Query | `query_acl` admits peer | send service description |
//! | Request | `request_acl` admits peer | register session, delegate EXEC∪TERM to peer |
//! | Connect | capability verifies for EXEC | consume session, hand channel to plugin |
//! | Terminate | capability verifies for TERM | consume session |
//!
//! A failed guard answers with a framed failure code, the connection is
//! closed, and only that connection's task ends. Racing Connects are
//! decided by the registry's remove: exactly one peer wins, the other
//! is answered with a not-found code.
//!
//! ## ⚠️ Important Note for Next Developer
//! - ACLs gate Query and Request only; Connect and Terminate are gated
//!   purely by the capability chain
//! - Terminating an unknown identifier acks success: the session is
//!   gone either way

use std::sync::Arc;

use tracing::{debug, info, warn};

use capone_core::caps::Rights;
use capone_core::channel::Channel;
use capone_core::crypto::keys::{SignKeyPair, SignPublicKey};
use capone_core::handshake;
use capone_core::protocol::messages::{
    Command, ConnectionInitiation, SessionInitiation, SessionMessage, SessionRequest,
    SessionResult, SessionTermination,
};
use capone_service::config::Config;
use capone_service::plugin::Session;
use capone_service::service::ServiceDescriptor;

use crate::acl::Acl;
use crate::error::{Result, ServerError};
use crate::sessions::SessionRegistry;

// ============================================
// ServerContext
// ============================================

/// Everything a per-connection task needs, shared by reference.
///
/// Keys, configuration and ACLs are read-only after startup; the
/// session registry is the single mutable member and serializes itself.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<Config>,
    pub keys: Arc<SignKeyPair>,
    pub sessions: Arc<SessionRegistry>,
    pub query_acl: Arc<Acl>,
    pub request_acl: Arc<Acl>,
}

// ============================================
// Dispatch
// ============================================

/// Authenticates the peer, reads its command and runs the matching
/// handler. One command per connection.
///
/// # Errors
/// Any handshake, guard or transport failure; the caller closes the
/// channel either way.
pub async fn handle_connection(
    ctx: &ServerContext,
    service: &ServiceDescriptor,
    channel: &mut Channel,
) -> Result<()> {
    let remote = handshake::await_encryption(channel, &ctx.keys).await?;

    let initiation: ConnectionInitiation = channel.read_message().await?;
    let command = match initiation.command() {
        Ok(command) => command,
        Err(e) => {
            let _ = channel
                .write_message(&SessionResult::failure(e.kind()))
                .await;
            return Err(e.into());
        }
    };

    debug!(%command, remote = %remote, service = %service.name, "received command");

    match command {
        Command::Query => handle_query(ctx, service, channel, &remote).await,
        Command::Request => handle_request(ctx, service, channel, &remote).await,
        Command::Connect => handle_connect(ctx, service, channel, &remote).await,
        Command::Terminate => handle_terminate(ctx, channel, &remote).await,
    }
}

// ============================================
// Query
// ============================================

async fn handle_query(
    ctx: &ServerContext,
    service: &ServiceDescriptor,
    channel: &mut Channel,
    remote: &SignPublicKey,
) -> Result<()> {
    if !ctx.query_acl.is_allowed(remote) {
        warn!(remote = %remote, "unauthorized query");
        return deny(channel, ServerError::AccessDenied).await;
    }

    channel.write_message(&service.describe()).await?;
    Ok(())
}

// ============================================
// Request
// ============================================

async fn handle_request(
    ctx: &ServerContext,
    service: &ServiceDescriptor,
    channel: &mut Channel,
    remote: &SignPublicKey,
) -> Result<()> {
    if !ctx.request_acl.is_allowed(remote) {
        warn!(remote = %remote, "unauthorized request");
        return deny(channel, ServerError::AccessDenied).await;
    }

    let request: SessionRequest = channel.read_message().await?;

    if let Err(e) = service.plugin.validate_params(&request.parameters) {
        return deny(channel, e.into()).await;
    }

    let session = ctx.sessions.add(request.parameters, *remote);
    let cap = match session.cap.create_ref(Rights::EXEC | Rights::TERM, *remote) {
        Ok(cap) => cap,
        Err(e) => {
            ctx.sessions.remove(session.identifier);
            return deny(channel, e.into()).await;
        }
    };

    let reply = SessionMessage {
        identifier: session.identifier,
        cap,
    };
    if let Err(e) = channel.write_message(&reply).await {
        // The requester never learned the identifier; roll the session
        // back so it cannot linger unconsumed.
        ctx.sessions.remove(session.identifier);
        return Err(e.into());
    }

    info!(identifier = session.identifier, creator = %remote, "session established");
    Ok(())
}

// ============================================
// Connect
// ============================================

async fn handle_connect(
    ctx: &ServerContext,
    service: &ServiceDescriptor,
    channel: &mut Channel,
    remote: &SignPublicKey,
) -> Result<()> {
    let initiation: SessionInitiation = channel.read_message().await?;

    let session = match authorize_connect(ctx, &initiation, remote) {
        Ok(session) => session,
        Err(e) => {
            warn!(identifier = initiation.identifier, remote = %remote, error = %e,
                  "connect rejected");
            return deny(channel, e).await;
        }
    };

    channel.write_message(&SessionResult::ok()).await?;
    info!(identifier = session.identifier, invoker = %remote, "session connected");

    service
        .plugin
        .serve(channel, remote, &session, &ctx.config)
        .await?;
    Ok(())
}

/// Checks the presented capability and consumes the session. The
/// registry's remove is the linearization point: when two peers race
/// with valid capabilities, the second remove fails and that peer is
/// told the session is gone.
fn authorize_connect(
    ctx: &ServerContext,
    initiation: &SessionInitiation,
    remote: &SignPublicKey,
) -> Result<Arc<Session>> {
    let session = ctx
        .sessions
        .find(initiation.identifier)
        .ok_or(ServerError::SessionNotFound(initiation.identifier))?;

    initiation
        .cap
        .verify(&session.cap, remote, Rights::EXEC)?;

    ctx.sessions
        .remove(initiation.identifier)
        .ok_or(ServerError::SessionNotFound(initiation.identifier))
}

// ============================================
// Terminate
// ============================================

async fn handle_terminate(
    ctx: &ServerContext,
    channel: &mut Channel,
    remote: &SignPublicKey,
) -> Result<()> {
    let termination: SessionTermination = channel.read_message().await?;

    let Some(session) = ctx.sessions.find(termination.identifier) else {
        // Already consumed or never existed; either way there is
        // nothing left to terminate.
        debug!(identifier = termination.identifier, "terminate for unknown session");
        channel.write_message(&SessionResult::ok()).await?;
        return Ok(());
    };

    if let Err(e) = termination
        .cap
        .verify(&session.cap, remote, Rights::TERM)
    {
        warn!(identifier = termination.identifier, remote = %remote, "unauthorized terminate");
        return deny(channel, e.into()).await;
    }

    ctx.sessions.remove(termination.identifier);
    channel.write_message(&SessionResult::ok()).await?;

    info!(identifier = termination.identifier, remote = %remote, "session terminated");
    Ok(())
}

// ============================================
// Helpers
// ============================================

/// Answers a failed guard with its error class and propagates the
/// error so the connection task ends.
async fn deny(channel: &mut Channel, error: ServerError) -> Result<()> {
    let _ = channel
        .write_message(&SessionResult::failure(error.kind()))
        .await;
    Err(error)
}
