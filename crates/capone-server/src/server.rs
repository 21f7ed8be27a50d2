// ============================================
// File: crates/capone-server/src/server.rs
// ============================================
//! # Connection Supervisor
//!
//! ## Creation Reason
//! Owns the listening sockets and the lifecycle of per-connection
//! tasks: one acceptor task per configured service, one task per
//! accepted connection, and a signal-driven shutdown path.
//!
//! ## Failure Policy
//! A transient accept failure is logged and the loop continues. A
//! failed connection closes only its own channel and ends only its own
//! task; the process never exits on per-connection errors.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Plugin children are awaited by the task that spawned them, so no
//!   separate child reaper is needed
//! - Shutdown aborts the acceptor tasks; in-flight connections are cut
//!   by the process exiting

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use capone_core::channel::Channel;
use capone_core::crypto::keys::SignKeyPair;
use capone_service::config::Config;
use capone_service::service::ServiceDescriptor;

use crate::acl::Acl;
use crate::dispatch::{self, ServerContext};
use crate::error::{Result, ServerError};
use crate::sessions::SessionRegistry;

// ============================================
// Server
// ============================================

/// The Capone service host.
///
/// # Lifecycle
/// 1. Build with `Server::new(config, keys, request_acl, query_acl)`
/// 2. Run with `server.run().await`
/// 3. Stop via SIGINT or SIGTERM
pub struct Server {
    ctx: ServerContext,
    services: Vec<Arc<ServiceDescriptor>>,
}

impl Server {
    /// Builds the server from its configuration.
    ///
    /// # Errors
    /// Returns `Startup` when no service is configured, or the
    /// configuration error for broken `[service]` sections.
    pub fn new(
        config: Config,
        keys: SignKeyPair,
        request_acl: Acl,
        query_acl: Acl,
    ) -> Result<Self> {
        let services: Vec<_> = config.services()?.into_iter().map(Arc::new).collect();
        if services.is_empty() {
            return Err(ServerError::startup("no services configured"));
        }

        let ctx = ServerContext {
            config: Arc::new(config),
            keys: Arc::new(keys),
            sessions: Arc::new(SessionRegistry::new()),
            query_acl: Arc::new(query_acl),
            request_acl: Arc::new(request_acl),
        };

        Ok(Self { ctx, services })
    }

    /// Runs until a termination signal arrives.
    ///
    /// # Errors
    /// Returns `Startup` if a listening socket cannot be bound.
    pub async fn run(&self) -> Result<()> {
        info!(
            identity = %self.ctx.keys.public_key(),
            services = self.services.len(),
            "starting capone server v{}",
            env!("CARGO_PKG_VERSION")
        );

        let mut acceptors: Vec<JoinHandle<()>> = Vec::new();

        for service in &self.services {
            let port = service.port_number()?;
            let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(|e| {
                ServerError::startup(format!("cannot bind port {port} for '{}': {e}", service.name))
            })?;

            info!(service = %service.name, port, "listening");

            acceptors.push(tokio::spawn(accept_loop(
                self.ctx.clone(),
                Arc::clone(service),
                listener,
            )));
        }

        wait_for_shutdown().await?;

        info!("shutting down");
        for acceptor in &acceptors {
            acceptor.abort();
        }

        Ok(())
    }
}

// ============================================
// Accept Loop
// ============================================

/// Accepts connections for one service and fans them out to tasks.
async fn accept_loop(ctx: ServerContext, service: Arc<ServiceDescriptor>, listener: TcpListener) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Transient accept failures must not kill the service.
                warn!(service = %service.name, error = %e, "accept failed");
                continue;
            }
        };

        debug!(service = %service.name, %addr, "accepted connection");

        let ctx = ctx.clone();
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut channel = Channel::from_tcp(stream);
            if let Err(e) = dispatch::handle_connection(&ctx, &service, &mut channel).await {
                warn!(service = %service.name, %addr, error = %e, "connection failed");
            }
            let _ = channel.shutdown().await;
        });
    }
}

/// Blocks until SIGINT or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = term.recv() => {}
    }
    Ok(())
}
