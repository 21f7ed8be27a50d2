// ============================================
// File: crates/capone-server/tests/commands.rs
// ============================================
//! End-to-end command scenarios: the real server dispatch on one end
//! of an in-memory channel, the real client protocol on the other.

use std::sync::Arc;

use capone_client::proto;
use capone_core::caps::{Capability, ChainLink, Rights};
use capone_core::channel::{Channel, DEFAULT_BLOCKLEN};
use capone_core::crypto::keys::{SignKeyPair, SignPublicKey};
use capone_core::error::ErrorKind;
use capone_core::protocol::messages::{Command, ConnectionInitiation, SessionResult};
use capone_server::dispatch::{self, ServerContext};
use capone_server::{Acl, ServerError, SessionRegistry};
use capone_service::plugins::test::{encode_params, TestPlugin};
use capone_service::{Config, ServiceDescriptor};

// ============================================
// Fixture
// ============================================

struct Fixture {
    ctx: ServerContext,
    service: Arc<ServiceDescriptor>,
    plugin: Arc<TestPlugin>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_acls(Acl::allow_all(), Acl::allow_all())
    }

    fn with_acls(request_acl: Acl, query_acl: Acl) -> Self {
        let keys = SignKeyPair::generate();
        let config = Config::from_str(&format!(
            "[core]\npublic_key={}\nsecret_key={}\n",
            hex::encode(keys.public_key().as_bytes()),
            hex::encode(keys.to_keypair_bytes()),
        ))
        .unwrap();

        let plugin = Arc::new(TestPlugin::default());
        let service = Arc::new(ServiceDescriptor::with_plugin(
            "Foo",
            "Dunno",
            "1234",
            Arc::clone(&plugin) as Arc<dyn capone_service::ServicePlugin>,
        ));

        let ctx = ServerContext {
            keys: Arc::new(config.sign_keypair().unwrap()),
            config: Arc::new(config),
            sessions: Arc::new(SessionRegistry::new()),
            query_acl: Arc::new(query_acl),
            request_acl: Arc::new(request_acl),
        };

        Self {
            ctx,
            service,
            plugin,
        }
    }

    fn server_key(&self) -> SignPublicKey {
        self.ctx.keys.public_key()
    }

    fn pair(&self) -> (Channel, Channel) {
        Channel::pair(DEFAULT_BLOCKLEN).unwrap()
    }
}

fn params(values: &[&str]) -> Vec<u8> {
    let owned: Vec<String> = values.iter().map(|s| (*s).to_string()).collect();
    encode_params(&owned).unwrap()
}

// ============================================
// S1 — Query
// ============================================

#[tokio::test]
async fn query_returns_service_description() {
    let fx = Fixture::new();
    let client_keys = SignKeyPair::generate();
    let (mut client, mut server) = fx.pair();

    let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
    let drive = async {
        proto::initiate_command(&mut client, &client_keys, &fx.server_key(), Command::Query)
            .await?;
        proto::query(&mut client).await
    };

    let (served, description) = tokio::join!(serve, drive);
    served.unwrap();

    let description = description.unwrap();
    assert_eq!(description.name, "Foo");
    assert_eq!(description.category, "Test");
    assert_eq!(description.kind, "test");
    assert_eq!(description.version, "0.0.1");
    assert_eq!(description.location, "Dunno");
    assert_eq!(description.port, "1234");
}

#[tokio::test]
async fn query_is_gated_by_acl() {
    let fx = Fixture::with_acls(Acl::allow_all(), Acl::new());
    let client_keys = SignKeyPair::generate();
    let (mut client, mut server) = fx.pair();

    let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
    let drive = async {
        proto::initiate_command(&mut client, &client_keys, &fx.server_key(), Command::Query)
            .await?;
        proto::query(&mut client).await
    };

    let (served, queried) = tokio::join!(serve, drive);
    assert!(matches!(served, Err(ServerError::AccessDenied)));
    assert!(queried.is_err());
}

// ============================================
// S2 — Request, then Connect
// ============================================

#[tokio::test]
async fn request_then_connect_runs_the_plugin() {
    let fx = Fixture::new();
    let client_keys = SignKeyPair::generate();

    // Request a session.
    let (mut client, mut server) = fx.pair();
    let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
    let drive = async {
        proto::initiate_command(&mut client, &client_keys, &fx.server_key(), Command::Request)
            .await?;
        proto::request_session(&mut client, params(&["parameter-data"])).await
    };
    let (served, granted) = tokio::join!(serve, drive);
    served.unwrap();

    let (identifier, cap) = granted.unwrap();
    assert_eq!(cap.chain().len(), 1);
    assert_eq!(
        cap.chain()[0],
        ChainLink {
            identity: client_keys.public_key(),
            rights: Rights::EXEC | Rights::TERM,
        }
    );
    assert_eq!(fx.ctx.sessions.len(), 1);

    // Connect with the granted capability.
    let (mut client, mut server) = fx.pair();
    let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
    let drive = async {
        proto::initiate_command(&mut client, &client_keys, &fx.server_key(), Command::Connect)
            .await?;
        proto::start_session(&mut client, identifier, &cap).await
    };
    let (served, connected) = tokio::join!(serve, drive);
    served.unwrap();
    connected.unwrap();

    // The session was consumed and the plugin saw the parameters.
    assert!(fx.ctx.sessions.is_empty());
    assert_eq!(fx.plugin.served(), vec![vec!["parameter-data".to_string()]]);
}

// ============================================
// S3 — Connect without a session
// ============================================

#[tokio::test]
async fn connect_without_session_is_refused() {
    let fx = Fixture::new();
    let client_keys = SignKeyPair::generate();
    let (mut client, mut server) = fx.pair();

    let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
    let drive = async {
        proto::initiate_command(&mut client, &client_keys, &fx.server_key(), Command::Connect)
            .await?;
        proto::start_session(&mut client, 1, &Capability::create_root()).await
    };

    let (served, connected) = tokio::join!(serve, drive);
    assert!(matches!(served, Err(ServerError::SessionNotFound(1))));

    let err = connected.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(fx.ctx.sessions.is_empty());
}

// ============================================
// S4 — Termination by the creator
// ============================================

#[tokio::test]
async fn terminate_consumes_the_session_and_is_idempotent() {
    let fx = Fixture::new();
    let client_keys = SignKeyPair::generate();

    let session = fx
        .ctx
        .sessions
        .add(params(&["x"]), client_keys.public_key());
    let cap = session
        .cap
        .create_ref(Rights::TERM, client_keys.public_key())
        .unwrap();
    let identifier = session.identifier;

    for round in 0..2 {
        let (mut client, mut server) = fx.pair();
        let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
        let drive = async {
            proto::initiate_command(
                &mut client,
                &client_keys,
                &fx.server_key(),
                Command::Terminate,
            )
            .await?;
            proto::terminate(&mut client, identifier, &cap).await
        };

        let (served, terminated) = tokio::join!(serve, drive);
        served.unwrap();
        terminated.unwrap();
        assert!(fx.ctx.sessions.is_empty(), "round {round}");
    }
}

#[tokio::test]
async fn terminate_requires_the_term_right() {
    let fx = Fixture::new();
    let client_keys = SignKeyPair::generate();

    let session = fx.ctx.sessions.add(Vec::new(), client_keys.public_key());
    let exec_only = session
        .cap
        .create_ref(Rights::EXEC, client_keys.public_key())
        .unwrap();
    let identifier = session.identifier;

    let (mut client, mut server) = fx.pair();
    let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
    let drive = async {
        proto::initiate_command(
            &mut client,
            &client_keys,
            &fx.server_key(),
            Command::Terminate,
        )
        .await?;
        proto::terminate(&mut client, identifier, &exec_only).await
    };

    let (served, terminated) = tokio::join!(serve, drive);
    assert!(served.is_err());
    assert_eq!(terminated.unwrap_err().kind(), ErrorKind::Unauthorized);
    assert_eq!(fx.ctx.sessions.len(), 1);
}

// ============================================
// S5 — Capability string form
// ============================================

#[test]
fn capability_string_roundtrip_matches_wire_layout() {
    let identity = SignKeyPair::generate().public_key();

    let mut secret = [0u8; 32];
    secret[0] = 0x60;
    secret[1] = 0xd5;
    secret[30] = 0x1b;
    secret[31] = 0xde;

    let cap = Capability::from_parts(
        secret,
        vec![ChainLink {
            identity,
            rights: Rights::EXEC | Rights::TERM,
        }],
    );

    let string = cap.to_string();
    assert!(string.starts_with("60d5"));
    assert!(string.contains(&format!("1bde|{identity}:xt")));

    let parsed: Capability = string.parse().unwrap();
    assert_eq!(parsed, cap);
}

// ============================================
// S6 — Delegated Connect through a broker
// ============================================

#[tokio::test]
async fn broker_delegation_grants_exactly_the_delegated_identity() {
    let fx = Fixture::new();
    let broker_keys = SignKeyPair::generate();
    let requester_keys = SignKeyPair::generate();

    // The broker requests the session on the requester's behalf.
    let (mut client, mut server) = fx.pair();
    let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
    let drive = async {
        proto::initiate_command(&mut client, &broker_keys, &fx.server_key(), Command::Request)
            .await?;
        proto::request_session(&mut client, params(&["delegated"])).await
    };
    let (served, granted) = tokio::join!(serve, drive);
    served.unwrap();
    let (identifier, broker_cap) = granted.unwrap();

    // The broker narrows its capability to EXEC for the requester.
    let delegated = broker_cap
        .create_ref(Rights::EXEC, requester_keys.public_key())
        .unwrap();

    // The broker itself may not present the delegated capability.
    let (mut client, mut server) = fx.pair();
    let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
    let drive = async {
        proto::initiate_command(&mut client, &broker_keys, &fx.server_key(), Command::Connect)
            .await?;
        proto::start_session(&mut client, identifier, &delegated).await
    };
    let (served, connected) = tokio::join!(serve, drive);
    assert!(served.is_err());
    assert_eq!(connected.unwrap_err().kind(), ErrorKind::Unauthorized);
    assert_eq!(fx.ctx.sessions.len(), 1, "refused connect must not consume");

    // The requester succeeds with the very same capability.
    let (mut client, mut server) = fx.pair();
    let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
    let drive = async {
        proto::initiate_command(
            &mut client,
            &requester_keys,
            &fx.server_key(),
            Command::Connect,
        )
        .await?;
        proto::start_session(&mut client, identifier, &delegated).await
    };
    let (served, connected) = tokio::join!(serve, drive);
    served.unwrap();
    connected.unwrap();
    assert!(fx.ctx.sessions.is_empty());
}

// ============================================
// Protocol edge: unknown command
// ============================================

#[tokio::test]
async fn unknown_command_is_answered_with_invalid() {
    let fx = Fixture::new();
    let client_keys = SignKeyPair::generate();
    let (mut client, mut server) = fx.pair();

    let serve = dispatch::handle_connection(&fx.ctx, &fx.service, &mut server);
    let drive = async {
        capone_core::handshake::initiate_encryption(&mut client, &client_keys, &fx.server_key())
            .await?;
        client
            .write_message(&ConnectionInitiation { command: 9 })
            .await?;
        client.read_message::<SessionResult>().await
    };

    let (served, result) = tokio::join!(serve, drive);
    assert!(served.is_err());
    assert_eq!(
        result.unwrap().error_kind(),
        Some(ErrorKind::Invalid),
        "unknown commands answer with the invalid class"
    );
}
