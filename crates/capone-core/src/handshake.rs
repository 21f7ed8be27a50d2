// ============================================
// File: crates/capone-core/src/handshake.rs
// ============================================
//! # Key-Exchange Handshake
//!
//! ## Creation Reason
//! Establishes the per-connection symmetric key by an ephemeral X25519
//! exchange, authenticated against both sides' long-term Ed25519 keys.
//!
//! ## Handshake Flow
//! ```text
//! Initiator                                       Responder
//!   │                                                 │
//!   │  SessionKey                                     │
//!   │  ├─ sign_pk (Ed25519)                           │
//!   │  ├─ encrypt_pk (X25519, ephemeral)              │
//!   │  └─ signature = Sign(sign_sk, encrypt_pk) ────► │
//!   │                                                 │
//!   │                        verify signature         │
//!   │                        generate ephemeral       │
//!   │                                                 │
//!   │                                     SessionKey  │
//!   │  ◄───────────────────────────────── (mirrored)  │
//!   │                                                 │
//!   │  verify signature                               │
//!   │  check sign_pk == expected                      │
//!   │                                                 │
//!   │  q = X25519(esk, epk_remote)                    │
//!   │  K = BLAKE2b-256(q ‖ epk_init ‖ epk_resp)       │
//!   │                                                 │
//!   │ ═════════ symmetric encryption on ════════════  │
//!   │   nonces: initiator 0/1, responder 1/0          │
//! ```
//!
//! The initiator sends first and then reads; the responder reads first
//! and then sends. The responder records whichever identity the peer
//! presents; the initiator instead compares it against the expected key
//! and aborts on mismatch.
//!
//! ## Failure Modes
//! Truncated read, signature verification failure, remote key mismatch
//! and a zero shared point are all fatal; the channel is closed by the
//! caller dropping it.

use tracing::{debug, trace};
use zeroize::Zeroize;

use crate::channel::{Channel, HandshakeRole};
use crate::crypto::kdf::derive_channel_key;
use crate::crypto::keys::{EphemeralKeyPair, SignKeyPair, SignPublicKey};
use crate::error::{CoreError, Result};
use crate::protocol::messages::{SessionKey, SignatureBytes};

/// Builds this side's handshake message.
fn session_key_message(keys: &SignKeyPair, ephemeral: &EphemeralKeyPair) -> SessionKey {
    let encrypt_pk = ephemeral.public_key_bytes();
    SessionKey {
        sign_pk: keys.public_key(),
        encrypt_pk,
        signature: SignatureBytes(keys.sign(&encrypt_pk)),
    }
}

/// Checks the peer's signature over its ephemeral key.
fn verify_session_key(msg: &SessionKey) -> Result<()> {
    msg.sign_pk.verify(&msg.encrypt_pk, &msg.signature.0)
}

/// Runs the initiating side of the handshake.
///
/// On success the channel switches to symmetric encryption with the
/// initiator nonce assignment.
///
/// # Arguments
/// * `channel` - freshly connected, unencrypted channel
/// * `keys` - the caller's long-term identity
/// * `remote_key` - identity the remote is expected to present
///
/// # Errors
/// - `KeyMismatch` if the peer presents a different long-term key
/// - `SignatureVerification` if its signature does not check out
/// - `KeyExchange` if the exchange degenerates to the zero point
pub async fn initiate_encryption(
    channel: &mut Channel,
    keys: &SignKeyPair,
    remote_key: &SignPublicKey,
) -> Result<()> {
    let ephemeral = EphemeralKeyPair::generate();
    let local_epk = ephemeral.public_key_bytes();

    channel
        .write_message(&session_key_message(keys, &ephemeral))
        .await?;
    trace!("sent session key, awaiting response");

    let msg: SessionKey = channel.read_message().await?;
    if msg.sign_pk != *remote_key {
        return Err(CoreError::KeyMismatch);
    }
    verify_session_key(&msg)?;

    let mut shared = ephemeral.exchange(&msg.encrypt_pk)?;
    let key = derive_channel_key(&shared, &local_epk, &msg.encrypt_pk);
    shared.zeroize();
    channel.enable_encryption(key, HandshakeRole::Initiator);

    debug!(remote = %msg.sign_pk, "handshake complete (initiator)");
    Ok(())
}

/// Runs the responding side of the handshake.
///
/// On success the channel switches to symmetric encryption with the
/// responder nonce assignment, and the peer's presented identity is
/// returned for authorization decisions.
///
/// # Errors
/// - `SignatureVerification` if the peer's signature does not check out
/// - `KeyExchange` if the exchange degenerates to the zero point
pub async fn await_encryption(
    channel: &mut Channel,
    keys: &SignKeyPair,
) -> Result<SignPublicKey> {
    let msg: SessionKey = channel.read_message().await?;
    verify_session_key(&msg)?;

    let ephemeral = EphemeralKeyPair::generate();
    let local_epk = ephemeral.public_key_bytes();

    channel
        .write_message(&session_key_message(keys, &ephemeral))
        .await?;

    let mut shared = ephemeral.exchange(&msg.encrypt_pk)?;
    let key = derive_channel_key(&shared, &msg.encrypt_pk, &local_epk);
    shared.zeroize();
    channel.enable_encryption(key, HandshakeRole::Responder);

    debug!(remote = %msg.sign_pk, "handshake complete (responder)");
    Ok(msg.sign_pk)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DEFAULT_BLOCKLEN;
    use crate::protocol::messages::SessionKey;

    fn pair() -> (Channel, Channel) {
        Channel::pair(DEFAULT_BLOCKLEN).unwrap()
    }

    #[tokio::test]
    async fn test_handshake_derives_identical_keys() {
        let client_keys = SignKeyPair::generate();
        let server_keys = SignKeyPair::generate();
        let (mut client, mut server) = pair();

        let server_public_key = server_keys.public_key();
        let (initiated, awaited) = tokio::join!(
            initiate_encryption(&mut client, &client_keys, &server_public_key),
            await_encryption(&mut server, &server_keys),
        );
        initiated.unwrap();
        assert_eq!(awaited.unwrap(), client_keys.public_key());

        let (client_key, client_local, client_remote) = client.symmetric_state().unwrap();
        let (server_key, server_local, server_remote) = server.symmetric_state().unwrap();

        assert_eq!(client_key, server_key);
        assert_eq!(client_local, server_remote);
        assert_eq!(client_remote, server_local);
    }

    #[tokio::test]
    async fn test_handshaked_channels_talk() {
        let client_keys = SignKeyPair::generate();
        let server_keys = SignKeyPair::generate();
        let (mut client, mut server) = pair();

        let server_public_key = server_keys.public_key();
        let (initiated, awaited) = tokio::join!(
            initiate_encryption(&mut client, &client_keys, &server_public_key),
            await_encryption(&mut server, &server_keys),
        );
        initiated.unwrap();
        awaited.unwrap();

        client.write_bytes(b"ping").await.unwrap();
        assert_eq!(server.read_bytes(64).await.unwrap(), b"ping");
        server.write_bytes(b"pong").await.unwrap();
        assert_eq!(client.read_bytes(64).await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_initiator_rejects_unexpected_identity() {
        let client_keys = SignKeyPair::generate();
        let server_keys = SignKeyPair::generate();
        let expected = SignKeyPair::generate(); // not the server's key
        let (mut client, mut server) = pair();

        let expected_public_key = expected.public_key();
        let (initiated, _) = tokio::join!(
            initiate_encryption(&mut client, &client_keys, &expected_public_key),
            await_encryption(&mut server, &server_keys),
        );

        assert!(matches!(initiated, Err(CoreError::KeyMismatch)));
    }

    #[tokio::test]
    async fn test_responder_rejects_forged_signature() {
        let client_keys = SignKeyPair::generate();
        let server_keys = SignKeyPair::generate();
        let (mut client, mut server) = pair();

        // Hand-roll an initiator message whose signature covers a
        // different ephemeral key than the one presented.
        let ephemeral = EphemeralKeyPair::generate();
        let forged = SessionKey {
            sign_pk: client_keys.public_key(),
            encrypt_pk: ephemeral.public_key_bytes(),
            signature: SignatureBytes(client_keys.sign(b"some other key")),
        };

        let (sent, awaited) = tokio::join!(
            client.write_message(&forged),
            await_encryption(&mut server, &server_keys),
        );
        sent.unwrap();
        assert!(matches!(awaited, Err(CoreError::SignatureVerification)));
    }

    #[tokio::test]
    async fn test_truncated_handshake_fails() {
        let server_keys = SignKeyPair::generate();
        let (client, mut server) = pair();
        drop(client);

        let awaited = await_encryption(&mut server, &server_keys).await;
        assert!(matches!(awaited, Err(CoreError::ChannelClosed)));
    }
}
