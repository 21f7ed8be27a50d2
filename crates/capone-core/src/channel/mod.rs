// ============================================
// File: crates/capone-core/src/channel/mod.rs
// ============================================
//! # Framed Channel
//!
//! ## Creation Reason
//! The byte transport of the Capone protocol: payloads travel in
//! fixed-size blocks over a connected socket, optionally wrapped in
//! XSalsa20-Poly1305 authenticated encryption with per-direction nonce
//! counters.
//!
//! ## Framing
//! ```text
//! ┌───────────────────────── block 0 ─────────────────────────┐
//! │ payload length (4 bytes BE) │ payload ...                 │
//! ├───────────────────────── block 1 ─────────────────────────┤
//! │ payload continued ...                                     │
//! ├───────────────────────── block n ─────────────────────────┤
//! │ payload tail │ zero padding up to the block length        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//! Under the datagram transport one block is one datagram; under the
//! stream transport blocks are concatenated and reassembled by length.
//! With encryption enabled, every block on the wire is the AEAD
//! ciphertext of a `blocklen − 16` byte plaintext block, so the length
//! prefix itself is encrypted.
//!
//! ## Nonce Policy
//! Each direction owns a 24-byte counter stepping by two per block;
//! the handshake assigns mirrored starting points (see `handshake`).
//! A decryption failure is fatal to the channel.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The channel is `Send` but deliberately not `Sync`: the nonce
//!   counters admit exactly one user at a time
//! - Never reuse a symmetric key across connections

pub mod nonce;
pub mod transport;

use bytes::Bytes;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use crate::crypto::keys::SymmetricKey;
use crate::crypto::MAC_SIZE;
use crate::error::{CoreError, Result};
use nonce::Nonce;
use transport::{BlockIo, DatagramTransport, StreamTransport};

// ============================================
// Constants
// ============================================

/// Smallest usable block length; leaves room for the length prefix,
/// the authentication tag and at least some payload.
pub const MIN_BLOCKLEN: usize = 40;

/// Largest supported block length.
pub const MAX_BLOCKLEN: usize = 4096;

/// Default block length.
pub const DEFAULT_BLOCKLEN: usize = 512;

/// Upper bound for a single structured message.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Size of the big-endian payload length prefix in block 0.
const LENGTH_PREFIX: usize = 4;

/// Relay pump buffer size.
const RELAY_BUFSIZE: usize = 2048;

// ============================================
// Crypto State
// ============================================

/// Which side of the handshake this channel took; decides the nonce
/// starting points so the two directions never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Sends with nonce 0, receives with nonce 1.
    Initiator,
    /// Sends with nonce 1, receives with nonce 0.
    Responder,
}

struct SymmetricState {
    key: SymmetricKey,
    cipher: XSalsa20Poly1305,
    local_nonce: Nonce,
    remote_nonce: Nonce,
}

enum CryptoState {
    Plain,
    Symmetric(Box<SymmetricState>),
}

// ============================================
// Channel
// ============================================

/// A connected socket carrying framed, optionally encrypted payloads.
pub struct Channel {
    io: Box<dyn BlockIo>,
    blocklen: usize,
    crypto: CryptoState,
}

impl Channel {
    // ========================================
    // Construction
    // ========================================

    /// Wraps any ordered byte stream.
    #[must_use]
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::from_io(Box::new(StreamTransport::new(stream)))
    }

    /// Wraps a connected TCP stream.
    #[must_use]
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self::from_io(Box::new(StreamTransport::from_tcp(stream)))
    }

    /// Wraps a connected UDP socket; one block per datagram.
    #[must_use]
    pub fn from_datagram(socket: UdpSocket) -> Self {
        Self::from_io(Box::new(DatagramTransport::new(socket)))
    }

    /// Connects to `host:port` over TCP.
    ///
    /// # Errors
    /// Returns `Io` if the connection cannot be established.
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::from_tcp(stream))
    }

    /// Creates a connected in-memory channel pair, for tests and
    /// loopback use.
    ///
    /// # Errors
    /// Returns `InvalidBlockLength` for block lengths outside 40..=4096.
    pub fn pair(blocklen: usize) -> Result<(Self, Self)> {
        let (left, right) = tokio::io::duplex(MAX_BLOCKLEN * 16);
        let mut a = Self::from_stream(left);
        a.set_blocklen(blocklen)?;
        let mut b = Self::from_stream(right);
        b.set_blocklen(blocklen)?;
        Ok((a, b))
    }

    fn from_io(io: Box<dyn BlockIo>) -> Self {
        Self {
            io,
            blocklen: DEFAULT_BLOCKLEN,
            crypto: CryptoState::Plain,
        }
    }

    // ========================================
    // Configuration
    // ========================================

    /// Sets the block length.
    ///
    /// # Errors
    /// Returns `InvalidBlockLength` outside the 40..=4096 range.
    pub fn set_blocklen(&mut self, blocklen: usize) -> Result<()> {
        if !(MIN_BLOCKLEN..=MAX_BLOCKLEN).contains(&blocklen) {
            return Err(CoreError::InvalidBlockLength(blocklen));
        }
        self.blocklen = blocklen;
        Ok(())
    }

    /// Returns the current block length.
    #[must_use]
    pub fn blocklen(&self) -> usize {
        self.blocklen
    }

    /// Enables symmetric encryption with nonces assigned by `role`.
    pub fn enable_encryption(&mut self, key: SymmetricKey, role: HandshakeRole) {
        let cipher = XSalsa20Poly1305::new(key.as_bytes().into());
        let (local_nonce, remote_nonce) = match role {
            HandshakeRole::Initiator => (Nonce::zero(), Nonce::one()),
            HandshakeRole::Responder => (Nonce::one(), Nonce::zero()),
        };
        self.crypto = CryptoState::Symmetric(Box::new(SymmetricState {
            key,
            cipher,
            local_nonce,
            remote_nonce,
        }));
    }

    /// Drops the symmetric crypto state; subsequent blocks travel in
    /// the clear.
    pub fn disable_encryption(&mut self) {
        self.crypto = CryptoState::Plain;
    }

    /// Returns `true` if blocks are encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        matches!(self.crypto, CryptoState::Symmetric(_))
    }

    /// Remote socket address, when the transport has one.
    #[must_use]
    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.io.peer_addr()
    }

    /// Key and (local, remote) nonces, for inspection in tests.
    pub(crate) fn symmetric_state(&self) -> Option<(&SymmetricKey, Nonce, Nonce)> {
        match &self.crypto {
            CryptoState::Plain => None,
            CryptoState::Symmetric(state) => {
                Some((&state.key, state.local_nonce, state.remote_nonce))
            }
        }
    }

    /// Plaintext bytes carried per block.
    fn block_capacity(&self) -> usize {
        match self.crypto {
            CryptoState::Plain => self.blocklen,
            CryptoState::Symmetric(_) => self.blocklen - MAC_SIZE,
        }
    }

    // ========================================
    // Byte Transfer
    // ========================================

    /// Writes a payload, split into padded fixed-size blocks.
    ///
    /// # Errors
    /// Returns `Io` on transport failure, `Encryption` if sealing a
    /// block fails.
    pub async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let total = u32::try_from(data.len()).map_err(|_| CoreError::InvalidLength {
            length: data.len(),
            max: u32::MAX as usize,
        })?;

        let capacity = self.block_capacity();
        let mut block = vec![0u8; capacity];
        block[..LENGTH_PREFIX].copy_from_slice(&total.to_be_bytes());

        let mut offset = LENGTH_PREFIX;
        let mut written = 0;

        loop {
            let take = (data.len() - written).min(capacity - offset);
            block[offset..offset + take].copy_from_slice(&data[written..written + take]);
            block[offset + take..].fill(0);

            self.emit_block(&block).await?;

            written += take;
            offset = 0;
            if written >= data.len() {
                break;
            }
        }

        Ok(())
    }

    /// Reads one payload of at most `max` bytes.
    ///
    /// # Errors
    /// - `InvalidLength` if the announced length exceeds `max`; no
    ///   further blocks are consumed
    /// - `ChannelClosed` if the peer closed before the first block
    /// - `TruncatedBlock` / `Io` on transport failures
    /// - `Decryption` on AEAD failure, which is fatal to the channel
    pub async fn read_bytes(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut total = 0usize;
        let mut received = 0usize;
        let mut offset = LENGTH_PREFIX;
        let mut first = true;

        loop {
            let block = self.absorb_block().await?;

            if first {
                let mut prefix = [0u8; LENGTH_PREFIX];
                prefix.copy_from_slice(&block[..LENGTH_PREFIX]);
                total = u32::from_be_bytes(prefix) as usize;
                if total > max {
                    return Err(CoreError::InvalidLength {
                        length: total,
                        max,
                    });
                }
                out.reserve_exact(total);
                first = false;
            }

            let take = (total - received).min(block.len() - offset);
            out.extend_from_slice(&block[offset..offset + take]);
            received += take;
            offset = 0;

            if received >= total {
                break;
            }
        }

        Ok(out)
    }

    /// Sends one block, sealing it first when encryption is on.
    async fn emit_block(&mut self, block: &[u8]) -> Result<()> {
        match &mut self.crypto {
            CryptoState::Plain => self.io.send_block(block).await,
            CryptoState::Symmetric(state) => {
                let nonce = crypto_secretbox::Nonce::from(*state.local_nonce.as_bytes());
                let sealed = state
                    .cipher
                    .encrypt(&nonce, block)
                    .map_err(|_| CoreError::Encryption)?;
                state.local_nonce.step();
                self.io.send_block(&sealed).await
            }
        }
    }

    /// Receives one block, opening it when encryption is on.
    async fn absorb_block(&mut self) -> Result<Bytes> {
        let block = self
            .io
            .recv_block(self.blocklen)
            .await?
            .ok_or(CoreError::ChannelClosed)?;

        match &mut self.crypto {
            CryptoState::Plain => Ok(block),
            CryptoState::Symmetric(state) => {
                let nonce = crypto_secretbox::Nonce::from(*state.remote_nonce.as_bytes());
                let opened = state
                    .cipher
                    .decrypt(&nonce, block.as_ref())
                    .map_err(|_| CoreError::Decryption)?;
                state.remote_nonce.step();
                Ok(opened.into())
            }
        }
    }

    // ========================================
    // Structured Messages
    // ========================================

    /// Serializes and sends one wire message.
    ///
    /// # Errors
    /// Returns `MalformedMessage` if encoding fails, `InvalidLength`
    /// if the encoded form exceeds the message bound.
    pub async fn write_message<M: Serialize>(&mut self, msg: &M) -> Result<()> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(msg, &mut buf)
            .map_err(|e| CoreError::malformed(e.to_string()))?;
        if buf.len() > MAX_MESSAGE_LEN {
            return Err(CoreError::InvalidLength {
                length: buf.len(),
                max: MAX_MESSAGE_LEN,
            });
        }
        self.write_bytes(&buf).await
    }

    /// Receives and deserializes one wire message.
    ///
    /// # Errors
    /// Returns `MalformedMessage` if the payload does not decode as `M`.
    pub async fn read_message<M: DeserializeOwned>(&mut self) -> Result<M> {
        let buf = self.read_bytes(MAX_MESSAGE_LEN).await?;
        ciborium::de::from_reader(buf.as_slice()).map_err(|e| CoreError::malformed(e.to_string()))
    }

    // ========================================
    // Relay
    // ========================================

    /// Bidirectional pump between the channel and a local duplex
    /// descriptor pair (pty, child stdio, local socket).
    ///
    /// Payloads received from the channel are written to `target`;
    /// bytes read from `target` are framed and sent on the channel.
    /// Returns cleanly when either side closes.
    ///
    /// # Errors
    /// Returns the first transport or crypto error of either side.
    pub async fn relay<T>(&mut self, target: &mut T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        enum Wakeup {
            Channel,
            Target(usize),
        }

        let mut buf = vec![0u8; RELAY_BUFSIZE];

        loop {
            let wakeup = tokio::select! {
                ready = self.io.ready() => {
                    ready?;
                    Wakeup::Channel
                }
                read = target.read(&mut buf) => Wakeup::Target(read?),
            };

            match wakeup {
                Wakeup::Channel => match self.read_bytes(RELAY_BUFSIZE).await {
                    Ok(payload) => {
                        target.write_all(&payload).await?;
                        target.flush().await?;
                    }
                    Err(CoreError::ChannelClosed) => {
                        debug!("channel closed, stopping relay");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                },
                Wakeup::Target(0) => {
                    debug!("descriptor closed, stopping relay");
                    return Ok(());
                }
                Wakeup::Target(n) => self.write_bytes(&buf[..n]).await?,
            }
        }
    }

    // ========================================
    // Teardown
    // ========================================

    /// Shuts down the underlying transport.
    ///
    /// # Errors
    /// Returns `Io` if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("blocklen", &self.blocklen)
            .field("encrypted", &self.is_encrypted())
            .field("peer", &self.peer_addr())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn encrypted_pair(blocklen: usize) -> (Channel, Channel) {
        let (mut a, mut b) = Channel::pair(blocklen).unwrap();
        let key = SymmetricKey::generate();
        a.enable_encryption(key.clone(), HandshakeRole::Initiator);
        b.enable_encryption(key, HandshakeRole::Responder);
        (a, b)
    }

    #[test]
    fn test_blocklen_bounds() {
        let (mut a, _b) = Channel::pair(DEFAULT_BLOCKLEN).unwrap();

        assert!(a.set_blocklen(MIN_BLOCKLEN).is_ok());
        assert!(a.set_blocklen(MAX_BLOCKLEN).is_ok());
        assert!(matches!(
            a.set_blocklen(MIN_BLOCKLEN - 1),
            Err(CoreError::InvalidBlockLength(_))
        ));
        assert!(a.set_blocklen(MAX_BLOCKLEN + 1).is_err());
    }

    #[tokio::test]
    async fn test_plain_roundtrip() {
        let (mut a, mut b) = Channel::pair(DEFAULT_BLOCKLEN).unwrap();

        a.write_bytes(b"hello world").await.unwrap();
        assert_eq!(b.read_bytes(1024).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_empty_payload_roundtrip() {
        let (mut a, mut b) = Channel::pair(DEFAULT_BLOCKLEN).unwrap();

        a.write_bytes(b"").await.unwrap();
        assert!(b.read_bytes(1024).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multi_block_roundtrip_at_min_blocklen() {
        let (mut a, mut b) = Channel::pair(MIN_BLOCKLEN).unwrap();
        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();

        let writer = a.write_bytes(&payload);
        let reader = b.read_bytes(4096);
        let (w, r) = tokio::join!(writer, reader);
        w.unwrap();
        assert_eq!(r.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_roundtrip_at_max_blocklen() {
        let (mut a, mut b) = encrypted_pair(MAX_BLOCKLEN);
        let payload = vec![0x5au8; 10_000];

        let (w, r) = tokio::join!(a.write_bytes(&payload), b.read_bytes(16_384));
        w.unwrap();
        assert_eq!(r.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_plain_payload_fits_single_block() {
        let (stream_a, mut raw) = tokio::io::duplex(MAX_BLOCKLEN * 4);
        let mut a = Channel::from_stream(stream_a);
        a.set_blocklen(DEFAULT_BLOCKLEN).unwrap();

        let payload = vec![0x11u8; DEFAULT_BLOCKLEN - 4];
        a.write_bytes(&payload).await.unwrap();

        let mut wire = vec![0u8; DEFAULT_BLOCKLEN];
        raw.read_exact(&mut wire).await.unwrap();

        // Exactly one block: nothing further on the wire.
        let mut more = [0u8; 1];
        let pending = timeout(Duration::from_millis(50), raw.read(&mut more)).await;
        assert!(pending.is_err(), "payload of B-4 must fit a single block");
    }

    #[tokio::test]
    async fn test_encrypted_payload_fits_single_block() {
        let (stream_a, mut raw) = tokio::io::duplex(MAX_BLOCKLEN * 4);
        let mut a = Channel::from_stream(stream_a);
        a.set_blocklen(DEFAULT_BLOCKLEN).unwrap();
        a.enable_encryption(SymmetricKey::generate(), HandshakeRole::Initiator);

        let payload = vec![0x22u8; DEFAULT_BLOCKLEN - 20];
        a.write_bytes(&payload).await.unwrap();

        let mut wire = vec![0u8; DEFAULT_BLOCKLEN];
        raw.read_exact(&mut wire).await.unwrap();

        let mut more = [0u8; 1];
        let pending = timeout(Duration::from_millis(50), raw.read(&mut more)).await;
        assert!(pending.is_err(), "payload of B-20 must fit a single block");
    }

    #[tokio::test]
    async fn test_read_bytes_enforces_max() {
        let (mut a, mut b) = Channel::pair(DEFAULT_BLOCKLEN).unwrap();

        a.write_bytes(&[0u8; 100]).await.unwrap();
        let result = b.read_bytes(99).await;
        assert!(matches!(
            result,
            Err(CoreError::InvalidLength { length: 100, max: 99 })
        ));
    }

    #[tokio::test]
    async fn test_encrypted_roundtrip() {
        let (mut a, mut b) = encrypted_pair(DEFAULT_BLOCKLEN);

        a.write_bytes(b"secret payload").await.unwrap();
        assert_eq!(b.read_bytes(1024).await.unwrap(), b"secret payload");

        // And the reverse direction, exercising the mirrored nonces.
        b.write_bytes(b"reply").await.unwrap();
        assert_eq!(a.read_bytes(1024).await.unwrap(), b"reply");
    }

    #[tokio::test]
    async fn test_mismatched_nonces_fail_decryption() {
        let (mut a, mut b) = Channel::pair(DEFAULT_BLOCKLEN).unwrap();
        let key = SymmetricKey::generate();
        // Both sides claim the initiator role: b expects nonce 1 but a
        // seals with nonce 0.
        a.enable_encryption(key.clone(), HandshakeRole::Initiator);
        b.enable_encryption(key, HandshakeRole::Initiator);

        a.write_bytes(b"misaligned").await.unwrap();
        assert!(matches!(
            b.read_bytes(1024).await,
            Err(CoreError::Decryption)
        ));
    }

    #[tokio::test]
    async fn test_mismatched_keys_fail_decryption() {
        let (mut a, mut b) = Channel::pair(DEFAULT_BLOCKLEN).unwrap();
        a.enable_encryption(SymmetricKey::generate(), HandshakeRole::Initiator);
        b.enable_encryption(SymmetricKey::generate(), HandshakeRole::Responder);

        a.write_bytes(b"key mismatch").await.unwrap();
        assert!(matches!(
            b.read_bytes(1024).await,
            Err(CoreError::Decryption)
        ));
    }

    #[tokio::test]
    async fn test_message_roundtrip() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Probe {
            id: u32,
            data: Vec<u8>,
        }

        let (mut a, mut b) = encrypted_pair(DEFAULT_BLOCKLEN);
        let msg = Probe {
            id: 42,
            data: vec![1, 2, 3],
        };

        a.write_message(&msg).await.unwrap();
        let decoded: Probe = b.read_message().await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn test_closed_channel_reports_closed() {
        let (mut a, b) = Channel::pair(DEFAULT_BLOCKLEN).unwrap();
        drop(b);

        assert!(matches!(
            a.read_bytes(1024).await,
            Err(CoreError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_relay_pumps_both_directions() {
        let (mut near, mut far) = encrypted_pair(DEFAULT_BLOCKLEN);
        let (mut local, mut remote) = tokio::io::duplex(4096);

        let pump = tokio::spawn(async move {
            far.relay(&mut remote).await.unwrap();
        });

        // Channel -> descriptor.
        near.write_bytes(b"to descriptor").await.unwrap();
        let mut buf = [0u8; 13];
        local.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"to descriptor");

        // Descriptor -> channel.
        local.write_all(b"to channel").await.unwrap();
        assert_eq!(near.read_bytes(1024).await.unwrap(), b"to channel");

        // Closing the descriptor stops the relay cleanly.
        drop(local);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_datagram_roundtrip() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();

        let mut tx = Channel::from_datagram(a);
        let mut rx = Channel::from_datagram(b);
        tx.set_blocklen(MIN_BLOCKLEN).unwrap();
        rx.set_blocklen(MIN_BLOCKLEN).unwrap();

        tx.write_bytes(b"datagram payload").await.unwrap();
        assert_eq!(rx.read_bytes(1024).await.unwrap(), b"datagram payload");
    }
}
