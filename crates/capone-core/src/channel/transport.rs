// ============================================
// File: crates/capone-core/src/channel/transport.rs
// ============================================
//! # Block Transports
//!
//! ## Creation Reason
//! Abstracts how fixed-size blocks travel over a connected socket so
//! the channel's framing and encryption are independent of the socket
//! flavor, and so tests can run over in-memory pipes.
//!
//! ## Main Functionality
//! - `BlockIo`: async trait moving whole blocks
//! - `StreamTransport`: byte streams (TCP, in-memory duplex); blocks
//!   are concatenated on the wire and reassembled on receive
//! - `DatagramTransport`: connected UDP; one block per datagram
//!
//! ## Cancellation
//! `recv_block` keeps partial reads in an internal buffer, so a future
//! dropped mid-read loses no bytes. This is what lets the relay pump
//! race channel readiness against other descriptors.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpStream, UdpSocket};

use crate::error::{CoreError, Result};

// ============================================
// BlockIo Trait
// ============================================

/// Transport moving opaque fixed-size blocks.
#[async_trait]
pub trait BlockIo: Send {
    /// Waits until at least one byte can be received without blocking
    /// the caller past readiness.
    async fn ready(&mut self) -> Result<()>;

    /// Receives exactly `len` bytes.
    ///
    /// Returns `None` if the peer closed the connection on a block
    /// boundary before any byte of this block arrived.
    ///
    /// # Errors
    /// `TruncatedBlock` if the peer closed mid-block.
    async fn recv_block(&mut self, len: usize) -> Result<Option<Bytes>>;

    /// Sends one block.
    async fn send_block(&mut self, block: &[u8]) -> Result<()>;

    /// Shuts the transport down.
    async fn shutdown(&mut self) -> Result<()>;

    /// Remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

// ============================================
// StreamTransport
// ============================================

/// Block transport over an ordered byte stream.
pub struct StreamTransport<S> {
    stream: S,
    rx: BytesMut,
    peer: Option<SocketAddr>,
}

impl<S> StreamTransport<S> {
    /// Wraps a byte stream.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            rx: BytesMut::new(),
            peer: None,
        }
    }
}

impl StreamTransport<TcpStream> {
    /// Wraps a connected TCP stream, capturing its peer address.
    #[must_use]
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream,
            rx: BytesMut::new(),
            peer,
        }
    }
}

#[async_trait]
impl<S> BlockIo for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn ready(&mut self) -> Result<()> {
        if self.rx.is_empty() {
            // A zero-byte result marks EOF; recv_block reports it.
            let _ = self.stream.read_buf(&mut self.rx).await?;
        }
        Ok(())
    }

    async fn recv_block(&mut self, len: usize) -> Result<Option<Bytes>> {
        while self.rx.len() < len {
            let n = self.stream.read_buf(&mut self.rx).await?;
            if n == 0 {
                if self.rx.is_empty() {
                    return Ok(None);
                }
                return Err(CoreError::TruncatedBlock {
                    expected: len,
                    actual: self.rx.len(),
                });
            }
        }
        Ok(Some(self.rx.split_to(len).freeze()))
    }

    async fn send_block(&mut self, block: &[u8]) -> Result<()> {
        self.stream.write_all(block).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// In-memory transport used by tests and local loopback setups.
pub type MemoryTransport = StreamTransport<DuplexStream>;

// ============================================
// DatagramTransport
// ============================================

/// Block transport over a connected UDP socket; one block per datagram.
pub struct DatagramTransport {
    socket: UdpSocket,
}

impl DatagramTransport {
    /// Wraps a connected UDP socket.
    #[must_use]
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl BlockIo for DatagramTransport {
    async fn ready(&mut self) -> Result<()> {
        self.socket.readable().await?;
        Ok(())
    }

    async fn recv_block(&mut self, len: usize) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; len];
        let n = self.socket.recv(&mut buf).await?;
        if n != len {
            return Err(CoreError::TruncatedBlock {
                expected: len,
                actual: n,
            });
        }
        Ok(Some(buf.into()))
    }

    async fn send_block(&mut self, block: &[u8]) -> Result<()> {
        let n = self.socket.send(block).await?;
        if n != block.len() {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "short datagram send",
            )));
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.socket.peer_addr().ok()
    }
}
