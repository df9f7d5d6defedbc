//! Transport abstraction for contactsync.
//!
//! The engine needs a single request/response exchange per round, framed
//! as whole MessagePack messages. The transport is connection-oriented:
//! - `connect()` opens a connection to the sync server
//! - `send()` transmits one encoded [`Message`](sync_types::Message)
//! - `recv()` receives one encoded message
//! - `close()` terminates the connection
//!
//! Platform transports (HTTPS, sockets) implement [`Transport`];
//! [`MockTransport`] scripts exchanges for tests.

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Largest message the engine accepts from a transport (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Message exceeds [`MAX_MESSAGE_SIZE`].
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// Operation timed out.
    #[error("timeout")]
    Timeout,
}

/// Transport for sync protocol messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the sync server at `address`.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one encoded message.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive one encoded message.
    ///
    /// Waits until a message is available or the connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection.
    async fn close(&self) -> Result<(), TransportError>;
}
