//! Scriptable transport for tests.
//!
//! Responses are queued up front, or produced by a responder that sees each
//! sent message (a scripted server). Every sent message is captured.
//! Failures can be injected per operation, and `stall_next_recv` simulates a
//! server that never answers (for timeout and cancellation paths).

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ResponderFn = dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync;

#[derive(Clone)]
struct Responder(Arc<ResponderFn>);

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Responder")
    }
}

/// Mock transport for testing.
///
/// Clones share state, so a test keeps one handle while the engine owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    connect_count: usize,
    sent_messages: Vec<Vec<u8>>,
    receive_queue: VecDeque<Vec<u8>>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
    stall_next_recv: bool,
    responder: Option<Responder>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a message to be returned by a later `recv()` call.
    pub fn queue_response(&self, data: Vec<u8>) {
        self.lock().receive_queue.push_back(data);
    }

    /// Answer every sent message with `respond(sent)`, queued behind any
    /// responses already waiting. `None` queues nothing.
    pub fn set_responder(
        &self,
        respond: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) {
        self.lock().responder = Some(Responder(Arc::new(respond)));
    }

    /// Number of queued responses not yet received.
    pub fn pending_responses(&self) -> usize {
        self.lock().receive_queue.len()
    }

    /// All messages that were sent.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.lock().sent_messages.clone()
    }

    /// The last message that was sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.lock().sent_messages.last().cloned()
    }

    /// The address of the last connection.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// How many times `connect()` succeeded.
    pub fn connect_count(&self) -> usize {
        self.lock().connect_count
    }

    /// Cause the next `connect()` to fail.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next `send()` to fail.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next `recv()` to fail.
    pub fn fail_next_recv(&self, error: &str) {
        self.lock().fail_next_recv = Some(error.to_string());
    }

    /// Make the next `recv()` wait forever.
    pub fn stall_next_recv(&self) {
        self.lock().stall_next_recv = true;
    }

    /// Clear all state (messages, queue, connection, injected failures).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        inner.connected = true;
        inner.connect_count += 1;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        inner.sent_messages.push(data.to_vec());
        if let Some(Responder(respond)) = inner.responder.clone() {
            if let Some(reply) = respond(data) {
                inner.receive_queue.push_back(reply);
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let stall = {
            let mut inner = self.lock();
            if !inner.connected {
                return Err(TransportError::NotConnected);
            }
            if let Some(error) = inner.fail_next_recv.take() {
                return Err(TransportError::ReceiveFailed(error));
            }
            std::mem::take(&mut inner.stall_next_recv)
        };

        if stall {
            std::future::pending::<()>().await;
        }

        self.lock()
            .receive_queue
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        Ok(())
    }
}
