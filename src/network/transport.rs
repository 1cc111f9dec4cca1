//! Transport
//!
//! The only thing the transceivers need from a socket: push bytes out.
//! Inbound bytes are fed to the transceivers by whoever owns the socket.

use tokio::sync::mpsc;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer is gone.
    #[error("transport closed")]
    Closed,
}

/// Outbound half of a duplex byte-message channel.
pub trait Transport: Send + Sync {
    /// Queue one message for delivery.
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// Transport backed by an unbounded tokio channel.
///
/// The WebSocket writer task drains the receiving end; tests read it
/// directly.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelTransport {
    /// Create a transport and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(bytes).map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_transport_delivers_in_order() {
        let (transport, mut rx) = ChannelTransport::new();
        transport.send(vec![1]).unwrap();
        transport.send(vec![2, 3]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![1]);
        assert_eq!(rx.try_recv().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_send_after_close_fails() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);
        assert!(matches!(transport.send(vec![1]), Err(TransportError::Closed)));
    }
}
