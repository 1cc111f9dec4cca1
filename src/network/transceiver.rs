//! Binary Event Transceiver
//!
//! Sends and receives router events as header-prefixed binary buffers.
//! A transceiver is directional: one built without a sender can only
//! receive, one built without a router can only send.
//!
//! Failures on the receiving side never cross this boundary as panics or
//! early returns: a foreign buffer yields `None`, a malformed buffer yields
//! `Some(Err(DecodeError))`, and a failed dispatch is reported inside
//! [`HandledMessage::receive_result`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::core::codec::{CodecError, DecodeError, Encoding};
use crate::network::router::{join_path, RouterError, RouterNode};
use crate::network::transport::{Transport, TransportError};

/// Header claimed by the binary event protocol.
pub const EVENT_PROTOCOL_HEADER: u32 = 43_000;

/// One event on the wire: target path plus encoded input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Route path.
    pub path: Vec<String>,
    /// bincode-encoded handler input.
    pub input: Vec<u8>,
}

impl EventMessage {
    /// Build a message, encoding the input.
    pub fn new<S, I>(path: &[S], input: &I) -> Result<Self, bincode::Error>
    where
        S: AsRef<str>,
        I: Serialize + ?Sized,
    {
        Ok(Self {
            path: path.iter().map(|s| s.as_ref().to_string()).collect(),
            input: bincode::serialize(input)?,
        })
    }

    /// Decode the input as `I`.
    pub fn decode_input<I: for<'de> Deserialize<'de>>(&self) -> Result<I, bincode::Error> {
        bincode::deserialize(&self.input)
    }

    /// Path rendered as `a.b.c`.
    pub fn dotted_path(&self) -> String {
        join_path(&self.path)
    }
}

/// Errors on the sending side.
#[derive(Debug, Error)]
pub enum TransceiverError {
    /// Transceiver was built without a sender.
    #[error("no send function configured")]
    NoSender,

    /// Input could not be serialized.
    #[error("failed to encode input: {0}")]
    Input(#[source] bincode::Error),

    /// Envelope could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Transport rejected the message.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors on the receiving side, after a successful decode.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// Transceiver was built without a router.
    #[error("no receive function configured")]
    NoReceiver,

    /// The router rejected or failed the message.
    #[error(transparent)]
    Dispatch(#[from] RouterError),
}

/// Outcome of handling one decoded message.
#[derive(Debug)]
pub struct HandledMessage {
    /// The decoded message.
    pub message: EventMessage,
    /// Encoded handler output, or why there is none.
    pub receive_result: Result<Vec<u8>, ReceiveError>,
}

/// Sends and receives [`EventMessage`]s.
pub struct BinaryEventTransceiver<C> {
    encoding: Encoding<EventMessage>,
    sender: Option<Arc<dyn Transport>>,
    receiver: Option<Arc<RouterNode<C>>>,
}

impl<C> BinaryEventTransceiver<C> {
    /// Create a transceiver with neither direction configured.
    pub fn new(encoding: Encoding<EventMessage>) -> Self {
        Self {
            encoding,
            sender: None,
            receiver: None,
        }
    }

    /// Enable sending over `transport`.
    pub fn with_sender(mut self, transport: Arc<dyn Transport>) -> Self {
        self.sender = Some(transport);
        self
    }

    /// Enable receiving into `router`.
    pub fn with_receiver(mut self, router: Arc<RouterNode<C>>) -> Self {
        self.receiver = Some(router);
        self
    }

    /// The envelope encoding in use.
    pub fn encoding(&self) -> &Encoding<EventMessage> {
        &self.encoding
    }

    /// Encode and send an event.
    ///
    /// Nothing is sent unless encoding fully succeeds.
    pub fn send<S, I>(&self, path: &[S], input: &I) -> Result<(), TransceiverError>
    where
        S: AsRef<str>,
        I: Serialize + ?Sized,
    {
        let sender = self.sender.as_ref().ok_or(TransceiverError::NoSender)?;
        let message = EventMessage::new(path, input).map_err(TransceiverError::Input)?;
        let bytes = self.encoding.encode(&message)?;
        sender.send(bytes)?;
        Ok(())
    }

    /// Send an already built message.
    pub fn send_message(&self, message: &EventMessage) -> Result<(), TransceiverError> {
        let sender = self.sender.as_ref().ok_or(TransceiverError::NoSender)?;
        sender.send(self.encoding.encode(message)?)?;
        Ok(())
    }
}

impl<C: Send + 'static> BinaryEventTransceiver<C> {
    /// Decode a buffer and dispatch it.
    ///
    /// Returns `None` if the buffer belongs to another protocol; the caller
    /// should offer it to the next handler. `context_factory` runs once, and
    /// only for buffers that decode.
    pub async fn handle_message<F>(
        &self,
        buffer: &[u8],
        context_factory: F,
    ) -> Option<Result<HandledMessage, DecodeError>>
    where
        F: FnOnce() -> C,
    {
        #[cfg(feature = "debug-tracing")]
        tracing::trace!(bytes = %hex::encode(buffer), "inbound event buffer");

        let message = match self.encoding.decode(buffer)? {
            Ok(message) => message,
            Err(err) => {
                warn!(size = buffer.len(), error = %err, "dropping malformed event message");
                return Some(Err(err));
            }
        };

        let path = message.dotted_path();
        debug!(path = %path, size = buffer.len(), "invoking event");

        let receive_result = match &self.receiver {
            Some(router) => router
                .dispatch(&message.path, context_factory(), message.input.clone())
                .await
                .map_err(ReceiveError::from),
            None => Err(ReceiveError::NoReceiver),
        };

        match &receive_result {
            Ok(_) => info!(path = %path, size = buffer.len(), "event"),
            Err(err) => error!(path = %path, size = buffer.len(), error = %err, "error handling event"),
        }

        Some(Ok(HandledMessage {
            message,
            receive_result,
        }))
    }
}

// =============================================================================
// TESTS
// =============================================================================
