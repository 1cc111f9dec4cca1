//! Client Sessions
//!
//! One [`Session`] per WebSocket connection: who is connected, who they
//! authenticated as, which character they control, and the outbound event
//! channel used to push messages to them.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::warn;

use crate::core::codec::Encoding;
use crate::game::state::ActorId;
use crate::network::auth::UserIdentity;
use crate::network::transceiver::{BinaryEventTransceiver, EventMessage, TransceiverError};
use crate::network::transport::Transport;

/// Connection identifier, unique for the life of the process.
pub type ClientId = u64;

/// A connected client.
pub struct Session {
    client_id: ClientId,
    addr: SocketAddr,
    connected_at: DateTime<Utc>,
    outbound: BinaryEventTransceiver<()>,
    identity: Mutex<Option<UserIdentity>>,
    character: Mutex<Option<ActorId>>,
}

impl Session {
    /// Create a session that sends events over `transport`.
    pub fn new(
        client_id: ClientId,
        addr: SocketAddr,
        encoding: Encoding<EventMessage>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            client_id,
            addr,
            connected_at: Utc::now(),
            outbound: BinaryEventTransceiver::new(encoding).with_sender(transport),
            identity: Mutex::new(None),
            character: Mutex::new(None),
        }
    }

    /// Connection id.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// When the connection was accepted.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Authenticated user, if any.
    pub fn identity(&self) -> Option<UserIdentity> {
        self.identity.lock().clone()
    }

    /// Record the authenticated user.
    pub fn set_identity(&self, identity: UserIdentity) {
        *self.identity.lock() = Some(identity);
    }

    /// Character controlled by this session.
    pub fn character(&self) -> Option<ActorId> {
        *self.character.lock()
    }

    /// Set the controlled character.
    pub fn set_character(&self, character: ActorId) {
        *self.character.lock() = Some(character);
    }

    /// Release the controlled character.
    pub fn take_character(&self) -> Option<ActorId> {
        self.character.lock().take()
    }

    /// Push an event to the client.
    pub fn send<S, I>(&self, path: &[S], input: &I) -> Result<(), TransceiverError>
    where
        S: AsRef<str>,
        I: Serialize + ?Sized,
    {
        self.outbound.send(path, input)
    }

    /// Push an already built event to the client.
    pub fn send_message(&self, message: &EventMessage) -> Result<(), TransceiverError> {
        self.outbound.send_message(message)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("addr", &self.addr)
            .field("identity", &self.identity())
            .field("character", &self.character())
            .finish()
    }
}

/// Every connected session.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<BTreeMap<ClientId, Arc<Session>>>>,
    next_id: Arc<AtomicU64>,
}

impl ClientRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a connection id.
    pub fn next_client_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a session.
    pub fn insert(&self, session: Arc<Session>) {
        self.clients.write().insert(session.client_id(), session);
    }

    /// Unregister a session.
    pub fn remove(&self, client_id: ClientId) -> Option<Arc<Session>> {
        self.clients.write().remove(&client_id)
    }

    /// Look up a session.
    pub fn get(&self, client_id: ClientId) -> Option<Arc<Session>> {
        self.clients.read().get(&client_id).cloned()
    }

    /// Connected sessions.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// No one connected.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Snapshot of the sessions, in connection order.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.clients.read().values().cloned().collect()
    }

    /// Send an event to every session accepted by `filter`. Returns how many
    /// sessions it was delivered to.
    pub fn broadcast_where<S, I>(&self, path: &[S], input: &I, filter: impl Fn(&Session) -> bool) -> usize
    where
        S: AsRef<str>,
        I: Serialize + ?Sized,
    {
        let message = match EventMessage::new(path, input) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "failed to encode broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        for session in self.sessions().iter().filter(|s| filter(s)) {
            match session.send_message(&message) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(client = session.client_id(), error = %e, "broadcast failed"),
            }
        }
        delivered
    }

    /// Send an event to every session.
    pub fn broadcast<S, I>(&self, path: &[S], input: &I) -> usize
    where
        S: AsRef<str>,
        I: Serialize + ?Sized,
    {
        self.broadcast_where(path, input, |_| true)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transceiver::EVENT_PROTOCOL_HEADER;
    use crate::network::transport::ChannelTransport;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session(registry: &ClientRegistry) -> (Arc<Session>, UnboundedReceiver<Vec<u8>>) {
        let (transport, rx) = ChannelTransport::new();
        let session = Arc::new(Session::new(
            registry.next_client_id(),
            "127.0.0.1:9000".parse().unwrap(),
            Encoding::new(EVENT_PROTOCOL_HEADER).unwrap(),
            Arc::new(transport),
        ));
        registry.insert(session.clone());
        (session, rx)
    }

    #[test]
    fn test_identity_and_character() {
        let registry = ClientRegistry::new();
        let (session, _rx) = session(&registry);

        assert!(session.identity().is_none());
        session.set_identity(UserIdentity::from_subject("dana"));
        assert_eq!(session.identity().unwrap().subject, "dana");

        session.set_character(7);
        assert_eq!(session.character(), Some(7));
        assert_eq!(session.take_character(), Some(7));
        assert_eq!(session.character(), None);
    }

    #[test]
    fn test_broadcast_reaches_filtered_sessions() {
        let registry = ClientRegistry::new();
        let (first, mut first_rx) = session(&registry);
        let (second, mut second_rx) = session(&registry);
        assert_eq!(registry.len(), 2);
        assert_ne!(first.client_id(), second.client_id());

        first.set_character(1);
        let delivered = registry.broadcast_where(&["world", "state"], &5u32, |s| s.character().is_some());
        assert_eq!(delivered, 1);
        assert!(first_rx.try_recv().is_ok());
        assert!(second_rx.try_recv().is_err());

        assert_eq!(registry.broadcast(&["chat", "message"], "hello"), 2);

        registry.remove(first.client_id());
        assert!(registry.get(first.client_id()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_closed_transport_is_not_counted() {
        let registry = ClientRegistry::new();
        let (_session, rx) = session(&registry);
        drop(rx);
        assert_eq!(registry.broadcast(&["chat", "message"], "hello"), 0);
    }
}
