//! RPC Transceiver
//!
//! Request/response on top of the same router and codec as events. Calls
//! and responses have their own headers so both can share a socket with the
//! event protocol:
//!
//! ```text
//! client                              server
//!   call(path, input) ──[41000|RpcCall]──▶ dispatch(path)
//!   await response   ◀──[41001|RpcResponse]── Ok(output) | Err(message)
//! ```
//!
//! A handler failure travels back as an error response on the same channel a
//! success would have used; it never disappears silently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::core::codec::{CodecError, DecodeError, Encoding};
use crate::network::router::{join_path, RouterNode};
use crate::network::transceiver::ReceiveError;
use crate::network::transport::{Transport, TransportError};

/// Header claimed by RPC calls.
pub const RPC_CALL_HEADER: u32 = 41_000;
/// Header claimed by RPC responses.
pub const RPC_RESPONSE_HEADER: u32 = 41_001;
/// Default time to wait for a response.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-transceiver call identifier.
pub type RpcCallId = u64;

/// A call on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcCall {
    /// Correlates the response.
    pub id: RpcCallId,
    /// Route path.
    pub path: Vec<String>,
    /// bincode-encoded input.
    pub input: Vec<u8>,
}

/// A response on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Id of the call being answered.
    pub id: RpcCallId,
    /// Encoded output, or the formatted error.
    pub result: Result<Vec<u8>, String>,
}

/// RPC errors seen by the caller.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Transceiver was built without a transport.
    #[error("no send function configured")]
    NoSender,

    /// No response arrived in time.
    #[error("rpc \"{path}\" timed out after {timeout:?}")]
    Timeout {
        /// Dotted path of the call.
        path: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The remote handler failed.
    #[error("rpc \"{path}\" failed remotely: {message}")]
    Remote {
        /// Dotted path of the call.
        path: String,
        /// Remote error message.
        message: String,
    },

    /// The transceiver dropped the pending call.
    #[error("rpc \"{0}\" was abandoned")]
    Abandoned(String),

    /// Input could not be encoded.
    #[error("failed to encode input: {0}")]
    Input(#[source] bincode::Error),

    /// Output could not be decoded.
    #[error("failed to decode output: {0}")]
    Output(#[source] bincode::Error),

    /// Envelope encoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Transport rejected the message.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outcome of [`RpcTransceiver::handle_message`] for RPC buffers.
#[derive(Debug)]
pub enum RpcMessageOutcome {
    /// A call was dispatched and answered.
    Call {
        /// The decoded call.
        call: RpcCall,
        /// Dispatch result (also sent back to the caller).
        result: Result<Vec<u8>, ReceiveError>,
    },
    /// A response was matched to a pending call.
    Response {
        /// Id carried by the response.
        id: RpcCallId,
        /// Whether a pending call was waiting for it.
        matched: bool,
    },
    /// The header matched but the payload did not decode.
    Malformed(DecodeError),
}

type Resolver = oneshot::Sender<Result<Vec<u8>, String>>;

/// Removes a pending call however the awaiting future ends.
struct PendingCall<'a> {
    pending: &'a Mutex<HashMap<RpcCallId, Resolver>>,
    id: RpcCallId,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Bidirectional RPC endpoint.
pub struct RpcTransceiver<C> {
    call_encoding: Encoding<RpcCall>,
    response_encoding: Encoding<RpcResponse>,
    sender: Option<Arc<dyn Transport>>,
    receiver: Option<Arc<RouterNode<C>>>,
    timeout: Option<Duration>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<RpcCallId, Resolver>>,
}

impl<C> RpcTransceiver<C> {
    /// Create a transceiver with the standard headers and default timeout.
    pub fn new() -> Result<Self, CodecError> {
        Self::with_headers(RPC_CALL_HEADER, RPC_RESPONSE_HEADER)
    }

    /// Create a transceiver with custom headers.
    pub fn with_headers(call_header: u32, response_header: u32) -> Result<Self, CodecError> {
        Ok(Self {
            call_encoding: Encoding::new(call_header)?,
            response_encoding: Encoding::new(response_header)?,
            sender: None,
            receiver: None,
            timeout: Some(DEFAULT_RPC_TIMEOUT),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Enable sending calls and responses over `transport`.
    pub fn with_sender(mut self, transport: Arc<dyn Transport>) -> Self {
        self.sender = Some(transport);
        self
    }

    /// Answer incoming calls from `router`.
    pub fn with_receiver(mut self, router: Arc<RouterNode<C>>) -> Self {
        self.receiver = Some(router);
        self
    }

    /// Set (or disable with `None`) the call timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    /// Call a remote procedure and wait for its output.
    pub async fn call<S, I, O>(&self, path: &[S], input: &I) -> Result<O, RpcError>
    where
        S: AsRef<str>,
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let sender = self.sender.as_ref().ok_or(RpcError::NoSender)?;
        let dotted = join_path(path);
        let call = RpcCall {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            path: path.iter().map(|s| s.as_ref().to_string()).collect(),
            input: bincode::serialize(input).map_err(RpcError::Input)?,
        };
        let bytes = self.call_encoding.encode(&call)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call.id, tx);
        let _guard = PendingCall {
            pending: &self.pending,
            id: call.id,
        };

        sender.send(bytes)?;

        let response = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, rx)
                .await
                .map_err(|_| RpcError::Timeout {
                    path: dotted.clone(),
                    timeout,
                })?,
            None => rx.await,
        };

        match response {
            Ok(Ok(output)) => bincode::deserialize(&output).map_err(RpcError::Output),
            Ok(Err(message)) => Err(RpcError::Remote { path: dotted, message }),
            Err(_) => Err(RpcError::Abandoned(dotted)),
        }
    }

    fn resolve_response(&self, response: RpcResponse) -> bool {
        match self.pending.lock().remove(&response.id) {
            // The caller may have given up already; that is not our problem
            Some(resolver) => {
                let _ = resolver.send(response.result);
                true
            }
            None => false,
        }
    }
}

impl<C: Send + 'static> RpcTransceiver<C> {
    /// Handle an inbound buffer if it is an RPC call or response.
    ///
    /// Returns `None` for buffers of other protocols.
    pub async fn handle_message<F>(&self, buffer: &[u8], context_factory: F) -> Option<RpcMessageOutcome>
    where
        F: FnOnce() -> C,
    {
        if let Some(decoded) = self.call_encoding.decode(buffer) {
            return Some(match decoded {
                Ok(call) => self.handle_call(call, context_factory).await,
                Err(err) => {
                    warn!(size = buffer.len(), error = %err, "dropping malformed rpc call");
                    RpcMessageOutcome::Malformed(err)
                }
            });
        }

        let decoded = self.response_encoding.decode(buffer)?;
        Some(match decoded {
            Ok(response) => {
                let id = response.id;
                let matched = self.resolve_response(response);
                if !matched {
                    warn!(id, "rpc response for unknown call");
                }
                RpcMessageOutcome::Response { id, matched }
            }
            Err(err) => {
                warn!(size = buffer.len(), error = %err, "dropping malformed rpc response");
                RpcMessageOutcome::Malformed(err)
            }
        })
    }

    async fn handle_call<F>(&self, call: RpcCall, context_factory: F) -> RpcMessageOutcome
    where
        F: FnOnce() -> C,
    {
        let path = join_path(&call.path);
        debug!(path = %path, id = call.id, "invoking rpc");

        let result = match &self.receiver {
            Some(router) => router
                .dispatch(&call.path, context_factory(), call.input.clone())
                .await
                .map_err(ReceiveError::from),
            None => Err(ReceiveError::NoReceiver),
        };

        let response = RpcResponse {
            id: call.id,
            result: match &result {
                Ok(output) => Ok(output.clone()),
                Err(err) => {
                    error!(path = %path, id = call.id, error = %err, "rpc handler failed");
                    Err(err.to_string())
                }
            },
        };

        match &self.sender {
            Some(sender) => {
                let sent = self
                    .response_encoding
                    .encode(&response)
                    .map_err(RpcError::from)
                    .and_then(|bytes| sender.send(bytes).map_err(RpcError::from));
                if let Err(err) = sent {
                    error!(path = %path, id = call.id, error = %err, "failed to send rpc response");
                }
            }
            None => warn!(path = %path, id = call.id, "no sender configured, rpc response dropped"),
        }

        RpcMessageOutcome::Call { call, result }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::router::{procedure, router};
    use crate::network::transport::ChannelTransport;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Pair {
        client: Arc<RpcTransceiver<()>>,
        server: Arc<RpcTransceiver<()>>,
        to_server: UnboundedReceiver<Vec<u8>>,
        to_client: UnboundedReceiver<Vec<u8>>,
    }

    fn pair(timeout: Option<Duration>) -> Pair {
        let root = Arc::new(router([
            (
                "add",
                procedure()
                    .input::<(i32, i32)>()
                    .handler(|_: (), (a, b): (i32, i32)| async move { Ok(a + b) }),
            ),
            (
                "fail",
                procedure().handler(|_: (), _: ()| async { Err::<(), _>(anyhow::anyhow!("nope")) }),
            ),
        ]));
        let (client_out, to_server) = ChannelTransport::new();
        let (server_out, to_client) = ChannelTransport::new();
        Pair {
            client: Arc::new(
                RpcTransceiver::new()
                    .unwrap()
                    .with_sender(Arc::new(client_out))
                    .with_timeout(timeout),
            ),
            server: Arc::new(
                RpcTransceiver::new()
                    .unwrap()
                    .with_sender(Arc::new(server_out))
                    .with_receiver(root),
            ),
            to_server,
            to_client,
        }
    }

    async fn pump(pair: &mut Pair) {
        let call = pair.to_server.recv().await.unwrap();
        let outcome = pair.server.handle_message(&call, || ()).await.unwrap();
        assert!(matches!(outcome, RpcMessageOutcome::Call { .. }));
        let response = pair.to_client.recv().await.unwrap();
        let outcome = pair.client.handle_message(&response, || ()).await.unwrap();
        assert!(matches!(outcome, RpcMessageOutcome::Response { matched: true, .. }));
    }

    #[tokio::test]
    async fn test_call_returns_output() {
        let mut pair = pair(Some(DEFAULT_RPC_TIMEOUT));
        let client = pair.client.clone();
        let (result, _) = tokio::join!(client.call::<_, _, i32>(&["add"], &(2, 3)), pump(&mut pair));
        assert_eq!(result.unwrap(), 5);
        assert_eq!(pair.client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_comes_back_as_response() {
        let mut pair = pair(Some(DEFAULT_RPC_TIMEOUT));
        let client = pair.client.clone();
        let (result, _) = tokio::join!(client.call::<_, _, ()>(&["fail"], &()), pump(&mut pair));
        match result {
            Err(RpcError::Remote { path, message }) => {
                assert_eq!(path, "fail");
                assert!(message.contains("nope"));
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_route_comes_back_as_response() {
        let mut pair = pair(None);
        let client = pair.client.clone();
        let (result, _) = tokio::join!(client.call::<_, _, ()>(&["missing"], &()), pump(&mut pair));
        assert!(matches!(result, Err(RpcError::Remote { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let pair = pair(Some(Duration::from_millis(50)));
        let result = pair.client.call::<_, _, i32>(&["add"], &(1, 1)).await;
        assert!(matches!(result, Err(RpcError::Timeout { .. })));
        assert_eq!(pair.client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_response_is_reported() {
        let pair = pair(None);
        let bytes = Encoding::<RpcResponse>::new(RPC_RESPONSE_HEADER)
            .unwrap()
            .encode(&RpcResponse { id: 99, result: Ok(vec![]) })
            .unwrap();
        let outcome = pair.client.handle_message(&bytes, || ()).await.unwrap();
        assert!(matches!(outcome, RpcMessageOutcome::Response { id: 99, matched: false }));
    }

    #[tokio::test]
    async fn test_event_buffers_are_not_applicable() {
        let pair = pair(None);
        let bytes = Encoding::<u8>::new(43_000).unwrap().encode(&1).unwrap();
        assert!(pair.server.handle_message(&bytes, || ()).await.is_none());
    }

    #[tokio::test]
    async fn test_call_without_sender() {
        let rpc = RpcTransceiver::<()>::new().unwrap();
        let result = rpc.call::<_, _, ()>(&["x"], &()).await;
        assert!(matches!(result, Err(RpcError::NoSender)));
    }
}
