//! Network Layer
//!
//! Binary event and RPC transport over WebSockets, the router both feed
//! into, and the game routes themselves.

pub mod auth;
pub mod handlers;
pub mod rate_limit;
pub mod router;
pub mod rpc;
pub mod server;
pub mod session;
pub mod transceiver;
pub mod transport;

pub use auth::{AuthConfig, AuthError, JwtTokenResolver, StaticTokenResolver, TokenResolver, UserIdentity};
pub use handlers::{game_router, ChatMessage, SessionContext, World};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use router::{procedure, router, RouterError, RouterNode};
pub use rpc::{RpcError, RpcTransceiver};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{ClientId, ClientRegistry, Session};
pub use transceiver::{BinaryEventTransceiver, EventMessage, HandledMessage};
pub use transport::{ChannelTransport, Transport};
