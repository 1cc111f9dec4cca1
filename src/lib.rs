//! # Tickwire
//!
//! Real-time game-state synchronization: a binary event protocol over
//! WebSockets, a tree router for inbound events, a fixed-interval tick
//! scheduler, and the NPC AI that runs inside each tick.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         TICKWIRE                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/            - Leaf primitives                           │
//! │  ├── codec.rs     - [u16 LE header][bincode] encoding         │
//! │  ├── vec2.rs      - Tile-space vectors                        │
//! │  ├── rng.rs       - Seeded Xorshift128+ PRNG                  │
//! │  └── invariant.rs - Invariant checks                          │
//! │                                                               │
//! │  network/         - Transport and dispatch                    │
//! │  ├── router.rs    - Router tree and middleware chains         │
//! │  ├── transceiver.rs - Binary event transceiver                │
//! │  ├── rpc.rs       - Call/response transceiver                 │
//! │  ├── rate_limit.rs- Per-session event budget                  │
//! │  ├── auth.rs      - Token resolution                          │
//! │  ├── handlers.rs  - Game routes                               │
//! │  ├── session.rs   - Connected clients                         │
//! │  └── server.rs    - WebSocket server                          │
//! │                                                               │
//! │  game/            - Simulation                                │
//! │  ├── ticker.rs    - Tick scheduler                            │
//! │  ├── state.rs     - Actors and per-tick events                │
//! │  ├── area.rs      - Walkable graph and A*                     │
//! │  ├── movement.rs  - Path following                            │
//! │  ├── combat.rs    - Attacks and respawns                      │
//! │  ├── npc/         - NPC task chain                            │
//! │  ├── spawner.rs   - NPC spawn groups                          │
//! │  └── simulation.rs- Tick ordering                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tick Ordering
//!
//! Each tick runs under the game state lock, in a fixed order: combat, NPC
//! AI, movement, spawner. Handlers take the same lock only for their
//! synchronous mutation and never across an `.await`, so a tick always sees
//! a consistent world. All randomness comes from one seeded RNG, so a given
//! seed and input sequence replays the same world.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::codec::{CodecError, DecodeError, Encoding};
pub use core::rng::DeterministicRng;
pub use core::vec2::Vector;
pub use game::state::{ActorId, GameState, SharedGameState, UserId};
pub use game::ticker::{TickEvent, Ticker};
pub use network::router::{procedure, router, RouterNode};
pub use network::transceiver::{BinaryEventTransceiver, EventMessage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
