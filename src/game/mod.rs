//! Game Logic Module
//!
//! Everything that runs inside a tick, plus the scheduler that drives it.
//!
//! ## Module Structure
//!
//! - `ticker`: fixed-interval tick scheduler with middleware
//! - `tick_metrics`: tick interval and duration metrics
//! - `state`: actors, per-tick events and the shared state lock
//! - `area`: walkable graph and A* pathfinding
//! - `movement`: path following
//! - `combat`: attacks, regeneration and respawns
//! - `npc`: NPC task chain and combat memory
//! - `spawner`: keeps NPC spawn groups populated
//! - `persistence`: storage interface for characters and spawns
//! - `simulation`: one tick of the world, in order

pub mod area;
pub mod combat;
pub mod movement;
pub mod npc;
pub mod persistence;
pub mod simulation;
pub mod spawner;
pub mod state;
pub mod tick_metrics;
pub mod ticker;

// Re-export key types
pub use area::{Area, AreaGraph};
pub use persistence::{CharacterRecord, InMemoryPersistence, Persistence};
pub use simulation::Simulation;
pub use state::{Actor, ActorId, ActorKind, GameEvent, GameState, SharedGameState, UserId, WorldSnapshot};
pub use ticker::{TickEvent, Ticker, TickerOptions};
