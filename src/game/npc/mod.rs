//! NPC behavior.
//!
//! - `task`: the task enum and its per-tick transition
//! - `memory`: fights an NPC has witnessed
//! - `ai`: the tick handler driving every NPC's task

pub mod ai;
pub mod memory;
pub mod task;

pub use ai::{derive_task, NpcAi, NpcAiError};
pub use memory::CombatMemory;
pub use task::{idle_or_wander, Continuation, HuntFilter, Task, TaskContext};
