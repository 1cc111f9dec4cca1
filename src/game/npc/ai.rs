//! NPC AI tick handler.
//!
//! Keeps one [`Task`] and one [`CombatMemory`] per NPC and advances every
//! living NPC's task once per tick.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use crate::core::invariant::expect_present;
use crate::core::rng::DeterministicRng;
use crate::game::area::Area;
use crate::game::npc::memory::CombatMemory;
use crate::game::npc::task::{idle_or_wander, HuntFilter, Task, TaskContext};
use crate::game::state::{Actor, ActorId, GameState, NpcType};
use crate::game::ticker::TickEvent;

/// Errors deriving an NPC's first task.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NpcAiError {
    /// Patrol NPC without a route.
    #[error("NPC {0} of type patrol does not have a patrol path defined")]
    MissingPatrolPath(ActorId),
    /// The actor is not an NPC.
    #[error("actor {0} is not an NPC")]
    NotAnNpc(ActorId),
}

/// Initial task for an NPC, from its type.
pub fn derive_task(npc: &Actor, tick: &TickEvent, rng: &mut DeterministicRng) -> Result<Task, NpcAiError> {
    let traits = npc.npc().ok_or(NpcAiError::NotAnNpc(npc.id))?;
    Ok(match traits.npc_type {
        NpcType::Static => Task::idle_forever(),
        NpcType::Patrol => match &traits.patrol {
            Some(path) if !path.is_empty() => Task::Patrol {
                path: path.clone(),
                next_waypoint: 0,
            },
            _ => return Err(NpcAiError::MissingPatrolPath(npc.id)),
        },
        NpcType::Pacifist => idle_or_wander(tick, rng),
        NpcType::Aggressive => Task::Hunt {
            filter: HuntFilter::Aggressive,
        },
        NpcType::Defensive => Task::Hunt {
            filter: HuntFilter::Defensive,
        },
        NpcType::Protective => Task::Hunt {
            filter: HuntFilter::Protective,
        },
    })
}

/// Per-NPC AI state.
#[derive(Debug, Default)]
pub struct NpcAi {
    tasks: HashMap<ActorId, Task>,
    combat_memories: HashMap<ActorId, CombatMemory>,
}

impl NpcAi {
    /// No NPCs known yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current task of an NPC.
    pub fn task(&self, id: ActorId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Combat memory of an NPC.
    pub fn combat_memory(&self, id: ActorId) -> Option<&CombatMemory> {
        self.combat_memories.get(&id)
    }

    /// Tick step. Must run after combat so this tick's attacks and deaths
    /// are visible.
    pub fn tick(&mut self, state: &mut GameState, area: &Area, rng: &mut DeterministicRng, tick: &TickEvent) {
        // Actors that left between ticks can no longer be remembered
        for memory in self.combat_memories.values_mut() {
            memory.retain_combatants(|id| state.actor(id).is_some());
        }

        for id in state.actor_ids() {
            let live_npc = state
                .actor(id)
                .is_some_and(|actor| actor.is_npc() && actor.combat.is_alive());
            if !live_npc {
                continue;
            }

            self.observe_attacks(state, id);

            let task = match self.tasks.remove(&id) {
                Some(task) => task,
                None => {
                    let npc = expect_present(state.actor(id), format_args!("npc {id}"));
                    derive_task(npc, tick, rng).unwrap_or_else(|err| {
                        warn!(npc = id, error = %err, "falling back to idle");
                        Task::idle_forever()
                    })
                }
            };

            let mut npc = expect_present(state.take_actor(id), format_args!("npc {id}"));
            let next = {
                let mut ctx = TaskContext {
                    area,
                    state: &*state,
                    tick,
                    rng: &mut *rng,
                    combat_memories: &mut self.combat_memories,
                };
                task.run(&mut ctx, &mut npc)
            };
            state.restore_actor(npc);
            self.tasks.insert(id, next);
        }

        self.tasks.retain(|id, _| state.actor(*id).is_some());
        self.combat_memories.retain(|id, _| state.actor(*id).is_some());
    }

    fn observe_attacks(&mut self, state: &GameState, observer_id: ActorId) {
        let observer = expect_present(state.actor(observer_id), format_args!("npc {observer_id}"));
        let range = observer.npc().map_or(0.0, |traits| traits.aggro_range);

        for (attacker, target) in state.attacks_this_tick() {
            let can_see = [attacker, target].into_iter().any(|combatant| {
                let combatant = expect_present(state.actor(combatant), format_args!("combatant {combatant}"));
                observer.movement.coords.is_within_distance(combatant.movement.coords, range)
            });
            if can_see {
                self.combat_memories
                    .entry(observer_id)
                    .or_default()
                    .observe_attack(attacker, target);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
