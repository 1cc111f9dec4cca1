//! NPC AI tasks.
//!
//! A task is one state of an NPC's behavior. Running it for a tick may
//! mutate the NPC and yields the task to run next tick:
//!
//! ```text
//! Idle ──until──▶ then ─┐        Hunt ──(no enemy)──▶ roam to random node
//! Wander ─until─▶ then ─┤          │
//!                       ▼          └─(enemy in range)──▶ attack, double speed
//!              IdleOrWander (5 s of either, picked by rng)
//! ```

use std::collections::HashMap;
use std::time::Duration;

use crate::core::invariant::expect_present;
use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vector;
use crate::game::area::Area;
use crate::game::npc::memory::CombatMemory;
use crate::game::state::{Actor, ActorId, GameState};
use crate::game::ticker::TickEvent;

/// How long each idle-or-wander leg lasts.
pub const IDLE_OR_WANDER_DURATION: Duration = Duration::from_secs(5);

/// Everything a task may look at while it runs.
///
/// The NPC being run is not in `state`; it is passed to [`Task::run`]
/// separately.
pub struct TaskContext<'a> {
    /// Walkable graph.
    pub area: &'a Area,
    /// The rest of the world.
    pub state: &'a GameState,
    /// Current tick.
    pub tick: &'a TickEvent,
    /// Shared simulation rng.
    pub rng: &'a mut DeterministicRng,
    /// Combat memory per NPC.
    pub combat_memories: &'a mut HashMap<ActorId, CombatMemory>,
}

/// What a time-bounded task turns into.
#[derive(Clone, Debug, PartialEq)]
pub enum Continuation {
    /// Another idle-or-wander leg.
    IdleOrWander,
    /// A fixed task.
    Task(Box<Task>),
}

impl Continuation {
    fn resolve(self, ctx: &mut TaskContext<'_>) -> Task {
        match self {
            Continuation::IdleOrWander => idle_or_wander(ctx.tick, ctx.rng),
            Continuation::Task(task) => *task,
        }
    }
}

/// How a hunter picks a new enemy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HuntFilter {
    /// Any living character in aggro range.
    Aggressive,
    /// Characters in range that have fought this NPC.
    Defensive,
    /// Characters in range that have fought this NPC's spawn group.
    Protective,
}

/// An NPC behavior state.
#[derive(Clone, Debug, PartialEq)]
pub enum Task {
    /// Stand still until `until` (forever when `None`).
    Idle {
        /// End of the idle period in game time.
        until: Option<Duration>,
        /// What comes after.
        then: Continuation,
    },
    /// Walk to random nodes until `until`.
    Wander {
        /// End of the wander period in game time.
        until: Duration,
        /// What comes after.
        then: Continuation,
    },
    /// Look for enemies and keep them targeted.
    Hunt {
        /// Enemy selection.
        filter: HuntFilter,
    },
    /// Walk waypoints in a loop.
    Patrol {
        /// Waypoints.
        path: Vec<Vector>,
        /// Index of the next waypoint to head for.
        next_waypoint: usize,
    },
}

/// Idle or wander for [`IDLE_OR_WANDER_DURATION`], then pick again.
pub fn idle_or_wander(tick: &TickEvent, rng: &mut DeterministicRng) -> Task {
    let until = tick.total_time_elapsed + IDLE_OR_WANDER_DURATION;
    rng.one_of([
        Task::Idle {
            until: Some(until),
            then: Continuation::IdleOrWander,
        },
        Task::Wander {
            until,
            then: Continuation::IdleOrWander,
        },
    ])
}

impl Task {
    /// Idle forever.
    pub fn idle_forever() -> Self {
        Task::Idle {
            until: None,
            then: Continuation::IdleOrWander,
        }
    }

    /// Run one tick of this task for `npc` and return the next task.
    pub fn run(self, ctx: &mut TaskContext<'_>, npc: &mut Actor) -> Task {
        match self {
            Task::Idle { until, then } => match until {
                Some(end) if ctx.tick.total_time_elapsed > end => then.resolve(ctx),
                _ => Task::Idle { until, then },
            },

            Task::Wander { until, then } => {
                if ctx.tick.total_time_elapsed > until {
                    return then.resolve(ctx);
                }
                if !npc.movement.has_path() {
                    npc.movement.move_target = Some(random_node(ctx));
                    npc.combat.attack_target_id = None;
                }
                Task::Wander { until, then }
            }

            Task::Hunt { filter } => {
                hunt(ctx, npc, filter);
                Task::Hunt { filter }
            }

            Task::Patrol { path, next_waypoint } => {
                let mut next_waypoint = next_waypoint;
                if !path.is_empty() && !npc.movement.has_path() && npc.movement.move_target.is_none() {
                    let index = next_waypoint % path.len();
                    npc.movement.move_target = Some(path[index]);
                    next_waypoint = (index + 1) % path.len();
                }
                Task::Patrol { path, next_waypoint }
            }
        }
    }
}

fn random_node(ctx: &mut TaskContext<'_>) -> Vector {
    let id = expect_present(ctx.area.graph.random_node_id(ctx.rng), "a walkable node");
    expect_present(ctx.area.graph.node(id), format_args!("area node {id}")).vector
}

fn aggro_range(npc: &Actor) -> f64 {
    npc.npc().map_or(0.0, |traits| traits.aggro_range)
}

fn hunt(ctx: &mut TaskContext<'_>, npc: &mut Actor, filter: HuntFilter) {
    let deaths: Vec<ActorId> = ctx.state.deaths_this_tick().collect();
    if let Some(memory) = ctx.combat_memories.get_mut(&npc.id) {
        memory.forget_combatants(&deaths);
    }

    if let Some(target_id) = npc.combat.attack_target_id {
        let target = expect_present(ctx.state.actor(target_id), format_args!("hunt target {target_id}"));
        let in_range = npc
            .movement
            .coords
            .is_within_distance(target.movement.coords, aggro_range(npc));
        if !in_range || !target.combat.is_alive() {
            // Lose aggro
            npc.combat.attack_target_id = None;
            npc.movement.halt();
            npc.movement.speed = npc.movement.base_speed;
        }
        return;
    }

    if let Some(enemy) = find_enemy(ctx, npc, filter) {
        npc.combat.attack_target_id = Some(enemy);
        npc.movement.speed = npc.movement.base_speed * 2.0;
        return;
    }

    // Nobody in sight: roam and hope to run into someone
    if !npc.movement.has_path() {
        npc.movement.move_target = Some(random_node(ctx));
        npc.movement.speed = npc.movement.base_speed;
    }
}

fn find_enemy(ctx: &TaskContext<'_>, npc: &Actor, filter: HuntFilter) -> Option<ActorId> {
    let range = aggro_range(npc);
    let in_range = |candidate: &Actor| candidate.movement.coords.is_within_distance(npc.movement.coords, range);
    let memory = ctx.combat_memories.get(&npc.id);
    let fought_npc = |candidate: ActorId| memory.is_some_and(|m| m.has_attacked_each_other(candidate, npc.id));

    let mut characters = ctx
        .state
        .actors()
        .filter(|actor| actor.is_character() && actor.combat.is_alive());

    match filter {
        HuntFilter::Aggressive => characters.find(|c| in_range(c)).map(|c| c.id),
        HuntFilter::Defensive => characters.find(|c| in_range(c) && fought_npc(c.id)).map(|c| c.id),
        HuntFilter::Protective => {
            let memory = memory?;
            let spawn_id = npc.npc().map(|traits| traits.spawn_id);
            let is_ally = |id: ActorId| {
                id == npc.id
                    || ctx
                        .state
                        .actor(id)
                        .and_then(Actor::npc)
                        .is_some_and(|traits| Some(traits.spawn_id) == spawn_id)
            };

            // Anyone fighting an ally is an enemy
            let mut enemies: Vec<ActorId> = Vec::new();
            for &(a, b) in memory.combats() {
                let enemy = if is_ally(a) {
                    b
                } else if is_ally(b) {
                    a
                } else {
                    continue;
                };
                if !enemies.contains(&enemy) {
                    enemies.push(enemy);
                }
            }

            enemies.into_iter().find(|&enemy| {
                let candidate = expect_present(ctx.state.actor(enemy), format_args!("combatant {enemy}"));
                candidate.combat.is_alive() && in_range(candidate)
            })
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
