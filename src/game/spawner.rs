//! NPC spawner.
//!
//! Keeps every spawn group at its configured head count: corpses are cleared
//! a few seconds after death and replaced with fresh instances.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::invariant::expect_present;
use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vector;
use crate::game::area::Area;
use crate::game::state::{ActorId, ActorKind, Combat, GameState, Movement, NpcId, NpcTraits, NpcType, SpawnId};

/// How long a dead NPC stays in the world.
pub const CORPSE_DURATION: Duration = Duration::from_secs(5);

/// An NPC kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NpcDefinition {
    /// Definition id.
    pub id: NpcId,
    /// Display name.
    pub name: String,
    /// Default behavior.
    pub npc_type: NpcType,
    /// Tiles per second.
    pub speed: f64,
    /// Maximum health.
    pub max_health: f64,
    /// Damage per attack.
    pub attack_damage: f64,
    /// Attack range in tiles.
    pub attack_range: f64,
    /// Attacks per second.
    pub attack_speed: f64,
    /// Enemy detection range in tiles.
    pub aggro_range: f64,
}

/// Where and how many of an NPC kind to keep alive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NpcSpawn {
    /// Spawn id.
    pub id: SpawnId,
    /// Definition to instantiate.
    pub npc_id: NpcId,
    /// Head count to maintain.
    pub count: usize,
    /// Fixed spawn position.
    pub coords: Option<Vector>,
    /// Spawn near the origin within this radius.
    pub random_radius: Option<f64>,
    /// Override of the definition's behavior.
    pub npc_type: Option<NpcType>,
    /// Patrol route for patrol NPCs.
    pub patrol: Option<Vec<Vector>>,
}

/// Spawns and respawns NPCs.
#[derive(Debug)]
pub struct NpcSpawner {
    options: Vec<(NpcSpawn, NpcDefinition)>,
    corpse_cleanup: HashMap<ActorId, Duration>,
}

impl NpcSpawner {
    /// Spawner for the given spawn groups.
    pub fn new(options: Vec<(NpcSpawn, NpcDefinition)>) -> Self {
        Self {
            options,
            corpse_cleanup: HashMap::new(),
        }
    }

    /// Spawn groups served.
    pub fn options(&self) -> &[(NpcSpawn, NpcDefinition)] {
        &self.options
    }

    /// Tick step.
    pub fn tick(&mut self, state: &mut GameState, area: &Area, rng: &mut DeterministicRng, now: Duration) {
        let corpses: Vec<ActorId> = state
            .actors()
            .filter(|actor| actor.is_npc() && !actor.combat.is_alive())
            .map(|actor| actor.id)
            .collect();
        for id in corpses {
            let cleanup_at = *self.corpse_cleanup.entry(id).or_insert(now + CORPSE_DURATION);
            if now >= cleanup_at {
                state.remove_actor(id);
                self.corpse_cleanup.remove(&id);
                debug!(npc = id, "corpse removed");
            }
        }
        self.corpse_cleanup.retain(|id, _| state.actor(*id).is_some());

        for (spawn, npc) in &self.options {
            let current = state
                .actors()
                .filter(|actor| actor.npc().is_some_and(|traits| traits.spawn_id == spawn.id))
                .count();
            for _ in current..spawn.count {
                let id = spawn_instance(state, area, rng, spawn, npc);
                debug!(npc = id, spawn = spawn.id, "npc spawned");
            }
        }
    }
}

/// Add one instance of `npc` for `spawn` and return its id.
pub fn spawn_instance(
    state: &mut GameState,
    area: &Area,
    rng: &mut DeterministicRng,
    spawn: &NpcSpawn,
    npc: &NpcDefinition,
) -> ActorId {
    let coords = spawn_coords(spawn, area, rng);
    let mut movement = Movement::at(coords, npc.speed);
    movement.angle = rng.one_of([0.0, 0.5, 1.0, -0.5]) * std::f64::consts::PI;

    state.spawn_actor(
        ActorKind::Npc(NpcTraits {
            npc_id: npc.id,
            spawn_id: spawn.id,
            npc_type: spawn.npc_type.unwrap_or(npc.npc_type),
            aggro_range: npc.aggro_range,
            patrol: spawn.patrol.clone(),
        }),
        movement,
        Combat::new(npc.max_health, npc.attack_damage, npc.attack_range, npc.attack_speed),
    )
}

fn spawn_coords(spawn: &NpcSpawn, area: &Area, rng: &mut DeterministicRng) -> Vector {
    if let Some(coords) = spawn.coords {
        return coords;
    }

    let node = match spawn.random_radius {
        Some(radius) => {
            let angle = rng.next_f64() * std::f64::consts::TAU;
            let distance = rng.next_f64() * radius;
            let tile = Vector::new(
                (angle.cos() * distance).clamp(0.0, area.size.x),
                (angle.sin() * distance).clamp(0.0, area.size.y),
            );
            area.graph.nearest_node(tile)
        }
        None => {
            let id = expect_present(area.graph.random_node_id(rng), "a walkable node");
            area.graph.node(id)
        }
    };
    expect_present(node, "a spawnable tile").vector
}

// =============================================================================
// TESTS
// =============================================================================
