//! Authoritative Simulation Loop
//!
//! One tick of the world, run under the state lock:
//!
//! ```text
//! begin_tick -> combat -> npc ai -> movement -> spawner
//! ```
//!
//! Combat runs first so AI sees this tick's attacks and deaths; movement runs
//! after AI so new move targets are acted on in the same tick.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::core::rng::DeterministicRng;
use crate::game::area::Area;
use crate::game::combat::{CombatBehavior, CombatConfig};
use crate::game::movement::movement_behavior;
use crate::game::npc::NpcAi;
use crate::game::spawner::{NpcDefinition, NpcSpawn, NpcSpawner};
use crate::game::state::SharedGameState;
use crate::game::ticker::{tick_handler, TickEvent, TickHandler};

/// Owns every per-tick behavior and the RNG that drives them.
#[derive(Debug)]
pub struct Simulation {
    state: SharedGameState,
    area: Arc<Area>,
    rng: DeterministicRng,
    combat: CombatBehavior,
    npc_ai: NpcAi,
    spawner: NpcSpawner,
}

impl Simulation {
    /// Create a simulation over `state`.
    pub fn new(
        state: SharedGameState,
        area: Arc<Area>,
        spawns: Vec<(NpcSpawn, NpcDefinition)>,
        combat: CombatConfig,
        seed: u64,
    ) -> Self {
        Self {
            state,
            area,
            rng: DeterministicRng::new(seed),
            combat: CombatBehavior::new(combat),
            npc_ai: NpcAi::new(),
            spawner: NpcSpawner::new(spawns),
        }
    }

    /// The state being simulated.
    pub fn state(&self) -> &SharedGameState {
        &self.state
    }

    /// NPC AI, for inspection.
    pub fn npc_ai(&self) -> &NpcAi {
        &self.npc_ai
    }

    /// Advance the world by one tick.
    pub fn tick(&mut self, event: &TickEvent) {
        let mut state = self.state.lock();
        let now = event.total_time_elapsed;

        state.begin_tick();
        self.combat.tick(&mut state, &self.area, now);
        self.npc_ai.tick(&mut state, &self.area, &mut self.rng, event);
        movement_behavior(&mut state, &self.area, event.delta);
        self.spawner.tick(&mut state, &self.area, &mut self.rng, now);

        trace!(
            actors = state.actor_count(),
            events = state.events().len(),
            elapsed_ms = now.as_millis() as u64,
            "tick"
        );
    }

    /// Hand the simulation to a ticker.
    pub fn into_tick_handler(self) -> TickHandler {
        let simulation = Mutex::new(self);
        tick_handler(move |event| simulation.lock().tick(event))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vector;
    use crate::game::state::{ActorKind, Combat, GameEvent, GameState, Movement, NpcType, UserId};
    use crate::game::ticker::{Ticker, TickerOptions};
    use std::time::Duration;

    fn definition() -> NpcDefinition {
        NpcDefinition {
            id: 1,
            name: "wolf".into(),
            npc_type: NpcType::Aggressive,
            speed: 2.0,
            max_health: 10.0,
            attack_damage: 2.0,
            attack_range: 1.0,
            attack_speed: 1.0,
            aggro_range: 20.0,
        }
    }

    fn spawn() -> NpcSpawn {
        NpcSpawn {
            id: 1,
            npc_id: 1,
            count: 1,
            coords: Some(Vector::new(6.0, 6.0)),
            random_radius: None,
            npc_type: None,
            patrol: None,
        }
    }

    fn tick(n: u64) -> TickEvent {
        TickEvent {
            delta: Duration::from_millis(100),
            total_time_elapsed: Duration::from_millis(100 * n),
        }
    }

    #[test]
    fn test_aggressive_npc_hunts_and_attacks_character() {
        let state = GameState::new().into_shared();
        let area = Arc::new(Area::grid("test", 10, 10, &[]).unwrap());
        let hero = state.lock().spawn_actor(
            ActorKind::Character {
                user_id: UserId::new([1; 16]),
                name: "hero".into(),
            },
            Movement::at(Vector::new(2.0, 2.0), 1.0),
            Combat::new(100.0, 1.0, 1.0, 1.0),
        );
        let mut simulation = Simulation::new(state.clone(), area, vec![(spawn(), definition())], CombatConfig::default(), 7);

        let mut attacked = false;
        for n in 1..=60 {
            simulation.tick(&tick(n));
            attacked |= state
                .lock()
                .events()
                .iter()
                .any(|event| matches!(event, GameEvent::Attack { target, .. } if *target == hero));
        }

        assert!(attacked);
        assert!(state.lock().actor(hero).unwrap().combat.health < 100.0);
        assert_eq!(state.lock().npc_count(), 1);
    }

    #[test]
    fn test_same_seed_same_world() {
        let run = |seed| {
            let state = GameState::new().into_shared();
            let area = Arc::new(Area::grid("test", 10, 10, &[]).unwrap());
            let pacifist = NpcSpawn {
                coords: None,
                count: 3,
                npc_type: Some(NpcType::Pacifist),
                ..spawn()
            };
            let mut simulation = Simulation::new(state.clone(), area, vec![(pacifist, definition())], CombatConfig::default(), seed);
            for n in 1..=120 {
                simulation.tick(&tick(n));
            }
            let snapshot = state.lock().snapshot();
            snapshot
        };

        assert_eq!(run(42), run(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_from_ticker() {
        let state = GameState::new().into_shared();
        let area = Arc::new(Area::grid("test", 10, 10, &[]).unwrap());
        let simulation = Simulation::new(state.clone(), area, vec![(spawn(), definition())], CombatConfig::default(), 1);

        let ticker = Ticker::new(TickerOptions::default());
        ticker.subscribe(simulation.into_tick_handler());
        ticker.start(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(120)).await;
        ticker.stop();

        assert_eq!(state.lock().npc_count(), 1);
    }
}
