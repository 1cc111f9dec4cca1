//! Combat behavior.
//!
//! Actors with an attack target close in on it and strike whenever their
//! attack cooldown allows. Characters regenerate slowly and respawn at the
//! area start some time after dying.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::core::vec2::Vector;
use crate::game::area::Area;
use crate::game::movement::find_path_for_subject;
use crate::game::state::{Actor, ActorId, GameEvent, GameState};

/// Slack added to attack ranges so a range of 1 also reaches diagonal tiles.
pub const TILE_MARGIN: f64 = std::f64::consts::SQRT_2 - 1.0;

/// Combat tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct CombatConfig {
    /// Time between character regeneration pulses.
    pub regen_interval: Duration,
    /// Health restored per pulse.
    pub regen_amount: f64,
    /// Time a dead character waits before respawning.
    pub respawn_delay: Duration,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            regen_interval: Duration::from_secs(10),
            regen_amount: 5.0,
            respawn_delay: Duration::from_secs(5),
        }
    }
}

/// Whether `from` is close enough to `target` to attack with `range`.
pub fn can_attack_from(from: Vector, target: Vector, range: f64) -> bool {
    from.is_within_distance(target, range + TILE_MARGIN)
}

/// Per-process combat state.
#[derive(Debug, Default)]
pub struct CombatBehavior {
    config: CombatConfig,
    next_regen: Duration,
    respawn_at: HashMap<ActorId, Duration>,
}

impl CombatBehavior {
    /// Create with the given tuning.
    pub fn new(config: CombatConfig) -> Self {
        Self {
            config,
            next_regen: Duration::ZERO,
            respawn_at: HashMap::new(),
        }
    }

    /// Tick step.
    pub fn tick(&mut self, state: &mut GameState, area: &Area, now: Duration) {
        if now > self.next_regen {
            self.next_regen = now + self.config.regen_interval;
            for actor in state.actors_mut().filter(|a| a.is_character() && a.combat.is_alive()) {
                actor.combat.health = (actor.combat.health + self.config.regen_amount).min(actor.combat.max_health);
            }
        }

        for id in state.actor_ids() {
            attempt_attack(state, area, id, now);
        }

        // Dying stops all actions
        for actor in state.actors_mut() {
            if !actor.combat.is_alive() {
                actor.combat.health = 0.0;
                actor.combat.attack_target_id = None;
                actor.movement.halt();
            }
        }

        self.respawn_characters(state, area, now);
    }

    fn respawn_characters(&mut self, state: &mut GameState, area: &Area, now: Duration) {
        let mut respawned = Vec::new();
        for actor in state.actors_mut().filter(|a| a.is_character()) {
            if actor.combat.is_alive() {
                self.respawn_at.remove(&actor.id);
                continue;
            }
            let due = *self.respawn_at.entry(actor.id).or_insert(now + self.config.respawn_delay);
            if now >= due {
                actor.combat.health = actor.combat.max_health;
                actor.combat.last_attack = None;
                actor.movement.coords = area.start;
                actor.movement.halt();
                self.respawn_at.remove(&actor.id);
                respawned.push(actor.id);
            }
        }

        for actor in respawned {
            debug!(actor, "character respawned");
            state.push_event(GameEvent::Respawn { actor });
        }
        self.respawn_at.retain(|id, _| state.actor(*id).is_some());
    }
}

fn attempt_attack(state: &mut GameState, area: &Area, id: ActorId, now: Duration) {
    let Some(actor) = state.actor(id) else { return };
    if !actor.combat.is_alive() {
        return;
    }
    let Some(target_id) = actor.combat.attack_target_id else { return };

    let target = match state.actor(target_id) {
        Some(target) if target.combat.is_alive() => target,
        _ => {
            if let Some(actor) = state.actor_mut(id) {
                actor.combat.attack_target_id = None;
            }
            return;
        }
    };

    if !can_attack_from(actor.movement.coords, target.movement.coords, actor.combat.attack_range) {
        if !seems_to_be_moving_towards(actor, target.movement.coords) {
            let tile = best_tile_to_attack_from(actor, target, area);
            if let Some(actor) = state.actor_mut(id) {
                actor.movement.move_target = Some(tile);
            }
        }
        return;
    }

    if let Some(last) = actor.combat.last_attack {
        let attack_delay = Duration::from_secs_f64(1.0 / actor.combat.attack_speed.max(f64::EPSILON));
        if now.saturating_sub(last) < attack_delay {
            return;
        }
    }

    let damage = actor.combat.attack_damage;
    let died = match state.actor_mut(target_id) {
        Some(target) => {
            target.combat.health = (target.combat.health - damage).max(0.0);
            !target.combat.is_alive()
        }
        None => return,
    };

    if let Some(actor) = state.actor_mut(id) {
        // Stop moving when attacking
        actor.movement.path.clear();
        actor.combat.last_attack = Some(now);
    }

    state.push_event(GameEvent::Attack {
        attacker: id,
        target: target_id,
        damage,
    });
    if died {
        debug!(actor = target_id, killer = id, "actor died");
        state.push_event(GameEvent::Death {
            actor: target_id,
            killer: Some(id),
        });
    }
}

fn seems_to_be_moving_towards(actor: &Actor, target: Vector) -> bool {
    actor
        .movement
        .path
        .iter()
        .rev()
        .any(|tile| can_attack_from(*tile, target, actor.combat.attack_range))
}

fn best_tile_to_attack_from(actor: &Actor, target: &Actor, area: &Area) -> Vector {
    find_path_for_subject(&actor.movement, area, target.movement.coords)
        .and_then(|path| {
            path.into_iter()
                .find(|tile| can_attack_from(*tile, target.movement.coords, actor.combat.attack_range))
        })
        .unwrap_or(target.movement.coords)
}

// =============================================================================
// TESTS
// =============================================================================
