//! Game State Definitions
//!
//! The shared world: characters and NPCs ("actors") plus the events raised
//! during the current tick. Actors live in a BTreeMap so every pass over the
//! world visits them in id order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::vec2::Vector;

/// The one game state of a process, shared between the tick loop and
/// handlers. Never hold the guard across an `.await`.
pub type SharedGameState = Arc<Mutex<GameState>>;

// =============================================================================
// IDS
// =============================================================================

/// Stable user identifier (16 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub [u8; 16]);

impl UserId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Parse a UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Format as a UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..4]))
    }
}

/// Actor identifier, unique for the life of the process.
pub type ActorId = u64;

/// NPC spawn identifier.
pub type SpawnId = u32;

/// NPC definition identifier.
pub type NpcId = u32;

// =============================================================================
// TRAITS
// =============================================================================

/// Position and pathing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    /// Current position in tiles.
    pub coords: Vector,
    /// Current speed in tiles per second.
    pub speed: f64,
    /// Speed to fall back to when no buff applies.
    pub base_speed: f64,
    /// Desired destination, consumed by the movement behavior.
    pub move_target: Option<Vector>,
    /// Waypoints still to walk; empty when standing still.
    pub path: Vec<Vector>,
    /// Facing angle in radians.
    pub angle: f64,
}

impl Movement {
    /// Standing still at `coords`.
    pub fn at(coords: Vector, speed: f64) -> Self {
        Self {
            coords,
            speed,
            base_speed: speed,
            move_target: None,
            path: Vec::new(),
            angle: 0.0,
        }
    }

    /// Whether there are waypoints left.
    pub fn has_path(&self) -> bool {
        !self.path.is_empty()
    }

    /// Drop the current destination and path.
    pub fn halt(&mut self) {
        self.move_target = None;
        self.path.clear();
    }
}

/// Health and attack stats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Combat {
    /// Current health.
    pub health: f64,
    /// Maximum health.
    pub max_health: f64,
    /// Damage per attack.
    pub attack_damage: f64,
    /// Attack range in tiles.
    pub attack_range: f64,
    /// Attacks per second.
    pub attack_speed: f64,
    /// Game time of the last attack.
    pub last_attack: Option<std::time::Duration>,
    /// Current target.
    pub attack_target_id: Option<ActorId>,
}

impl Combat {
    /// Full health, no target.
    pub fn new(max_health: f64, attack_damage: f64, attack_range: f64, attack_speed: f64) -> Self {
        Self {
            health: max_health,
            max_health,
            attack_damage,
            attack_range,
            attack_speed,
            last_attack: None,
            attack_target_id: None,
        }
    }

    /// Health above zero.
    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

/// How an NPC behaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NpcType {
    /// Stands still forever.
    Static,
    /// Walks a fixed route.
    Patrol,
    /// Idles and wanders, never fights back.
    Pacifist,
    /// Attacks any character in range.
    Aggressive,
    /// Attacks characters it has fought with.
    Defensive,
    /// Attacks characters that fought its spawn group.
    Protective,
}

/// NPC-only data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NpcTraits {
    /// Definition this instance was created from.
    pub npc_id: NpcId,
    /// Spawn group.
    pub spawn_id: SpawnId,
    /// Behavior.
    pub npc_type: NpcType,
    /// Distance at which enemies are noticed.
    pub aggro_range: f64,
    /// Patrol route, for patrol NPCs.
    pub patrol: Option<Vec<Vector>>,
}

/// What an actor is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActorKind {
    /// A player-controlled character.
    Character {
        /// Owning user.
        user_id: UserId,
        /// Display name.
        name: String,
    },
    /// A server-controlled NPC.
    Npc(NpcTraits),
}

/// Anything that exists in the world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    /// Unique id.
    pub id: ActorId,
    /// Character or NPC.
    pub kind: ActorKind,
    /// Position and pathing.
    pub movement: Movement,
    /// Health and attacks.
    pub combat: Combat,
}

impl Actor {
    /// NPC data, if this is an NPC.
    pub fn npc(&self) -> Option<&NpcTraits> {
        match &self.kind {
            ActorKind::Npc(npc) => Some(npc),
            ActorKind::Character { .. } => None,
        }
    }

    /// Whether this is a character.
    pub fn is_character(&self) -> bool {
        matches!(self.kind, ActorKind::Character { .. })
    }

    /// Whether this is an NPC.
    pub fn is_npc(&self) -> bool {
        self.npc().is_some()
    }

    /// Owning user, for characters.
    pub fn user_id(&self) -> Option<UserId> {
        match &self.kind {
            ActorKind::Character { user_id, .. } => Some(*user_id),
            ActorKind::Npc(_) => None,
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Something that happened this tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    /// `attacker` hit `target`.
    Attack {
        /// Attacking actor.
        attacker: ActorId,
        /// Attacked actor.
        target: ActorId,
        /// Damage dealt.
        damage: f64,
    },
    /// `actor` died.
    Death {
        /// The dead actor.
        actor: ActorId,
        /// Who dealt the final blow.
        killer: Option<ActorId>,
    },
    /// `actor` came back to life.
    Respawn {
        /// The respawned actor.
        actor: ActorId,
    },
}

// =============================================================================
// GAME STATE
// =============================================================================

/// The world.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GameState {
    actors: BTreeMap<ActorId, Actor>,
    next_actor_id: ActorId,
    events: Vec<GameEvent>,
}

impl GameState {
    /// Empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in the shared lock.
    pub fn into_shared(self) -> SharedGameState {
        Arc::new(Mutex::new(self))
    }

    /// Add an actor and return its id.
    pub fn spawn_actor(&mut self, kind: ActorKind, movement: Movement, combat: Combat) -> ActorId {
        self.next_actor_id += 1;
        let id = self.next_actor_id;
        self.actors.insert(
            id,
            Actor {
                id,
                kind,
                movement,
                combat,
            },
        );
        id
    }

    /// Look up an actor.
    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    /// Look up an actor mutably.
    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.actors.get_mut(&id)
    }

    /// All actors in id order.
    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    /// All actors in id order, mutably.
    pub fn actors_mut(&mut self) -> impl Iterator<Item = &mut Actor> {
        self.actors.values_mut()
    }

    /// Snapshot of the current actor ids.
    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.actors.keys().copied().collect()
    }

    /// Number of actors.
    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Number of NPCs.
    pub fn npc_count(&self) -> usize {
        self.actors.values().filter(|a| a.is_npc()).count()
    }

    /// Character owned by `user_id`.
    pub fn character_of(&self, user_id: UserId) -> Option<&Actor> {
        self.actors.values().find(|a| a.user_id() == Some(user_id))
    }

    /// Remove an actor for good. Anyone targeting it loses the target.
    pub fn remove_actor(&mut self, id: ActorId) -> Option<Actor> {
        let removed = self.actors.remove(&id)?;
        for actor in self.actors.values_mut() {
            if actor.combat.attack_target_id == Some(id) {
                actor.combat.attack_target_id = None;
            }
        }
        Some(removed)
    }

    /// Temporarily take an actor out so it can be mutated while the rest of
    /// the world is read. Pair with [`GameState::restore_actor`].
    pub fn take_actor(&mut self, id: ActorId) -> Option<Actor> {
        self.actors.remove(&id)
    }

    /// Put back an actor taken with [`GameState::take_actor`].
    pub fn restore_actor(&mut self, actor: Actor) {
        self.actors.insert(actor.id, actor);
    }

    /// Record an event for this tick.
    pub fn push_event(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    /// Events raised since the last [`GameState::begin_tick`].
    pub fn events(&self) -> &[GameEvent] {
        &self.events
    }

    /// Actors that died this tick.
    pub fn deaths_this_tick(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.events.iter().filter_map(|event| match event {
            GameEvent::Death { actor, .. } => Some(*actor),
            _ => None,
        })
    }

    /// Attacks performed this tick as `(attacker, target)`.
    pub fn attacks_this_tick(&self) -> impl Iterator<Item = (ActorId, ActorId)> + '_ {
        self.events.iter().filter_map(|event| match event {
            GameEvent::Attack { attacker, target, .. } => Some((*attacker, *target)),
            _ => None,
        })
    }

    /// Forget the previous tick's events.
    pub fn begin_tick(&mut self) {
        self.events.clear();
    }

    /// Copy of everything clients need to render the world.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            actors: self.actors.values().cloned().collect(),
            events: self.events.clone(),
        }
    }
}

/// Per-tick broadcast payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Every actor.
    pub actors: Vec<Actor>,
    /// Events of the tick.
    pub events: Vec<GameEvent>,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn character(state: &mut GameState, user: u8) -> ActorId {
        state.spawn_actor(
            ActorKind::Character {
                user_id: UserId::new([user; 16]),
                name: format!("user{user}"),
            },
            Movement::at(Vector::ZERO, 3.0),
            Combat::new(100.0, 10.0, 1.0, 1.0),
        )
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let mut state = GameState::new();
        let a = character(&mut state, 1);
        let b = character(&mut state, 2);
        assert!(b > a);
        assert_eq!(state.actor_ids(), vec![a, b]);
        assert_eq!(state.character_of(UserId::new([2; 16])).map(|c| c.id), Some(b));
    }

    #[test]
    fn test_remove_clears_targets() {
        let mut state = GameState::new();
        let a = character(&mut state, 1);
        let b = character(&mut state, 2);
        state.actor_mut(a).unwrap().combat.attack_target_id = Some(b);

        assert!(state.remove_actor(b).is_some());
        assert_eq!(state.actor(a).unwrap().combat.attack_target_id, None);
        assert!(state.remove_actor(b).is_none());
    }

    #[test]
    fn test_take_and_restore() {
        let mut state = GameState::new();
        let a = character(&mut state, 1);
        let mut actor = state.take_actor(a).unwrap();
        assert!(state.actor(a).is_none());
        actor.movement.speed = 9.0;
        state.restore_actor(actor);
        assert_eq!(state.actor(a).unwrap().movement.speed, 9.0);
    }

    #[test]
    fn test_events_reset_each_tick() {
        let mut state = GameState::new();
        state.push_event(GameEvent::Attack {
            attacker: 1,
            target: 2,
            damage: 5.0,
        });
        state.push_event(GameEvent::Death {
            actor: 2,
            killer: Some(1),
        });
        assert_eq!(state.attacks_this_tick().collect::<Vec<_>>(), vec![(1, 2)]);
        assert_eq!(state.deaths_this_tick().collect::<Vec<_>>(), vec![2]);

        state.begin_tick();
        assert!(state.events().is_empty());
    }

    #[test]
    fn test_user_id_uuid_round_trip() {
        let id = UserId::from_uuid_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(id.to_uuid_string(), "67e55044-10b1-426f-9247-bb680e5fe0c8");
        assert_eq!(id.to_string(), "67e55044");
    }
}
