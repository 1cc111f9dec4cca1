//! Persistence.
//!
//! The game never talks to a database directly; it goes through
//! [`Persistence`]. Callers snapshot what they need under the state lock,
//! release it, then await the store.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::vec2::Vector;
use crate::game::spawner::{NpcDefinition, NpcSpawn};
use crate::game::state::{Actor, ActorKind, GameState, UserId};

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A spawn refers to an NPC definition that does not exist.
    #[error("spawn {spawn} refers to unknown npc {npc}")]
    UnknownNpc {
        /// Spawn id.
        spawn: u32,
        /// Missing definition id.
        npc: u32,
    },

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Saved character.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    /// Owner.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Last position.
    pub coords: Vector,
    /// Last health.
    pub health: f64,
}

impl CharacterRecord {
    /// Record for a character actor; `None` for NPCs.
    pub fn of(actor: &Actor) -> Option<Self> {
        match &actor.kind {
            ActorKind::Character { user_id, name } => Some(Self {
                user_id: *user_id,
                name: name.clone(),
                coords: actor.movement.coords,
                health: actor.combat.health,
            }),
            ActorKind::Npc(_) => None,
        }
    }
}

/// Characters currently in `state`, ready to be saved.
pub fn character_records(state: &GameState) -> Vec<CharacterRecord> {
    state.actors().filter_map(CharacterRecord::of).collect()
}

/// Storage used by the game service.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Every spawn group with the NPC definition it instantiates.
    async fn get_all_spawns_and_their_npcs(&self) -> Result<Vec<(NpcSpawn, NpcDefinition)>, PersistenceError>;

    /// Save characters.
    async fn persist(&self, characters: Vec<CharacterRecord>) -> Result<(), PersistenceError>;

    /// Load a user's character, if one was saved.
    async fn load_character(&self, user_id: UserId) -> Result<Option<CharacterRecord>, PersistenceError>;

    /// Display name of a user's character.
    async fn get_name(&self, user_id: UserId) -> Result<Option<String>, PersistenceError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    npcs: RwLock<HashMap<u32, NpcDefinition>>,
    spawns: RwLock<Vec<NpcSpawn>>,
    characters: RwLock<HashMap<UserId, CharacterRecord>>,
}

impl InMemoryPersistence {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an NPC definition.
    pub fn with_npc(mut self, npc: NpcDefinition) -> Self {
        self.npcs.get_mut().insert(npc.id, npc);
        self
    }

    /// Add a spawn group.
    pub fn with_spawn(mut self, spawn: NpcSpawn) -> Self {
        self.spawns.get_mut().push(spawn);
        self
    }

    /// Add a saved character.
    pub fn with_character(mut self, record: CharacterRecord) -> Self {
        self.characters.get_mut().insert(record.user_id, record);
        self
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn get_all_spawns_and_their_npcs(&self) -> Result<Vec<(NpcSpawn, NpcDefinition)>, PersistenceError> {
        let npcs = self.npcs.read().await;
        self.spawns
            .read()
            .await
            .iter()
            .map(|spawn| {
                let npc = npcs.get(&spawn.npc_id).ok_or(PersistenceError::UnknownNpc {
                    spawn: spawn.id,
                    npc: spawn.npc_id,
                })?;
                Ok((spawn.clone(), npc.clone()))
            })
            .collect()
    }

    async fn persist(&self, characters: Vec<CharacterRecord>) -> Result<(), PersistenceError> {
        let mut saved = self.characters.write().await;
        for record in characters {
            saved.insert(record.user_id, record);
        }
        Ok(())
    }

    async fn load_character(&self, user_id: UserId) -> Result<Option<CharacterRecord>, PersistenceError> {
        Ok(self.characters.read().await.get(&user_id).cloned())
    }

    async fn get_name(&self, user_id: UserId) -> Result<Option<String>, PersistenceError> {
        Ok(self.characters.read().await.get(&user_id).map(|record| record.name.clone()))
    }
}

// =============================================================================
// TESTS
// =============================================================================
