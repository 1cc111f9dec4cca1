//! Game Routes
//!
//! The router every connection dispatches into.
//!
//! ```text
//! world.auth          token -> UserIdentity
//! world.join          ()    -> ActorId          [user]
//! world.leave         ()    -> bool             [user]
//! character.move      tile  -> ()               [user]
//! character.attack    actor -> ()               [user]
//! chat.say            text  -> ()               [user]
//! ```
//!
//! Every route is rate limited per connection. Routes marked `[user]` run
//! behind [`require_user`], which copies the session's identity into the
//! context handed to the handler.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::vec2::Vector;
use crate::game::area::Area;
use crate::game::persistence::{CharacterRecord, Persistence};
use crate::game::state::{ActorId, ActorKind, Combat, Movement, SharedGameState};
use crate::network::auth::{TokenResolver, UserIdentity};
use crate::network::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::network::router::{middleware, procedure, router, HandlerError, Middleware, Next, RouterNode};
use crate::network::session::{ClientId, ClientRegistry, Session};

/// Longest accepted chat message, in characters.
pub const MAX_CHAT_LENGTH: usize = 256;

/// Stats given to newly created characters.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterDefaults {
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
}

impl Default for CharacterDefaults {
    fn default() -> Self {
        Self {
            speed: 3.0,
            max_health: 100.0,
            attack_damage: 5.0,
            attack_range: 1.0,
            attack_speed: 1.0,
        }
    }
}

/// Process-wide services the handlers work against.
pub struct World {
    /// The simulated world.
    pub state: SharedGameState,
    /// Walkable area.
    pub area: Arc<Area>,
    /// Connected sessions.
    pub clients: ClientRegistry,
    /// Character and spawn storage.
    pub persistence: Arc<dyn Persistence>,
    /// Token verification.
    pub tokens: Arc<dyn TokenResolver>,
    /// New character stats.
    pub character: CharacterDefaults,
}

/// Context for one inbound message.
#[derive(Clone)]
pub struct SessionContext {
    /// Sending session.
    pub session: Arc<Session>,
    /// Shared services.
    pub world: Arc<World>,
    /// Authenticated user; filled in by [`require_user`].
    pub user: Option<UserIdentity>,
}

impl SessionContext {
    /// Context for a message from `session`.
    pub fn new(session: Arc<Session>, world: Arc<World>) -> Self {
        Self {
            session,
            world,
            user: None,
        }
    }

    fn user(&self) -> anyhow::Result<&UserIdentity> {
        self.user.as_ref().ok_or_else(|| anyhow!("not authenticated"))
    }

    fn character(&self) -> anyhow::Result<ActorId> {
        self.session.character().ok_or_else(|| anyhow!("no character in the world"))
    }
}

/// Chat line broadcast to every client on `chat.message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker name.
    pub from: String,
    /// Text.
    pub contents: String,
}

/// Reject messages from sessions that have not authenticated.
pub fn require_user() -> Middleware<SessionContext> {
    middleware(|mut ctx: SessionContext, next: Next<SessionContext>| async move {
        match ctx.session.identity() {
            Some(user) => {
                ctx.user = Some(user);
                next.run(ctx).await
            }
            None => Err(HandlerError::from(anyhow!("not authenticated"))),
        }
    })
}

/// Build the game router.
pub fn game_router(limiter: Arc<RateLimiter<ClientId>>) -> RouterNode<SessionContext> {
    let limit = || rate_limit_middleware(limiter.clone(), |ctx: &SessionContext| ctx.session.client_id());
    let user_procedure = || procedure().middleware(limit()).middleware(require_user());

    router([
        (
            "world",
            router([
                ("auth", procedure().middleware(limit()).input::<String>().handler(auth)),
                ("join", user_procedure().handler(join)),
                ("leave", user_procedure().handler(leave)),
            ]),
        ),
        (
            "character",
            router([
                ("move", user_procedure().input::<Vector>().handler(move_to)),
                ("attack", user_procedure().input::<ActorId>().handler(attack)),
            ]),
        ),
        ("chat", router([("say", user_procedure().input::<String>().handler(say))])),
    ])
}

async fn auth(ctx: SessionContext, token: String) -> anyhow::Result<UserIdentity> {
    let identity = ctx.world.tokens.resolve(&token).context("authentication failed")?;
    info!(
        client = ctx.session.client_id(),
        user = %identity.user_id,
        "session authenticated"
    );
    ctx.session.set_identity(identity.clone());
    Ok(identity)
}

async fn join(ctx: SessionContext, _: ()) -> anyhow::Result<ActorId> {
    let user = ctx.user()?.clone();
    if let Some(id) = ctx.session.character() {
        if ctx.world.state.lock().actor(id).is_some() {
            return Ok(id);
        }
        // Another session of this user left and took the character with it
        ctx.session.take_character();
    }

    let existing = ctx.world.state.lock().character_of(user.user_id).map(|actor| actor.id);
    if let Some(id) = existing {
        ctx.session.set_character(id);
        return Ok(id);
    }

    let record = ctx.world.persistence.load_character(user.user_id).await?;
    let defaults = &ctx.world.character;
    let id = {
        let mut state = ctx.world.state.lock();
        // Another connection of the same user may have joined while loading
        if let Some(actor) = state.character_of(user.user_id) {
            actor.id
        } else {
            let (name, coords, health) = match &record {
                Some(record) => (record.name.clone(), record.coords, record.health),
                None => (user.subject.clone(), ctx.world.area.start, defaults.max_health),
            };
            let mut combat = Combat::new(
                defaults.max_health,
                defaults.attack_damage,
                defaults.attack_range,
                defaults.attack_speed,
            );
            combat.health = health.clamp(0.0, defaults.max_health);
            state.spawn_actor(
                ActorKind::Character {
                    user_id: user.user_id,
                    name,
                },
                Movement::at(coords, defaults.speed),
                combat,
            )
        }
    };

    ctx.session.set_character(id);
    info!(client = ctx.session.client_id(), actor = id, "character joined");
    Ok(id)
}

async fn leave(ctx: SessionContext, _: ()) -> anyhow::Result<bool> {
    ctx.user()?;
    leave_world(&ctx.session, &ctx.world).await
}

/// Remove the session's character from the world and save it.
///
/// Returns whether there was a character to remove.
pub async fn leave_world(session: &Session, world: &World) -> anyhow::Result<bool> {
    let Some(id) = session.take_character() else {
        return Ok(false);
    };

    let removed = world.state.lock().remove_actor(id);
    let Some(record) = removed.as_ref().and_then(CharacterRecord::of) else {
        return Ok(false);
    };

    debug!(client = session.client_id(), actor = id, "character left");
    world.persistence.persist(vec![record]).await?;
    Ok(true)
}

async fn move_to(ctx: SessionContext, tile: Vector) -> anyhow::Result<()> {
    let id = ctx.character()?;
    let Some(node) = ctx.world.area.graph.nearest_node(tile) else {
        bail!("area {} has no walkable tiles", ctx.world.area.id);
    };
    let destination = node.vector;

    let mut state = ctx.world.state.lock();
    let actor = state.actor_mut(id).ok_or_else(|| anyhow!("character {id} is gone"))?;
    if !actor.combat.is_alive() {
        bail!("dead characters cannot move");
    }
    actor.movement.move_target = Some(destination);
    actor.combat.attack_target_id = None;
    Ok(())
}

async fn attack(ctx: SessionContext, target: ActorId) -> anyhow::Result<()> {
    let id = ctx.character()?;
    if target == id {
        bail!("cannot attack yourself");
    }

    let mut state = ctx.world.state.lock();
    match state.actor(target) {
        Some(actor) if actor.combat.is_alive() => {}
        Some(_) => bail!("target {target} is dead"),
        None => bail!("target {target} does not exist"),
    }
    let actor = state.actor_mut(id).ok_or_else(|| anyhow!("character {id} is gone"))?;
    if !actor.combat.is_alive() {
        bail!("dead characters cannot attack");
    }
    actor.combat.attack_target_id = Some(target);
    Ok(())
}

async fn say(ctx: SessionContext, contents: String) -> anyhow::Result<()> {
    let contents = contents.trim().to_string();
    if contents.is_empty() {
        bail!("empty chat message");
    }
    if contents.chars().count() > MAX_CHAT_LENGTH {
        bail!("chat message longer than {MAX_CHAT_LENGTH} characters");
    }

    let user = ctx.user()?;
    let in_world = ctx
        .session
        .character()
        .and_then(|id| match &ctx.world.state.lock().actor(id)?.kind {
            ActorKind::Character { name, .. } => Some(name.clone()),
            ActorKind::Npc(_) => None,
        });
    let from = match in_world {
        Some(name) => name,
        None => ctx
            .world
            .persistence
            .get_name(user.user_id)
            .await?
            .unwrap_or_else(|| user.subject.clone()),
    };

    let message = ChatMessage { from, contents };
    let delivered = ctx.world.clients.broadcast(&["chat", "message"], &message);
    if delivered == 0 {
        warn!(client = ctx.session.client_id(), "chat message reached no one");
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
