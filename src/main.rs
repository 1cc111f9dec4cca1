//! Tickwire Game Server
//!
//! Runs the simulation on a demo area and serves it over WebSockets.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tickwire::{
    game::{
        area::Area,
        persistence::InMemoryPersistence,
        spawner::{NpcDefinition, NpcSpawn},
        state::NpcType,
    },
    network::{
        auth::{AuthConfig, JwtTokenResolver, StaticTokenResolver, TokenResolver},
        server::{GameServer, ServerConfig},
    },
    Vector, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    info!("Tickwire Server v{}", VERSION);

    let config = ServerConfig::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        tick_ms = config.tick_interval.as_millis() as u64,
        rng_seed = config.rng_seed,
        rate_limit = ?config.rate_limit,
        "configuration loaded"
    );

    let server = Arc::new(GameServer::new(config, demo_area()?, Arc::new(demo_persistence()), token_resolver()?)?);

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            signal_server.shutdown();
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}

/// JWT validation when `AUTH_*` is configured, otherwise development tokens
/// from `TICKWIRE_DEV_TOKENS` (`token:subject,...`).
fn token_resolver() -> anyhow::Result<Arc<dyn TokenResolver>> {
    let auth = AuthConfig::from_env();
    if auth.is_configured() {
        info!(issuer = ?auth.issuer, "validating provider tokens");
        return Ok(Arc::new(JwtTokenResolver::new(auth)?));
    }

    warn!("AUTH_SECRET / AUTH_PUBLIC_KEY_PEM not set, accepting development tokens only");
    let tokens = std::env::var("TICKWIRE_DEV_TOKENS").unwrap_or_else(|_| "dev:dev".to_string());
    let mut resolver = StaticTokenResolver::new();
    for entry in tokens.split(',').filter(|entry| !entry.trim().is_empty()) {
        let (token, subject) = entry
            .split_once(':')
            .with_context(|| format!("TICKWIRE_DEV_TOKENS entry {entry:?} is not token:subject"))?;
        resolver = resolver.with_token(token.trim(), subject.trim());
    }
    Ok(Arc::new(resolver))
}

/// A walled field with a gap in the middle.
fn demo_area() -> anyhow::Result<Area> {
    let wall: Vec<(u32, u32)> = (4..28).filter(|y| !(14..18).contains(y)).map(|y| (20, y)).collect();
    Ok(Area::grid("meadow", 40, 32, &wall)?)
}

fn demo_persistence() -> InMemoryPersistence {
    let npc = |id, name: &str, npc_type, speed, max_health, attack_damage, aggro_range| NpcDefinition {
        id,
        name: name.to_string(),
        npc_type,
        speed,
        max_health,
        attack_damage,
        attack_range: 1.0,
        attack_speed: 1.0,
        aggro_range,
    };
    let spawn = |id, npc_id, count| NpcSpawn {
        id,
        npc_id,
        count,
        coords: None,
        random_radius: None,
        npc_type: None,
        patrol: None,
    };

    InMemoryPersistence::new()
        .with_npc(npc(1, "sheep", NpcType::Pacifist, 1.0, 10.0, 0.0, 3.0))
        .with_npc(npc(2, "wolf", NpcType::Aggressive, 2.5, 30.0, 4.0, 6.0))
        .with_npc(npc(3, "boar", NpcType::Defensive, 2.0, 40.0, 6.0, 5.0))
        .with_npc(npc(4, "guard", NpcType::Patrol, 1.5, 80.0, 8.0, 6.0))
        .with_spawn(spawn(1, 1, 8))
        .with_spawn(spawn(2, 2, 3))
        .with_spawn(NpcSpawn {
            coords: Some(Vector::new(30.0, 8.0)),
            random_radius: None,
            ..spawn(3, 3, 2)
        })
        .with_spawn(NpcSpawn {
            coords: Some(Vector::new(18.0, 15.0)),
            patrol: Some(vec![
                Vector::new(18.0, 15.0),
                Vector::new(18.0, 4.0),
                Vector::new(18.0, 28.0),
            ]),
            ..spawn(4, 4, 1)
        })
}
