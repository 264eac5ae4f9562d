//! Tether Runtime
//!
//! Headless harness that boots a `WorldManager`, populates one world and
//! drives its script systems for a fixed number of frames.
//!
//! Usage: `tether [config.json] [frames]`

use anyhow::{bail, Context, Result};
use glam::Vec2;
use std::time::Duration;
use tether_bridge::components::Transform2DComponent;
use tether_bridge::{
    BridgeConfig, BridgeWorld, CachingStrategy, ComponentType, DispatchMode, Token, Value, WorldManager,
};
use tether_metrics::FrameTimer;
use tracing_subscriber::EnvFilter;

const ENTITY_COUNT: usize = 2_000;
const DEFAULT_FRAMES: usize = 300;
const FRAME_DELTA: f32 = 1.0 / 60.0;
/// Units per second every mover slides along +x.
const DRIFT_SPEED: f32 = 4.0;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tether=info".parse()?))
        .init();

    tracing::info!(
        "Tether v{} (core v{})",
        tether_bridge::VERSION,
        tether_core::VERSION
    );

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => BridgeConfig::from_path(&path).with_context(|| format!("loading config {path}"))?,
        None => BridgeConfig::default(),
    };
    let frames = match args.next() {
        Some(raw) => raw.parse::<usize>().with_context(|| format!("invalid frame count {raw}"))?,
        None => DEFAULT_FRAMES,
    };

    let manager = WorldManager::new(config).context("registering built-in components")?;
    let world = manager.create_world();
    if !world.is_valid() {
        bail!("world creation failed");
    }
    tracing::info!(%world, "World created");

    let health = manager.register_script_component(world, "Health", &[("hp".to_string(), "int".to_string())]);
    if !health.is_valid() {
        bail!("Health component registration failed");
    }

    populate(&manager, world)?;
    let systems = install_systems(&manager, world)?;

    let movers = manager.create_query(world, &[Transform2DComponent::NAME]);
    manager.query_set_caching_strategy(world, movers, CachingStrategy::CacheEntities);
    let named = manager.create_query(world, &[]);
    manager.query_set_name_filter(world, named, Some("Unit*"));

    let mut timer = FrameTimer::new(120);
    let mut dispatched = 0;
    for frame in 0..frames {
        timer.begin();
        if frame % 30 == 0 {
            damage(&manager, world, movers, frame);
        }
        let drifted = manager.update_components::<Transform2DComponent, _>(world, |t| {
            t.position += Vec2::X * DRIFT_SPEED * FRAME_DELTA;
        });
        let report = manager.progress_world(world, FRAME_DELTA);
        dispatched += report.entities_dispatched;
        let elapsed = timer.end();

        if frame % 60 == 0 {
            tracing::debug!(
                frame,
                ?elapsed,
                drifted,
                systems_run = report.systems_run,
                invocations = report.invocations,
                entities = report.entities_dispatched,
                "Frame"
            );
        }
    }

    let (min_ms, max_ms) = timer.frame_time_range_ms();
    tracing::info!(
        frames,
        fps = format!("{:.1}", timer.fps()),
        avg_ms = format!("{:.3}", timer.frame_time_ms()),
        p95_ms = format!("{:.3}", timer.frame_time_p95_ms()),
        min_ms = format!("{:.3}", min_ms),
        max_ms = format!("{:.3}", max_ms),
        dispatched,
        "Run complete"
    );

    for system in systems {
        if let Some(stats) = manager.system_stats(world, system) {
            tracing::info!(
                %system,
                invocations = stats.invocations,
                last_entities = stats.last_entity_count,
                avg = ?stats.average_time(),
                median = ?stats.median(),
                p99 = ?stats.percentile(99.0),
                "System stats"
            );
        }
    }

    let stats = manager.query_stats(world, movers);
    tracing::info!(
        matched = manager.query_get_entity_count(world, movers),
        named = manager.query_get_entity_count(world, named),
        hits = stats.cache_hits,
        misses = stats.cache_misses,
        "Query stats"
    );

    if let Some(first) = manager.query_get_entities_limited(world, movers, 1, 0).first() {
        let transform = manager.get_component(world, *first, Transform2DComponent::NAME).to_json()?;
        tracing::info!(entity = %first, %transform, "Sample entity");
    }

    manager.destroy_world(world);
    tracing::info!("Runtime shut down");
    Ok(())
}

fn populate(manager: &WorldManager, world: Token) -> Result<()> {
    for i in 0..ENTITY_COUNT {
        let entity = manager.create_entity_with_name(world, &format!("Unit{i}"));
        let transform: Value = [
            ("position", Value::from(Vec2::new(i as f32, 0.0))),
            ("rotation", Value::from(0.0_f32)),
            ("scale", Value::from(Vec2::ONE)),
        ]
        .into_iter()
        .collect();
        if !manager.add_component(world, entity, Transform2DComponent::NAME, &transform) {
            bail!("failed to add transform to entity {i}");
        }
        if i % 4 == 0 {
            let health: Value = [("hp", Value::from(100))].into_iter().collect();
            manager.add_component(world, entity, "Health", &health);
        }
    }
    tracing::info!(entities = manager.entity_count(world), "World populated");
    Ok(())
}

fn install_systems(manager: &WorldManager, world: Token) -> Result<Vec<Token>> {
    let spin = manager.create_script_system(
        world,
        "spin",
        &[Transform2DComponent::NAME],
        Box::new(|world: &mut BridgeWorld, entities: &[Token], delta: f32| {
            for &entity in entities {
                if let Err(err) = rotate(world, entity, delta) {
                    tracing::warn!(%entity, "spin failed: {err}");
                }
            }
        }),
    );
    let wounded = manager.create_script_system(
        world,
        "wounded",
        &["Health"],
        Box::new(|_: &mut BridgeWorld, entities: &[Token], _: f32| {
            tracing::debug!(count = entities.len(), "Health changed");
        }),
    );
    if !spin.is_valid() || !wounded.is_valid() {
        bail!("system creation failed");
    }

    manager.system_set_dispatch_mode(world, spin, DispatchMode::Batch);
    manager.system_set_batch_flush(world, spin, 512, Duration::ZERO);
    manager.system_set_dispatch_mode(world, wounded, DispatchMode::Batch);
    manager.system_set_change_only(world, wounded, true);
    manager.system_set_dependency(world, wounded, Some(spin));
    for system in [spin, wounded] {
        manager.system_set_instrumentation(world, system, true);
        manager.system_set_detailed_timing(world, system, true);
    }
    Ok(vec![spin, wounded])
}

fn rotate(world: &mut BridgeWorld, entity: Token, delta: f32) -> Result<()> {
    let mut value = world.get_component(entity, Transform2DComponent::NAME)?;
    if let Value::Dictionary(fields) = &mut value {
        let rotation = fields.get("rotation").and_then(Value::as_float).unwrap_or(0.0);
        fields.insert("rotation".to_string(), Value::Float(rotation + f64::from(delta)));
    }
    world.set_component(entity, Transform2DComponent::NAME, &value)?;
    Ok(())
}

fn damage(manager: &WorldManager, world: Token, query: Token, frame: usize) {
    let targets = manager.query_get_entities_limited(world, query, 16, frame % ENTITY_COUNT);
    for entity in targets {
        if !manager.has_component(world, entity, "Health") {
            continue;
        }
        let hp = manager
            .get_component(world, entity, "Health")
            .get("hp")
            .and_then(Value::as_int)
            .unwrap_or(0);
        let health: Value = [("hp", Value::from((hp - 10).max(0)))].into_iter().collect();
        manager.set_component(world, entity, "Health", &health);
    }
}
