use std::sync::Arc;

use glam::Vec2;
use log::debug;
use serde_json::Value;

use crate::ecs::{Category, Entity, FieldValue, Registry, Template, World};
use crate::error::Result;
use crate::simulation::Scene;
use crate::sync::PlayerId;

use super::{
    Collider, DashEffect, Expire, Follow, FollowTarget, Health, Integrate, Lifetime, Motion,
    PlayerActions, PlayerControl, PlayerMovement, SparkEffect, Transform,
};

/// Registry holding every component and system of the arena game.
pub fn registry() -> Result<Registry> {
    let mut registry = Registry::new();
    register(&mut registry)?;
    Ok(registry)
}

pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register_component::<Transform>(Category::Motion, 0)?;
    registry.register_component::<Motion>(Category::Motion, 10)?;
    registry.register_component::<Collider>(Category::Motion, 20)?;
    registry.register_component::<PlayerControl>(Category::Input, 0)?;
    registry.register_component::<Health>(Category::Logic, 0)?;
    registry.register_component::<Follow>(Category::Logic, 10)?;
    registry.register_component::<Lifetime>(Category::Logic, 20)?;

    registry.register_system(Arc::new(PlayerMovement))?;
    registry.register_system(Arc::new(PlayerActions))?;
    registry.register_system(Arc::new(DashEffect))?;
    registry.register_system(Arc::new(SparkEffect))?;
    registry.register_system(Arc::new(FollowTarget))?;
    registry.register_system(Arc::new(Integrate))?;
    registry.register_system(Arc::new(Expire))?;
    Ok(())
}

/// Open arena with a ring of drones chasing the players.
#[derive(Debug, Clone)]
pub struct Arena {
    pub drones: u32,
    pub radius: f32,
    pub drone_range: f32,
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            drones: 4,
            radius: 8.0,
            drone_range: 6.0,
        }
    }
}

impl Arena {
    fn drone(&self, at: Vec2) -> Template {
        Template::new("drone")
            .with_fields("Transform", vec![("position", at.into())])
            .with_fields("Motion", vec![("speed", 2.0f32.into())])
            .with_fields("Collider", vec![("radius", 0.4f32.into())])
            .with_fields("Follow", vec![("range", self.drone_range.into())])
            .with("Health")
    }

    fn player(&self, player: PlayerId, at: Vec2, speed: f32) -> Template {
        Template::new("player")
            .with_fields("Transform", vec![("position", at.into())])
            .with_fields("Motion", vec![("speed", speed.into())])
            .with("Collider")
            .with("Health")
            .with_fields("PlayerControl", vec![("player", FieldValue::U32(player))])
    }

    /// Players start on a small ring, placed by id.
    fn spawn_point(player: PlayerId) -> Vec2 {
        let angle = (player % 8) as f32 * std::f32::consts::FRAC_PI_4;
        Vec2::from_angle(angle) * 2.0
    }
}

impl Scene for Arena {
    fn build(&self, world: &mut World) -> Result<()> {
        for _ in 0..self.drones {
            let angle = world.rng_mut().next_range(0.0, std::f32::consts::TAU);
            let at = Vec2::from_angle(angle) * self.radius;
            self.drone(at).spawn(world)?;
        }
        debug!("arena built with {} drones", self.drones);
        Ok(())
    }

    fn spawn_player(&self, world: &mut World, player: PlayerId, config: &Value) -> Result<Entity> {
        let speed = config
            .get("speed")
            .and_then(Value::as_f64)
            .map_or(Motion::default().speed, |s| s as f32);
        let entity = self
            .player(player, Self::spawn_point(player), speed)
            .spawn(world)?;
        debug!("player {player} spawned as {entity}");
        Ok(entity)
    }
}
