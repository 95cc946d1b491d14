use glam::Vec2;
use log::trace;

use crate::ecs::{Category, Entity, World};
use crate::error::Result;
use crate::schedule::{StepContext, System};

use super::input::{Keys, action};
use super::{Follow, Health, Lifetime, Motion, PlayerControl, Transform};

const BOOST_FACTOR: f32 = 2.0;
const DASH_IMPULSE: f32 = 3.0;
const SPARK_SPEED: f32 = 6.0;
const SPARK_FRAMES: u32 = 30;

/// Turns held keys into a velocity.
pub struct PlayerMovement;

impl System for PlayerMovement {
    fn name(&self) -> &str {
        "player_movement"
    }

    fn category(&self) -> Category {
        Category::Input
    }

    fn priority(&self) -> i32 {
        0
    }

    fn dependencies(&self) -> &[&'static str] {
        &["Motion", "PlayerControl"]
    }

    fn run(&self, world: &mut World, _ctx: &StepContext<'_>) -> Result<()> {
        for entity in world.with2::<PlayerControl, Motion>() {
            let Some(keys) = world.get::<PlayerControl>(entity).map(|c| c.keys) else {
                continue;
            };
            let keys = Keys::from_bits_truncate(keys);
            if let Some(mut motion) = world.get_mut::<Motion>(entity) {
                let mut speed = motion.speed;
                if keys.contains(Keys::BOOST) {
                    speed *= BOOST_FACTOR;
                }
                motion.velocity = keys.direction() * speed;
            }
        }
        Ok(())
    }
}

/// Dispatches player actions to the manual effect systems.
pub struct PlayerActions;

impl System for PlayerActions {
    fn name(&self) -> &str {
        "player_actions"
    }

    fn category(&self) -> Category {
        Category::Logic
    }

    fn priority(&self) -> i32 {
        10
    }

    fn run(&self, world: &mut World, ctx: &StepContext<'_>) -> Result<()> {
        for entity in world.with::<PlayerControl>() {
            let triggered = world
                .get::<PlayerControl>(entity)
                .is_some_and(|c| !c.events.is_empty() || c.pressed(Keys::ACTION.bits()));
            if !triggered {
                continue;
            }
            ctx.scheduler.run_mods(
                Category::Effect,
                world,
                entity,
                ctx,
                |_, entity, system| {
                    trace!("frame {}: {} on {entity}", ctx.frame, system.name());
                    Ok(())
                },
                |_, _, _| Ok(()),
            )?;
        }
        Ok(())
    }
}

fn has_action(world: &World, entity: Entity, id: u16) -> bool {
    world
        .get::<PlayerControl>(entity)
        .is_some_and(|c| c.events.contains(&u32::from(id)))
}

/// Burst of speed along the current heading, paid for with one hit point.
pub struct DashEffect;

impl System for DashEffect {
    fn name(&self) -> &str {
        "dash"
    }

    fn category(&self) -> Category {
        Category::Effect
    }

    fn priority(&self) -> i32 {
        -2
    }

    fn run(&self, _world: &mut World, _ctx: &StepContext<'_>) -> Result<()> {
        Ok(())
    }

    fn run_for(&self, world: &mut World, entity: Entity, _ctx: &StepContext<'_>) -> Result<()> {
        let pressed = world
            .get::<PlayerControl>(entity)
            .is_some_and(|c| c.pressed(Keys::ACTION.bits()));
        if !pressed && !has_action(world, entity, action::DASH) {
            return Ok(());
        }
        let affordable = world.get::<Health>(entity).is_some_and(|h| h.hp > 1);
        if !affordable {
            return Ok(());
        }
        if let Some(mut motion) = world.get_mut::<Motion>(entity) {
            motion.velocity *= DASH_IMPULSE;
        }
        if let Some(mut health) = world.get_mut::<Health>(entity) {
            health.hp -= 1;
        }
        Ok(())
    }
}

/// Throws a short-lived spark in a random direction.
pub struct SparkEffect;

impl System for SparkEffect {
    fn name(&self) -> &str {
        "spark"
    }

    fn category(&self) -> Category {
        Category::Effect
    }

    fn priority(&self) -> i32 {
        -1
    }

    fn run(&self, _world: &mut World, _ctx: &StepContext<'_>) -> Result<()> {
        Ok(())
    }

    fn run_for(&self, world: &mut World, entity: Entity, _ctx: &StepContext<'_>) -> Result<()> {
        if !has_action(world, entity, action::SPARK) {
            return Ok(());
        }
        let Some(origin) = world.get::<Transform>(entity).map(|t| t.position) else {
            return Ok(());
        };
        let angle = world.rng_mut().next_range(0.0, std::f32::consts::TAU);
        let spark = world.spawn();
        world.add(
            spark,
            Transform {
                position: origin,
                rotation: angle,
            },
        )?;
        world.add(
            spark,
            Motion {
                velocity: Vec2::from_angle(angle) * SPARK_SPEED,
                speed: SPARK_SPEED,
            },
        )?;
        world.add(spark, Lifetime { frames: SPARK_FRAMES })?;
        Ok(())
    }
}

/// Points followers at the closest player in range.
pub struct FollowTarget;

impl FollowTarget {
    fn nearest_player(world: &World, from: Vec2, range: f32) -> Option<Entity> {
        let mut best: Option<(f32, Entity)> = None;
        for player in world.with2::<PlayerControl, Transform>() {
            let Some(position) = world.get::<Transform>(player).map(|t| t.position) else {
                continue;
            };
            let distance = position.distance_squared(from);
            if distance > range * range {
                continue;
            }
            if best.is_none_or(|(d, _)| distance < d) {
                best = Some((distance, player));
            }
        }
        best.map(|(_, e)| e)
    }
}

impl System for FollowTarget {
    fn name(&self) -> &str {
        "follow_target"
    }

    fn category(&self) -> Category {
        Category::Logic
    }

    fn priority(&self) -> i32 {
        20
    }

    fn run(&self, world: &mut World, _ctx: &StepContext<'_>) -> Result<()> {
        for entity in world.with2::<Follow, Motion>() {
            let (Some(follow), Some(position)) = (
                world.get::<Follow>(entity).copied(),
                world.get::<Transform>(entity).map(|t| t.position),
            ) else {
                continue;
            };
            let target = follow
                .target
                .filter(|t| world.is_alive(*t) && world.has::<Transform>(*t))
                .or_else(|| Self::nearest_player(world, position, follow.range));
            if target != follow.target
                && let Some(mut slot) = world.get_mut::<Follow>(entity)
            {
                slot.target = target;
            }

            let heading = target
                .and_then(|t| world.get::<Transform>(t))
                .map(|t| (t.position - position).normalize_or_zero())
                .unwrap_or(Vec2::ZERO);
            if let Some(mut motion) = world.get_mut::<Motion>(entity) {
                motion.velocity = heading * motion.speed;
            }
        }
        Ok(())
    }
}

/// Moves entities that have no physics body.
pub struct Integrate;

impl System for Integrate {
    fn name(&self) -> &str {
        "integrate"
    }

    fn category(&self) -> Category {
        Category::Motion
    }

    fn priority(&self) -> i32 {
        30
    }

    fn dependencies(&self) -> &[&'static str] {
        &["Motion", "Transform"]
    }

    fn run(&self, world: &mut World, ctx: &StepContext<'_>) -> Result<()> {
        for entity in world.with2::<Transform, Motion>() {
            if world.has::<super::Collider>(entity) {
                continue;
            }
            let Some(velocity) = world.get::<Motion>(entity).map(|m| m.velocity) else {
                continue;
            };
            if let Some(mut transform) = world.get_mut::<Transform>(entity) {
                transform.position += velocity * ctx.dt;
            }
        }
        Ok(())
    }
}

/// Counts down lifetimes and removes what ran out.
pub struct Expire;

impl System for Expire {
    fn name(&self) -> &str {
        "expire"
    }

    fn category(&self) -> Category {
        Category::Logic
    }

    fn priority(&self) -> i32 {
        40
    }

    fn run(&self, world: &mut World, _ctx: &StepContext<'_>) -> Result<()> {
        let mut expired = Vec::new();
        for entity in world.with::<Lifetime>() {
            if let Some(mut lifetime) = world.get_mut::<Lifetime>(entity) {
                lifetime.frames = lifetime.frames.saturating_sub(1);
                if lifetime.frames == 0 {
                    expired.push(entity);
                }
            }
        }
        for entity in expired {
            world.destroy(entity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::registry;
    use crate::simulation::Simulation;

    fn simulation() -> Simulation {
        Simulation::new(&registry().unwrap(), 3, 60)
    }

    fn player(sim: &mut Simulation, id: u32, at: Vec2) -> Entity {
        let world = sim.world_mut();
        let e = world.spawn();
        world.add(e, Transform { position: at, rotation: 0.0 }).unwrap();
        world.add(e, Motion::default()).unwrap();
        world.add(e, Health::default()).unwrap();
        world
            .add(
                e,
                PlayerControl {
                    player: id,
                    ..PlayerControl::default()
                },
            )
            .unwrap();
        e
    }

    #[test]
    fn keys_drive_velocity_and_position() {
        let mut sim = simulation();
        let e = player(&mut sim, 1, Vec2::ZERO);
        sim.world_mut().get_mut::<PlayerControl>(e).unwrap().keys = Keys::RIGHT.bits();
        sim.step().unwrap();
        let motion = *sim.world().get::<Motion>(e).unwrap();
        assert_eq!(motion.velocity, Vec2::new(4.0, 0.0));
        assert!(sim.world().get::<Transform>(e).unwrap().position.x > 0.0);
    }

    #[test]
    fn dash_costs_health() {
        let mut sim = simulation();
        let e = player(&mut sim, 1, Vec2::ZERO);
        {
            let mut control = sim.world_mut().get_mut::<PlayerControl>(e).unwrap();
            control.keys = Keys::UP.bits();
            control.events = vec![u32::from(action::DASH)];
        }
        sim.step().unwrap();
        assert_eq!(sim.world().get::<Health>(e).unwrap().hp, 9);
        assert_eq!(sim.world().get::<Motion>(e).unwrap().velocity, Vec2::new(0.0, 12.0));
    }

    #[test]
    fn sparks_spawn_and_expire() {
        let mut sim = simulation();
        let e = player(&mut sim, 1, Vec2::ZERO);
        sim.world_mut().get_mut::<PlayerControl>(e).unwrap().events =
            vec![u32::from(action::SPARK)];
        sim.step().unwrap();
        assert_eq!(sim.world().with::<Lifetime>().len(), 1);

        sim.world_mut().get_mut::<PlayerControl>(e).unwrap().events.clear();
        for _ in 0..SPARK_FRAMES {
            sim.step().unwrap();
        }
        assert!(sim.world().with::<Lifetime>().is_empty());
    }

    #[test]
    fn followers_retarget_when_target_dies() {
        let mut sim = simulation();
        let near = player(&mut sim, 1, Vec2::new(1.0, 0.0));
        let far = player(&mut sim, 2, Vec2::new(-3.0, 0.0));
        let world = sim.world_mut();
        let drone = world.spawn();
        world.add(drone, Transform::default()).unwrap();
        world.add(drone, Motion::default()).unwrap();
        world
            .add(
                drone,
                Follow {
                    target: None,
                    range: 10.0,
                },
            )
            .unwrap();

        sim.step().unwrap();
        assert_eq!(sim.world().get::<Follow>(drone).unwrap().target, Some(near));
        sim.world_mut().destroy(near);
        sim.step().unwrap();
        assert_eq!(sim.world().get::<Follow>(drone).unwrap().target, Some(far));
        assert!(sim.world().get::<Motion>(drone).unwrap().velocity.x < 0.0);
    }

    #[test]
    fn manual_systems_stay_out_of_run_order() {
        let sim = simulation();
        let order = sim.scheduler().run_order();
        assert_eq!(
            order,
            vec!["player_movement", "player_actions", "follow_target", "integrate", "expire"]
        );
    }
}
