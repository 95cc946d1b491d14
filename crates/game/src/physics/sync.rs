use std::collections::BTreeSet;

use crate::ecs::{Entity, World};
use crate::game::{Collider, Motion, Transform};

use super::PhysicsSubsystem;

/// Moves state between `Transform`/`Motion`/`Collider` components and the
/// physics engine around each engine step.
pub struct PhysicsSync;

impl PhysicsSync {
    fn bound_entities(world: &World) -> Option<Vec<Entity>> {
        let table = world.table();
        let ids = [
            table.id_of::<Transform>()?,
            table.id_of::<Motion>()?,
            table.id_of::<Collider>()?,
        ];
        Some(world.query(&ids))
    }

    /// Creates bodies for newly bound entities, drops bodies whose entity lost
    /// its binding, pushes velocities and any teleports.
    pub fn world_to_physics(world: &World, physics: &mut dyn PhysicsSubsystem) {
        let bound = Self::bound_entities(world).unwrap_or_default();
        let live: BTreeSet<Entity> = bound.iter().copied().collect();
        for entity in physics.bodies() {
            if !live.contains(&entity) {
                physics.remove_body(entity);
            }
        }

        for entity in bound {
            let (Some(transform), Some(motion), Some(collider)) = (
                world.get::<Transform>(entity),
                world.get::<Motion>(entity),
                world.get::<Collider>(entity),
            ) else {
                continue;
            };
            physics.ensure_body(entity, transform.position, collider.radius);
            if physics.position(entity) != Some(transform.position) {
                physics.teleport(entity, transform.position);
            }
            physics.set_velocity(entity, motion.velocity);
        }
    }

    pub fn physics_to_world(physics: &dyn PhysicsSubsystem, world: &mut World) {
        for entity in physics.bodies() {
            let Some(position) = physics.position(entity) else {
                continue;
            };
            if let Some(mut transform) = world.get_mut::<Transform>(entity)
                && transform.position != position
            {
                transform.position = position;
            }
        }
    }
}
