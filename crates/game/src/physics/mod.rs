mod snapshot;
mod sync;
mod world;

use glam::Vec2;

use crate::ecs::Entity;
use crate::error::Result;

pub use snapshot::{BodyOp, BodyState, PhysicsSnapshot};
pub use sync::PhysicsSync;
pub use world::PhysicsWorld;

/// The stepped physics engine as the simulation sees it. Bodies are keyed by
/// the entity that owns them; the engine is owned by exactly one simulation.
pub trait PhysicsSubsystem: Send {
    fn step(&mut self, dt: f32);

    fn save(&self) -> Result<PhysicsSnapshot>;

    fn restore(&mut self, snapshot: &PhysicsSnapshot) -> Result<()>;

    fn ensure_body(&mut self, entity: Entity, position: Vec2, radius: f32);

    fn remove_body(&mut self, entity: Entity) -> bool;

    fn set_velocity(&mut self, entity: Entity, velocity: Vec2);

    fn teleport(&mut self, entity: Entity, position: Vec2);

    fn position(&self, entity: Entity) -> Option<Vec2>;

    fn bodies(&self) -> Vec<Entity>;
}
