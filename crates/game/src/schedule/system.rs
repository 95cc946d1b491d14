use crate::ecs::{Category, Entity, World};
use crate::error::Result;

use super::Scheduler;

/// Read-only context handed to every system for one step.
pub struct StepContext<'a> {
    pub frame: u32,
    pub dt: f32,
    pub scheduler: &'a Scheduler,
}

/// A unit of behaviour run against the world once per step.
///
/// Systems hold no simulation state of their own. A negative priority makes a
/// system manual: the scheduler never runs it on its own, only through
/// [`Scheduler::run_mods`] against a single entity.
pub trait System: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> Category;

    fn priority(&self) -> i32;

    /// Component kinds the system works on, by name. Each must already be
    /// registered when the system is.
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    fn run(&self, world: &mut World, ctx: &StepContext<'_>) -> Result<()>;

    fn run_for(&self, _world: &mut World, _entity: Entity, _ctx: &StepContext<'_>) -> Result<()> {
        Ok(())
    }

    fn is_manual(&self) -> bool {
        self.priority() < 0
    }
}
