use serde_json::Value;

use crate::ecs::{Entity, World};
use crate::error::Result;
use crate::sync::PlayerId;

use super::Simulation;

/// Read-only hook called after every completed step (renderers, UI, stats).
pub trait StepObserver {
    fn on_step_complete(&self, simulation: &Simulation);
}

/// Game content plugged into a session: the initial world and how a player
/// becomes an entity.
pub trait Scene: Send + Sync {
    fn build(&self, world: &mut World) -> Result<()>;

    /// Must derive everything from `player`, `config` and world state so that
    /// every peer spawns the same entity.
    fn spawn_player(&self, world: &mut World, player: PlayerId, config: &Value) -> Result<Entity>;
}
