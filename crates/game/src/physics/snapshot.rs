use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One body allocation or release, in the order the engine saw it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BodyOp {
    Create { entity: u32, radius: f32 },
    Remove { entity: u32 },
}

/// Per-body dynamic state carried in the engine blob.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    pub entity: u32,
    pub position: [f32; 2],
    pub velocity: [f32; 2],
}

/// Everything needed to rebuild the physics side of a simulation.
///
/// `bodies` and `colliders` map entity ids to raw `(index, generation)`
/// engine handles. Replaying `history` on a fresh engine must reproduce those
/// handles exactly before `blob` is applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicsSnapshot {
    pub bodies: BTreeMap<u32, (u32, u32)>,
    pub colliders: BTreeMap<u32, (u32, u32)>,
    pub blob: Vec<u8>,
    pub history: Vec<BodyOp>,
}

impl PhysicsSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }
}
