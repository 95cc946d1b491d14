use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::ecs::WorldState;
use crate::error::{Error, Result};
use crate::physics::PhysicsSnapshot;
use crate::simulation::Simulation;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotEncoding {
    #[default]
    Json,
    Binary,
}

/// The component side of a snapshot in either encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum ComponentPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl ComponentPayload {
    fn encode(state: &WorldState, encoding: SnapshotEncoding) -> Result<Self> {
        Ok(match encoding {
            SnapshotEncoding::Json => Self::Text(serde_json::to_string(state)?),
            SnapshotEncoding::Binary => Self::Binary(
                bincode::serde::encode_to_vec(state, bincode::config::standard())
                    .map_err(Error::codec)?,
            ),
        })
    }

    fn decode(&self) -> Result<WorldState> {
        match self {
            Self::Text(text) => Ok(serde_json::from_str(text)?),
            Self::Binary(bytes) => {
                let (state, _) =
                    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                        .map_err(Error::codec)?;
                Ok(state)
            }
        }
    }

    pub fn encoding(&self) -> SnapshotEncoding {
        match self {
            Self::Text(_) => SnapshotEncoding::Json,
            Self::Binary(_) => SnapshotEncoding::Binary,
        }
    }
}

/// Self-contained simulation state at a step boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub frame: u32,
    pub elapsed: f64,
    /// Seed the simulation was built with. The live generator state travels
    /// with the world; this only labels recordings started from the snapshot.
    #[serde(default)]
    pub seed: u32,
    pub components: ComponentPayload,
    pub physics: PhysicsSnapshot,
}

#[derive(Serialize)]
struct Canonical<'a> {
    frame: u32,
    elapsed: u64,
    world: &'a WorldState,
    physics: &'a PhysicsSnapshot,
}

impl Snapshot {
    pub fn capture(simulation: &Simulation, encoding: SnapshotEncoding) -> Result<Self> {
        Ok(Self {
            frame: simulation.frame(),
            elapsed: simulation.elapsed(),
            seed: simulation.seed(),
            components: ComponentPayload::encode(&simulation.world().save(), encoding)?,
            physics: simulation.physics().save()?,
        })
    }

    pub fn world_state(&self) -> Result<WorldState> {
        self.components.decode()
    }

    /// Replaces the whole state of `simulation`. Dirty masks start clear.
    pub fn restore(&self, simulation: &mut Simulation) -> Result<()> {
        let state = self.world_state()?;
        simulation.world_mut().load(&state)?;
        simulation.physics_mut().restore(&self.physics)?;
        simulation.set_frame(self.frame);
        Ok(())
    }

    /// Hash of the canonical binary form, independent of the component
    /// encoding this snapshot happens to carry.
    pub fn hash(&self) -> Result<String> {
        let world = self.world_state()?;
        let canonical = Canonical {
            frame: self.frame,
            elapsed: self.elapsed.to_bits(),
            world: &world,
            physics: &self.physics,
        };
        let bytes = bincode::serde::encode_to_vec(&canonical, bincode::config::standard())
            .map_err(Error::codec)?;
        Ok(format!("{:016x}", xxh3_64(&bytes)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

pub fn serialize(simulation: &Simulation, encoding: SnapshotEncoding) -> Result<Snapshot> {
    Snapshot::capture(simulation, encoding)
}

pub fn deserialize(simulation: &mut Simulation, snapshot: &Snapshot) -> Result<()> {
    snapshot.restore(simulation)
}

pub fn state_hash(simulation: &Simulation) -> Result<String> {
    Snapshot::capture(simulation, SnapshotEncoding::Binary)?.hash()
}
