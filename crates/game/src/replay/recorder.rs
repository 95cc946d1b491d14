use log::debug;

use crate::error::Result;
use crate::replicate::{Snapshot, SnapshotEncoding, state_hash};
use crate::simulation::Simulation;
use crate::sync::Advance;

use super::ReplayStack;

/// Builds a [`ReplayStack`] around a running room.
pub struct ReplayRecorder {
    stack: ReplayStack,
    snapshot_interval: u32,
    hash_interval: u32,
    encoding: SnapshotEncoding,
}

impl ReplayRecorder {
    pub fn new(
        seed: u32,
        tick_rate: u32,
        snapshot_interval: u32,
        hash_interval: u32,
        encoding: SnapshotEncoding,
    ) -> Self {
        Self {
            stack: ReplayStack::new(seed, tick_rate),
            snapshot_interval: snapshot_interval.max(1),
            hash_interval: hash_interval.max(1),
            encoding,
        }
    }

    /// Takes the first snapshot, wherever the simulation currently is.
    pub fn begin(&mut self, simulation: &Simulation) -> Result<()> {
        self.snapshot(simulation)
    }

    pub fn before_advance(&mut self, simulation: &Simulation) -> Result<()> {
        if simulation.frame() % self.snapshot_interval == 0 {
            self.snapshot(simulation)?;
        }
        Ok(())
    }

    pub fn after_advance(&mut self, advance: &Advance, simulation: &Simulation) -> Result<()> {
        for frame in &advance.consumed {
            self.stack.record_frame(frame);
        }
        let reached = simulation.frame();
        if reached % self.hash_interval == 0 {
            self.stack
                .state_hashes
                .insert(reached, state_hash(simulation)?);
        }
        Ok(())
    }

    fn snapshot(&mut self, simulation: &Simulation) -> Result<()> {
        let frame = simulation.frame();
        if self.stack.snapshots.contains_key(&frame) {
            return Ok(());
        }
        debug!("replay snapshot at frame {frame}");
        self.stack
            .snapshots
            .insert(frame, Snapshot::capture(simulation, self.encoding)?);
        Ok(())
    }

    pub fn stack(&self) -> &ReplayStack {
        &self.stack
    }

    pub fn into_stack(self) -> ReplayStack {
        self.stack
    }
}
