use std::sync::Arc;

use log::{debug, error, info};

use crate::ecs::Registry;
use crate::error::{Error, Result};
use crate::replicate::state_hash;
use crate::simulation::{Scene, Simulation};
use crate::sync::{FrameStack, Progress, RoomState};

use super::ReplayStack;

/// Re-runs a recording and checks every recorded state hash. The first
/// mismatch halts it for good.
pub struct ReplayValidator {
    stack: ReplayStack,
    registry: Arc<Registry>,
    scene: Arc<dyn Scene>,
    room: Option<RoomState>,
    halted: bool,
    checked: usize,
}

impl ReplayValidator {
    pub fn new(stack: ReplayStack, registry: Arc<Registry>, scene: Arc<dyn Scene>) -> Self {
        Self {
            stack,
            registry,
            scene,
            room: None,
            halted: false,
            checked: 0,
        }
    }

    pub fn stack(&self) -> &ReplayStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut ReplayStack {
        &mut self.stack
    }

    /// Current frame, once a snapshot has been loaded.
    pub fn frame(&self) -> Option<u32> {
        self.room.as_ref().map(RoomState::frame)
    }

    pub fn simulation(&self) -> Option<&Simulation> {
        self.room.as_ref().map(RoomState::simulation)
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Number of hashes compared so far.
    pub fn checked(&self) -> usize {
        self.checked
    }

    /// Restores the latest snapshot at or before `frame` and rebuilds input
    /// stacks from the recording. Returns the frame restored.
    pub fn load_closest_frame(&mut self, frame: u32) -> Result<u32> {
        if self.halted {
            return Err(Error::ValidatorHalted);
        }
        let snapshot = self
            .stack
            .closest_snapshot(frame)
            .ok_or(Error::NoSnapshot { frame })?;
        let mut simulation = Simulation::new(&self.registry, self.stack.seed, self.stack.tick_rate);
        snapshot.restore(&mut simulation)?;
        let start = snapshot.frame;

        let mut room = RoomState::new(simulation, Arc::clone(&self.scene), None);
        for (player, frames) in self.stack.frames_from(start) {
            room.open_stack(FrameStack::from_frames(player, start, frames));
        }
        debug!("validator loaded snapshot {start} for target {frame}");
        self.room = Some(room);
        Ok(start)
    }

    /// Advances one frame. Returns false once the recording has no more
    /// input for the current frame.
    pub fn step(&mut self) -> Result<bool> {
        if self.halted {
            return Err(Error::ValidatorHalted);
        }
        if self.room.is_none() {
            let first = self.stack.first_frame().ok_or(Error::NoSnapshot { frame: 0 })?;
            self.load_closest_frame(first)?;
        }
        let Some(room) = self.room.as_mut() else {
            return Err(Error::NoSnapshot { frame: 0 });
        };
        if let Progress::Stalled { player, frame } = room.advance()? {
            debug!("recording has no input for player {player} at frame {frame}");
            return Ok(false);
        }

        let reached = room.frame();
        if let Some(expected) = self.stack.state_hashes.get(&reached) {
            let actual = state_hash(room.simulation())?;
            self.checked += 1;
            if *expected != actual {
                error!("desync at frame {reached}: recorded {expected}, replayed {actual}");
                self.halted = true;
                return Err(Error::StateMismatch {
                    frame: reached,
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(true)
    }

    /// Steps until `target` or the end of the recording. Returns the frame reached.
    pub fn run_to(&mut self, target: u32) -> Result<u32> {
        while self.frame().is_none_or(|f| f < target) {
            if !self.step()? {
                break;
            }
        }
        Ok(self.frame().unwrap_or(0))
    }

    /// Moves to `target`. Going backwards always reloads from a snapshot;
    /// going forwards reloads only when a closer snapshot exists.
    pub fn seek(&mut self, target: u32) -> Result<u32> {
        let closest = self.stack.closest_snapshot(target).map(|s| s.frame);
        let reload = match (self.frame(), closest) {
            (None, _) => true,
            (Some(current), _) if target < current => true,
            (Some(current), Some(snapshot)) => snapshot > current,
            (Some(_), None) => false,
        };
        if reload {
            self.load_closest_frame(target)?;
        }
        self.run_to(target)
    }

    /// Replays the whole recording from its first snapshot.
    pub fn validate_all(&mut self) -> Result<u32> {
        let first = self.stack.first_frame().ok_or(Error::NoSnapshot { frame: 0 })?;
        self.load_closest_frame(first)?;
        let end = self.run_to(self.stack.end_frame())?;
        info!("replay validated through frame {end}, {} hashes checked", self.checked);
        Ok(end)
    }
}
