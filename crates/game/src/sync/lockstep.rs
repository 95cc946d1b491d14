use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::ecs::Entity;
use crate::error::{Error, Result};
use crate::game::PlayerControl;
use crate::simulation::{Scene, Simulation};

use super::{Frame, FrameEvent, FrameRejected, FrameStack, PlayerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    Ready,
    Stalled { player: PlayerId, frame: u32 },
}

/// What one successful advance did.
#[derive(Debug, Clone, Default)]
pub struct Advance {
    pub frame: u32,
    pub consumed: Vec<Frame>,
    pub admitted: Vec<PlayerId>,
    pub departed: Vec<PlayerId>,
}

#[derive(Debug, Clone)]
pub enum Progress {
    Stalled { player: PlayerId, frame: u32 },
    Stepped(Advance),
}

/// Runtime state of one room on one peer: the simulation plus every
/// player's pending input.
pub struct RoomState {
    simulation: Simulation,
    scene: Arc<dyn Scene>,
    stacks: BTreeMap<PlayerId, FrameStack>,
    parked: BTreeMap<PlayerId, Vec<Frame>>,
    pending_departures: BTreeMap<PlayerId, u32>,
    /// Players named by an `Admit` in a queued frame, keyed to that frame.
    admitting: BTreeMap<PlayerId, u32>,
    last_known: BTreeMap<PlayerId, u32>,
    admit_seed: Option<u32>,
}

impl RoomState {
    /// `admit_seed` is the number of empty frames a newly admitted player's
    /// stack starts with. `None` leaves stacks to the caller, as replay does.
    pub fn new(simulation: Simulation, scene: Arc<dyn Scene>, admit_seed: Option<u32>) -> Self {
        Self {
            simulation,
            scene,
            stacks: BTreeMap::new(),
            parked: BTreeMap::new(),
            pending_departures: BTreeMap::new(),
            admitting: BTreeMap::new(),
            last_known: BTreeMap::new(),
            admit_seed,
        }
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.simulation
    }

    pub fn scene(&self) -> &Arc<dyn Scene> {
        &self.scene
    }

    pub fn frame(&self) -> u32 {
        self.simulation.frame()
    }

    pub fn stack(&self, player: PlayerId) -> Option<&FrameStack> {
        self.stacks.get(&player)
    }

    pub fn has_stack(&self, player: PlayerId) -> bool {
        self.stacks.contains_key(&player)
    }

    pub fn last_known_frame(&self, player: PlayerId) -> Option<u32> {
        self.last_known.get(&player).copied()
    }

    /// Frame whose execution admits `player`, while that frame is queued.
    pub fn admission_frame(&self, player: PlayerId) -> Option<u32> {
        self.admitting.get(&player).copied()
    }

    fn note_admissions(&mut self, frame: &Frame) {
        if frame.frame < self.simulation.frame() {
            return;
        }
        for event in &frame.events {
            if let FrameEvent::Admit { player, .. } = event {
                self.admitting.entry(*player).or_insert(frame.frame);
            }
        }
    }

    /// Player-owned entities, ordered by player id.
    pub fn players(&self) -> Vec<(Entity, PlayerId)> {
        let world = self.simulation.world();
        let mut players: Vec<(Entity, PlayerId)> = world
            .with::<PlayerControl>()
            .into_iter()
            .filter_map(|e| world.get::<PlayerControl>(e).map(|c| (e, c.player)))
            .collect();
        players.sort_by_key(|(e, p)| (*p, *e));
        players
    }

    pub fn player_entity(&self, player: PlayerId) -> Option<Entity> {
        self.players()
            .into_iter()
            .find(|(_, p)| *p == player)
            .map(|(e, _)| e)
    }

    pub fn open_stack(&mut self, stack: FrameStack) {
        let player = stack.player();
        debug!(
            "player {player}: stack opened at frame {}",
            stack.head().map_or(stack.next_expected(), |f| f.frame)
        );
        self.stacks.insert(player, stack);
        self.drain_parked(player);
        if let Some(last_frame) = self.pending_departures.remove(&player)
            && let Err(err) = self.depart(player, last_frame)
        {
            warn!("player {player}: deferred departure failed: {err}");
        }
    }

    pub fn remove_stack(&mut self, player: PlayerId) -> Option<FrameStack> {
        self.parked.remove(&player);
        self.stacks.remove(&player)
    }

    /// Queues a frame from the network or from local capture. Frames that
    /// cannot be used are logged and dropped; nothing here touches the world.
    pub fn receive(&mut self, frame: Frame) {
        let player = frame.player;
        self.note_admissions(&frame);
        let known = self.last_known.entry(player).or_insert(frame.frame);
        *known = (*known).max(frame.frame);

        let Some(stack) = self.stacks.get_mut(&player) else {
            self.parked.entry(player).or_default().push(frame);
            return;
        };
        if !stack.is_closed() && frame.frame > stack.next_expected() {
            debug!(
                "player {player}: frame {} parked until {} arrives",
                frame.frame,
                stack.next_expected()
            );
            self.parked.entry(player).or_default().push(frame);
            return;
        }
        match stack.push(frame) {
            Ok(()) => self.drain_parked(player),
            Err(rejected @ FrameRejected::Stale { .. }) => {
                debug!("player {player}: dropped {rejected}")
            }
            Err(rejected) => warn!("player {player}: dropped {rejected}"),
        }
    }

    fn drain_parked(&mut self, player: PlayerId) {
        let Some(mut parked) = self.parked.remove(&player) else {
            return;
        };
        let Some(stack) = self.stacks.get_mut(&player) else {
            self.parked.insert(player, parked);
            return;
        };
        parked.sort_by_key(|f| f.frame);
        let mut waiting = Vec::new();
        for frame in parked {
            let number = frame.frame;
            if number > stack.next_expected() {
                waiting.push(frame);
                continue;
            }
            if let Err(rejected) = stack.push(frame) {
                debug!("player {player}: parked frame {number} dropped: {rejected}");
            }
        }
        if !waiting.is_empty() {
            self.parked.insert(player, waiting);
        }
    }

    /// Checks that every player entity has input for the current frame.
    /// Late heads are discarded on the way.
    pub fn frame_skip_check(&mut self) -> Result<Barrier> {
        let current = self.simulation.frame();
        for (_, player) in self.players() {
            let Some(stack) = self.stacks.get_mut(&player) else {
                error!("player {player} is active at frame {current} without a frame stack");
                return Err(Error::MissingFrameStack { player });
            };
            let dropped = stack.drop_stale(current);
            if dropped > 0 {
                warn!("player {player}: discarded {dropped} late frames before {current}");
            }
            match stack.head() {
                Some(head) if head.frame == current => {}
                _ => return Ok(Barrier::Stalled { player, frame: current }),
            }
        }
        Ok(Barrier::Ready)
    }

    /// Consumes the current frame of every player and steps once, or does
    /// nothing if any input is missing.
    pub fn advance(&mut self) -> Result<Progress> {
        if let Barrier::Stalled { player, frame } = self.frame_skip_check()? {
            return Ok(Progress::Stalled { player, frame });
        }
        let current = self.simulation.frame();
        let players = self.players();

        let mut consumed = Vec::with_capacity(players.len());
        for (entity, player) in &players {
            let Some(frame) = self.stacks.get_mut(player).and_then(FrameStack::pop) else {
                return Err(Error::MissingFrameStack { player: *player });
            };
            if let Some(mut control) = self.simulation.world_mut().get_mut::<PlayerControl>(*entity)
            {
                control.prev_keys = control.keys;
                control.keys = frame.keys;
                control.events = frame.actions().map(u32::from).collect();
            }
            consumed.push(frame);
        }

        let mut departed = Vec::new();
        for (entity, player) in &players {
            if !consumed.iter().any(|f| f.player == *player && f.departs()) {
                continue;
            }
            self.simulation.world_mut().destroy(*entity);
            self.remove_stack(*player);
            self.last_known.remove(player);
            info!("player {player} removed at frame {current}");
            departed.push(*player);
        }

        let mut admitted = Vec::new();
        for frame in &consumed {
            for event in &frame.events {
                let FrameEvent::Admit { player, config } = event else {
                    continue;
                };
                self.admitting.remove(player);
                if self.player_entity(*player).is_some() {
                    warn!("player {player} admitted twice, ignoring");
                    continue;
                }
                self.scene
                    .spawn_player(self.simulation.world_mut(), *player, config)?;
                if let Some(seed) = self.admit_seed
                    && !self.stacks.contains_key(player)
                {
                    self.open_stack(FrameStack::seeded(*player, current + 1, seed));
                }
                info!("player {player} admitted at frame {current}");
                admitted.push(*player);
            }
        }

        self.simulation.step()?;
        Ok(Progress::Stepped(Advance {
            frame: current,
            consumed,
            admitted,
            departed,
        }))
    }

    /// Removal frame for `player`: past both the current frame and the last
    /// input already queued, rounded up to `round`, plus `horizon`. A player
    /// whose admission is still queued is measured from the stack that
    /// admission will open.
    pub fn departure_frame(&self, player: PlayerId, round: u32, horizon: u32) -> u32 {
        let current = self.simulation.frame();
        let after_tail = match (self.stacks.get(&player), self.admitting.get(&player)) {
            (Some(stack), _) => stack.next_expected(),
            (None, Some(admit)) => admit + 1 + self.admit_seed.unwrap_or(0),
            (None, None) => current,
        };
        let round = round.max(1);
        current.max(after_tail).div_ceil(round) * round + horizon
    }

    /// Schedules `player`'s removal at `last_frame` by padding its stack.
    pub fn depart(&mut self, player: PlayerId, last_frame: u32) -> Result<()> {
        let current = self.simulation.frame();
        if last_frame < current {
            error!("player {player}: departure frame {last_frame} already passed ({current})");
            return Err(Error::DepartureInPast {
                player,
                last_frame,
                current,
            });
        }
        match self.stacks.get_mut(&player) {
            Some(stack) => {
                let discarded = stack.fill_until(last_frame);
                if !discarded.is_empty() {
                    warn!(
                        "player {player}: {} frames past departure {last_frame} discarded",
                        discarded.len()
                    );
                }
                match stack.tail() {
                    Some(tail) if tail != last_frame => {
                        warn!("player {player}: stack opens after {last_frame}, departs at {tail}")
                    }
                    _ => info!("player {player} departs at frame {last_frame}"),
                }
            }
            None => {
                debug!("player {player}: departure {last_frame} held until stack opens");
                self.pending_departures.insert(player, last_frame);
            }
        }
        Ok(())
    }

    /// Queued frames of every open stack, as sent with a state handoff.
    pub fn tails(&self) -> BTreeMap<PlayerId, Vec<Frame>> {
        self.stacks
            .iter()
            .map(|(player, stack)| (*player, stack.frames().cloned().collect()))
            .collect()
    }

    /// Replaces all stacks with transmitted tails, relative to the current frame.
    pub fn load_tails(&mut self, tails: BTreeMap<PlayerId, Vec<Frame>>) {
        let current = self.simulation.frame();
        self.stacks.clear();
        for (player, frames) in tails {
            let frames: Vec<Frame> = frames.into_iter().filter(|f| f.frame >= current).collect();
            if let Some(last) = frames.last() {
                let known = self.last_known.entry(player).or_insert(last.frame);
                *known = (*known).max(last.frame);
            }
            for frame in &frames {
                self.note_admissions(frame);
            }
            self.open_stack(FrameStack::from_frames(player, current, frames));
        }
    }

    pub fn clear_stacks(&mut self) {
        self.stacks.clear();
        self.parked.clear();
        self.pending_departures.clear();
        self.admitting.clear();
    }
}
