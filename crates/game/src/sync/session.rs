use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde_json::Value;

use crate::ecs::Registry;
use crate::error::{Error, Result};
use crate::replay::{ReplayRecorder, ReplayStack};
use crate::replicate::Snapshot;
use crate::simulation::{Scene, Simulation};
use crate::sync::FrameStack;

use super::{
    ConnectionId, Envelope, Frame, FrameEvent, Inbound, NetMessage, PlayerId, PlayerRecord,
    Progress, Room, RoomId, RoomState, SessionConfig, Target, Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// Join sent, waiting for the host to list us in the room.
    AwaitingRoom { room: RoomId, deadline: Instant },
    /// Listed, waiting for the host's snapshot.
    AwaitingState { room: RoomId, deadline: Instant },
    Joined,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RoomUpdated(RoomId),
    Joined { room: RoomId, frame: u32 },
    PlayerAdmitted { player: PlayerId, frame: u32 },
    PlayerLeaving { player: PlayerId, last_frame: u32 },
    PlayerDeparted { player: PlayerId, frame: u32 },
    HostChanged { host: PlayerId },
    Reconnected { player: PlayerId },
    RoomClosed { room: RoomId },
    Chat { player: PlayerId, text: String },
}

/// Input sampled by the local player for one capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalInput {
    pub keys: u32,
    pub actions: Vec<u16>,
}

impl LocalInput {
    pub fn keys(keys: u32) -> Self {
        Self {
            keys,
            actions: Vec::new(),
        }
    }
}

/// One peer's view of a lockstep room: membership, the replicated
/// simulation and the message handling that keeps both in step.
pub struct Session {
    local: PlayerRecord,
    transport: Box<dyn Transport>,
    registry: Arc<Registry>,
    scene: Arc<dyn Scene>,
    config: SessionConfig,
    phase: SessionPhase,
    room: Option<Room>,
    rooms: BTreeMap<RoomId, Room>,
    state: Option<RoomState>,
    /// Host only: admissions to carry in the next captured frame.
    pending_admits: Vec<(PlayerId, Value)>,
    /// Host only: joiners that get a snapshot once their admission has run.
    awaiting_state: BTreeMap<PlayerId, ConnectionId>,
    /// Frames heard before our snapshot arrived.
    early_frames: Vec<Frame>,
    recorder: Option<ReplayRecorder>,
    record: bool,
    events: Vec<SessionEvent>,
}

impl Session {
    pub fn new(
        player: PlayerId,
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        registry: Arc<Registry>,
        scene: Arc<dyn Scene>,
        config: SessionConfig,
    ) -> Self {
        let local = PlayerRecord::new(player, name, transport.connection_id());
        Self {
            local,
            transport,
            registry,
            scene,
            config,
            phase: SessionPhase::Idle,
            room: None,
            rooms: BTreeMap::new(),
            state: None,
            pending_admits: Vec::new(),
            awaiting_state: BTreeMap::new(),
            early_frames: Vec::new(),
            recorder: None,
            record: false,
            events: Vec::new(),
        }
    }

    /// Spawn config sent with our admission request.
    pub fn with_player_config(mut self, config: Value) -> Self {
        self.local.config = config;
        self
    }

    /// Record a replay from the moment this session enters a room.
    pub fn with_recording(mut self) -> Self {
        self.record = true;
        self
    }

    pub fn player(&self) -> PlayerId {
        self.local.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn known_rooms(&self) -> &BTreeMap<RoomId, Room> {
        &self.rooms
    }

    pub fn is_host(&self) -> bool {
        self.room.as_ref().is_some_and(|r| r.host == self.local.id)
    }

    pub fn state(&self) -> Option<&RoomState> {
        self.state.as_ref()
    }

    pub fn simulation(&self) -> Option<&Simulation> {
        self.state.as_ref().map(RoomState::simulation)
    }

    pub fn frame(&self) -> Option<u32> {
        self.state.as_ref().map(RoomState::frame)
    }

    pub fn recording(&self) -> Option<&ReplayStack> {
        self.recorder.as_ref().map(ReplayRecorder::stack)
    }

    pub fn take_recording(&mut self) -> Option<ReplayStack> {
        self.recorder.take().map(ReplayRecorder::into_stack)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Creates `room` with this peer as host and the only player.
    pub fn host(&mut self, room: RoomId, seed: u32) -> Result<()> {
        self.config.validate()?;
        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        self.local.connection = self.transport.connection_id();
        self.local.connected = true;

        let mut simulation = Simulation::new(&self.registry, seed, self.config.tick_rate);
        self.scene.build(simulation.world_mut())?;
        self.scene
            .spawn_player(simulation.world_mut(), self.local.id, &self.local.config)?;

        let mut state = RoomState::new(
            simulation,
            Arc::clone(&self.scene),
            Some(self.config.frame_offset),
        );
        state.open_stack(FrameStack::seeded(self.local.id, 0, self.config.frame_offset));
        self.start_recording(state.simulation(), seed)?;
        self.state = Some(state);

        let record = Room::new(room, self.local.clone(), self.config.rebalance_on_leave);
        self.rooms.insert(room, record.clone());
        self.transport.emit(Target::Broadcast, &NetMessage::Rooms(self.rooms.clone()))?;
        self.transport.emit(Target::Broadcast, &NetMessage::UpdateRoom(record.clone()))?;
        self.room = Some(record);
        self.phase = SessionPhase::Joined;
        info!("player {} hosting room {room} with seed {seed}", self.local.id);
        Ok(())
    }

    /// Asks the host of `room` to let us in. Completion arrives through `tick`.
    pub fn join(&mut self, room: RoomId, now: Instant) -> Result<()> {
        self.config.validate()?;
        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        self.local.connection = self.transport.connection_id();
        self.local.connected = true;
        self.transport.emit(
            Target::Broadcast,
            &NetMessage::Peer {
                connection: self.local.connection,
                player: self.local.clone(),
            },
        )?;
        self.transport.emit(
            Target::Broadcast,
            &NetMessage::Join {
                player: self.local.clone(),
                room,
            },
        )?;
        self.phase = SessionPhase::AwaitingRoom {
            room,
            deadline: now + self.config.room_timeout,
        };
        debug!("player {} joining room {room}", self.local.id);
        Ok(())
    }

    /// Announces a voluntary departure and drops the connection.
    pub fn leave(&mut self) -> Result<()> {
        if self.transport.is_connected() {
            self.transport.emit(
                Target::Broadcast,
                &NetMessage::UserDisconnect {
                    player: self.local.id,
                    last_frame: None,
                },
            )?;
            self.transport.disconnect();
        }
        self.reset();
        Ok(())
    }

    pub fn chat(&self, text: impl Into<String>) -> Result<()> {
        self.transport.emit(
            Target::Broadcast,
            &NetMessage::Message {
                text: text.into(),
                timestamp: now_millis(),
                player: self.local.id,
            },
        )
    }

    /// One pass of the session: handle inbound messages, capture local input
    /// and advance the simulation at most one frame.
    pub fn tick(&mut self, now: Instant, input: &LocalInput) -> Result<Option<Progress>> {
        for inbound in self.transport.poll() {
            match inbound {
                Inbound::Message(envelope) => self.handle(envelope, now)?,
                Inbound::Disconnected(connection) => self.handle_disconnect(connection, now)?,
            }
        }

        match self.phase {
            SessionPhase::AwaitingRoom { room, deadline }
            | SessionPhase::AwaitingState { room, deadline } => {
                if now >= deadline {
                    warn!("player {}: room {room} timed out", self.local.id);
                    self.reset();
                    return Err(Error::RoomTimeout { room });
                }
                return Ok(None);
            }
            SessionPhase::Idle => return Ok(None),
            SessionPhase::Joined => {}
        }

        self.capture(input)?;
        self.advance().map(Some)
    }

    fn capture(&mut self, input: &LocalInput) -> Result<()> {
        let offset = self.config.frame_offset;
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        let Some(stack) = state.stack(self.local.id) else {
            return Ok(());
        };
        let number = stack.next_expected();
        if stack.is_closed() || number > state.frame() + offset {
            return Ok(());
        }

        let mut events: Vec<FrameEvent> =
            input.actions.iter().copied().map(FrameEvent::Action).collect();
        let is_host = self.room.as_ref().is_some_and(|r| r.host == self.local.id);
        if is_host {
            events.extend(
                self.pending_admits
                    .drain(..)
                    .map(|(player, config)| FrameEvent::Admit { player, config }),
            );
        }
        let frame = Frame {
            player: self.local.id,
            frame: number,
            keys: input.keys,
            events,
        };
        self.transport
            .emit(Target::Broadcast, &NetMessage::Frame(frame.clone()))?;
        state.receive(frame);
        Ok(())
    }

    fn advance(&mut self) -> Result<Progress> {
        let Some(state) = self.state.as_mut() else {
            return Err(Error::NotConnected);
        };
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.before_advance(state.simulation())?;
        }
        let progress = state.advance()?;
        let Progress::Stepped(advance) = &progress else {
            return Ok(progress);
        };
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.after_advance(advance, state.simulation())?;
        }

        for player in &advance.departed {
            self.events.push(SessionEvent::PlayerDeparted {
                player: *player,
                frame: advance.frame,
            });
        }
        for player in &advance.admitted {
            self.events.push(SessionEvent::PlayerAdmitted {
                player: *player,
                frame: advance.frame,
            });
            if let Some(connection) = self.awaiting_state.remove(player) {
                self.send_state(connection)?;
            }
        }
        Ok(progress)
    }

    fn handle(&mut self, envelope: Envelope, now: Instant) -> Result<()> {
        let from = envelope.from;
        match envelope.message {
            NetMessage::Join { player, room } => self.on_join(player, room),
            NetMessage::RequestState {
                player,
                room,
                config,
            } => self.on_request_state(from, player, room, config),
            NetMessage::State {
                room,
                state,
                frame_stacks,
                ..
            } => self.on_state(room, &state, frame_stacks),
            NetMessage::Frame(frame) => {
                match (&self.phase, self.state.as_mut()) {
                    (SessionPhase::Joined, Some(state)) => state.receive(frame),
                    (SessionPhase::AwaitingRoom { .. } | SessionPhase::AwaitingState { .. }, _) => {
                        self.early_frames.push(frame)
                    }
                    _ => {}
                }
                Ok(())
            }
            NetMessage::UpdateRoom(room) => self.on_update_room(room, now),
            NetMessage::Rooms(rooms) => {
                for (id, room) in rooms {
                    if self.room.as_ref().is_none_or(|r| r.id != id) {
                        self.rooms.insert(id, room);
                    }
                }
                Ok(())
            }
            NetMessage::Peer { connection, player } => {
                self.on_peer(connection, player);
                Ok(())
            }
            NetMessage::UserDisconnect { player, last_frame } => {
                self.on_user_disconnect(player, last_frame)
            }
            NetMessage::UpdatePlayerConnect(record) => {
                if let Some(room) = self.room.as_mut()
                    && room.contains(record.id)
                {
                    room.upsert(record);
                }
                Ok(())
            }
            NetMessage::Message { text, player, .. } => {
                self.events.push(SessionEvent::Chat { player, text });
                Ok(())
            }
        }
    }

    fn on_join(&mut self, player: PlayerRecord, room: RoomId) -> Result<()> {
        if !self.is_host() {
            return Ok(());
        }
        let Some(current) = self.room.as_mut() else {
            return Ok(());
        };
        if current.id != room {
            return Ok(());
        }
        info!("player {} asks to join room {room}", player.id);
        current.upsert(player);
        let update = NetMessage::UpdateRoom(current.clone());
        self.rooms.insert(room, current.clone());
        self.transport.emit(Target::Broadcast, &update)
    }

    fn on_request_state(
        &mut self,
        from: ConnectionId,
        player: PlayerId,
        room: RoomId,
        config: Value,
    ) -> Result<()> {
        if !self.is_host() || self.room.as_ref().is_none_or(|r| r.id != room || !r.contains(player))
        {
            return Ok(());
        }
        let admitted = self
            .state
            .as_ref()
            .is_some_and(|s| s.player_entity(player).is_some());
        if admitted {
            return self.send_state(from);
        }
        if self.awaiting_state.insert(player, from).is_none() {
            debug!("player {player} queued for admission");
            self.pending_admits.push((player, config));
        }
        Ok(())
    }

    fn send_state(&self, connection: ConnectionId) -> Result<()> {
        let (Some(state), Some(room)) = (self.state.as_ref(), self.room.as_ref()) else {
            return Ok(());
        };
        let snapshot = Snapshot::capture(state.simulation(), self.config.encoding)?;
        debug!("sending state at frame {} to connection {connection}", snapshot.frame);
        self.transport.emit(
            Target::Peer(connection),
            &NetMessage::State {
                room: room.id,
                state: snapshot.to_json()?,
                frame_stacks: state.tails(),
                timestamp: now_millis(),
            },
        )
    }

    fn on_state(
        &mut self,
        room: RoomId,
        text: &str,
        frame_stacks: BTreeMap<PlayerId, Vec<Frame>>,
    ) -> Result<()> {
        match self.phase {
            SessionPhase::AwaitingState { room: wanted, .. } if wanted == room => {}
            _ => return Ok(()),
        }
        let snapshot = Snapshot::from_json(text)?;
        let mut simulation = Simulation::new(&self.registry, snapshot.seed, self.config.tick_rate);
        snapshot.restore(&mut simulation)?;

        let mut state = RoomState::new(
            simulation,
            Arc::clone(&self.scene),
            Some(self.config.frame_offset),
        );
        state.load_tails(frame_stacks);
        for frame in self.early_frames.drain(..) {
            state.receive(frame);
        }
        let frame = state.frame();
        self.start_recording(state.simulation(), snapshot.seed)?;
        self.state = Some(state);
        self.phase = SessionPhase::Joined;
        self.events.push(SessionEvent::Joined { room, frame });
        info!("player {} joined room {room} at frame {frame}", self.local.id);
        Ok(())
    }

    fn on_update_room(&mut self, room: Room, now: Instant) -> Result<()> {
        self.rooms.insert(room.id, room.clone());
        match self.phase {
            SessionPhase::AwaitingRoom { room: wanted, .. }
                if wanted == room.id && room.contains(self.local.id) =>
            {
                self.room = Some(room);
                self.phase = SessionPhase::AwaitingState {
                    room: wanted,
                    deadline: now + self.config.room_timeout,
                };
                self.request_state()?;
            }
            SessionPhase::AwaitingState { .. } | SessionPhase::Joined
                if self.room.as_ref().is_some_and(|r| r.id == room.id) && !self.is_host() =>
            {
                let id = room.id;
                if let Some(current) = self.room.as_ref()
                    && current.host != room.host
                {
                    self.events.push(SessionEvent::HostChanged { host: room.host });
                }
                self.room = Some(room);
                self.events.push(SessionEvent::RoomUpdated(id));
            }
            _ => {}
        }
        Ok(())
    }

    fn request_state(&mut self) -> Result<()> {
        let Some(host) = self.room.as_ref().and_then(Room::host_record) else {
            return Ok(());
        };
        let message = NetMessage::RequestState {
            player: self.local.id,
            room: self.room.as_ref().map_or(0, |r| r.id),
            config: self.local.config.clone(),
        };
        self.transport.emit(Target::Peer(host.connection), &message)
    }

    /// A member announcing itself again. Identical records are ignored; a
    /// changed one replaces ours and is treated as a reconnect.
    fn on_peer(&mut self, connection: ConnectionId, mut player: PlayerRecord) {
        let Some(room) = self.room.as_mut() else {
            return;
        };
        if !room.contains(player.id) {
            return;
        }
        player.connection = connection;
        player.connected = true;
        if !room.upsert(player.clone()) {
            return;
        }
        info!("player {} reconnected on {connection}", player.id);
        self.rooms.insert(room.id, room.clone());
        self.events.push(SessionEvent::Reconnected { player: player.id });
        if self.is_host()
            && let Err(err) = self
                .transport
                .emit(Target::Broadcast, &NetMessage::UpdatePlayerConnect(player))
        {
            warn!("could not announce reconnect: {err}");
        }
    }

    fn handle_disconnect(&mut self, connection: ConnectionId, now: Instant) -> Result<()> {
        let Some(room) = self.room.as_mut() else {
            return Ok(());
        };
        let Some(player) = room.by_connection(connection).map(|p| p.id) else {
            return Ok(());
        };
        if let Some(record) = room.player_mut(player) {
            record.connected = false;
        }
        info!("player {player} lost connection {connection}");

        if room.host == player {
            if !room.rebalance_on_leave {
                let id = room.id;
                warn!("host left room {id}, closing");
                self.events.push(SessionEvent::RoomClosed { room: id });
                self.reset();
                return Ok(());
            }
            let Some(next) = room.successor() else {
                let id = room.id;
                self.events.push(SessionEvent::RoomClosed { room: id });
                self.reset();
                return Ok(());
            };
            room.host = next;
            info!("host of room {} passes to player {next}", room.id);
            self.events.push(SessionEvent::HostChanged { host: next });
            if let SessionPhase::AwaitingState { room: id, .. } = self.phase {
                self.phase = SessionPhase::AwaitingState {
                    room: id,
                    deadline: now + self.config.room_timeout,
                };
                self.request_state()?;
            }
        }

        if self.is_host() {
            self.depart_as_host(player)?;
        }
        Ok(())
    }

    /// Host side of a departure: fix the last frame and tell everyone.
    fn depart_as_host(&mut self, player: PlayerId) -> Result<()> {
        let queued = self.pending_admits.len();
        self.pending_admits.retain(|(p, _)| *p != player);
        let admit_unsent = self.pending_admits.len() != queued;
        let awaiting = self.awaiting_state.remove(&player).is_some();

        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        // once an admission has gone out in a frame, every peer will spawn the
        // player and needs a departure frame for it
        let in_play = state.player_entity(player).is_some() || state.has_stack(player);
        let last_frame = if in_play || (awaiting && !admit_unsent) {
            let last = state.departure_frame(
                player,
                self.config.leave_round,
                self.config.leave_horizon,
            );
            state.depart(player, last)?;
            Some(last)
        } else {
            None
        };

        self.transport.emit(
            Target::Broadcast,
            &NetMessage::UserDisconnect { player, last_frame },
        )?;
        if let Some(last_frame) = last_frame {
            self.events.push(SessionEvent::PlayerLeaving { player, last_frame });
        }
        if let Some(room) = self.room.as_mut() {
            room.remove_player(player);
            let update = NetMessage::UpdateRoom(room.clone());
            self.rooms.insert(room.id, room.clone());
            self.transport.emit(Target::Broadcast, &update)?;
        }
        Ok(())
    }

    fn on_user_disconnect(&mut self, player: PlayerId, last_frame: Option<u32>) -> Result<()> {
        if player == self.local.id {
            return Ok(());
        }
        match last_frame {
            // a player announcing its own exit; the host decides the frame
            None if self.is_host() => {
                if self.room.as_ref().is_some_and(|r| r.contains(player)) {
                    self.depart_as_host(player)?;
                }
            }
            None => {}
            Some(last_frame) => {
                if let Some(state) = self.state.as_mut() {
                    state.depart(player, last_frame)?;
                    self.events.push(SessionEvent::PlayerLeaving { player, last_frame });
                }
                if let Some(room) = self.room.as_mut() {
                    room.remove_player(player);
                }
            }
        }
        Ok(())
    }

    fn start_recording(&mut self, simulation: &Simulation, seed: u32) -> Result<()> {
        if !self.record {
            return Ok(());
        }
        let mut recorder = ReplayRecorder::new(
            seed,
            self.config.tick_rate,
            self.config.snapshot_interval,
            self.config.hash_interval,
            self.config.encoding,
        );
        recorder.begin(simulation)?;
        self.recorder = Some(recorder);
        Ok(())
    }

    fn reset(&mut self) {
        self.phase = SessionPhase::Idle;
        self.room = None;
        self.state = None;
        self.pending_admits.clear();
        self.awaiting_state.clear();
        self.early_frames.clear();
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
