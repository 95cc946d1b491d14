use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};

use framesync::game::{Arena, Keys, action};
use framesync::sync::SessionPhase;
use framesync::{
    LocalInput, LoopbackHub, PlayerId, Registry, ReplayStack, Scene, SeededRandom, Session,
    state_hash,
};

use crate::config::NodeConfig;
use crate::events::NodeEvent;

const STEERING: [Keys; 6] = [
    Keys::UP,
    Keys::DOWN,
    Keys::LEFT,
    Keys::RIGHT,
    Keys::UP.union(Keys::RIGHT),
    Keys::DOWN.union(Keys::LEFT),
];

/// Scripted player: holds a direction for a while, sometimes boosts or acts.
struct Pilot {
    rng: SeededRandom,
    keys: Keys,
    hold: u32,
}

impl Pilot {
    fn new(seed: u32) -> Self {
        Self {
            rng: SeededRandom::new(seed),
            keys: Keys::empty(),
            hold: 0,
        }
    }

    fn next(&mut self) -> LocalInput {
        if self.hold == 0 {
            self.keys = self.rng.pick(&STEERING).copied().unwrap_or_default();
            if self.rng.next_bool(0.2) {
                self.keys |= Keys::BOOST;
            }
            self.hold = 10 + self.rng.next_int(30);
        }
        self.hold -= 1;
        let mut actions = Vec::new();
        if self.rng.next_bool(0.02) {
            actions.push(action::SPARK);
        }
        if self.rng.next_bool(0.01) {
            actions.push(action::DASH);
        }
        LocalInput {
            keys: self.keys.bits(),
            actions,
        }
    }
}

struct Peer {
    session: Session,
    pilot: Pilot,
    joined: bool,
    gone: bool,
}

/// A room of in-process peers talking over a loopback hub.
pub struct Cluster {
    config: NodeConfig,
    peers: Vec<Peer>,
    pending_events: VecDeque<NodeEvent>,
}

impl Cluster {
    pub fn new(config: NodeConfig, registry: Arc<Registry>) -> Self {
        let hub = LoopbackHub::new();
        let scene: Arc<dyn Scene> = Arc::new(Arena::default());
        let peers = (1..=config.peers.max(1))
            .map(|player| {
                let mut session = Session::new(
                    player,
                    format!("peer-{player}"),
                    Box::new(hub.connect()),
                    Arc::clone(&registry),
                    Arc::clone(&scene),
                    config.session.clone(),
                );
                if player == 1 {
                    session = session.with_recording();
                }
                Peer {
                    session,
                    pilot: Pilot::new(config.seed.wrapping_mul(31).wrapping_add(player)),
                    joined: false,
                    gone: false,
                }
            })
            .collect();
        Self {
            config,
            peers,
            pending_events: VecDeque::new(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        let Some(host) = self.peers.first_mut() else {
            bail!("cluster has no peers");
        };
        host.session.host(self.config.room, self.config.seed)?;
        host.joined = true;
        log::info!("room {} opened with seed {}", self.config.room, self.config.seed);
        Ok(())
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = NodeEvent> + '_ {
        self.pending_events.drain(..)
    }

    fn host_frame(&self) -> u32 {
        self.peers
            .iter()
            .filter(|p| !p.gone)
            .find(|p| p.session.is_host())
            .and_then(|p| p.session.frame())
            .unwrap_or(0)
    }

    /// Frame every live, joined peer has reached.
    pub fn frame(&self) -> u32 {
        self.peers
            .iter()
            .filter(|p| !p.gone)
            .filter_map(|p| p.session.frame())
            .min()
            .unwrap_or(0)
    }

    /// One round: due joins and leaves, then one tick of every live peer
    /// still short of `target`.
    pub fn tick_once(&mut self, target: u32) -> Result<()> {
        let now = Instant::now();
        let host_frame = self.host_frame();
        let room = self.config.room;
        let join_every = self.config.join_every;
        let leave = self.config.leave;

        for (index, peer) in self.peers.iter_mut().enumerate() {
            if peer.gone {
                continue;
            }
            let player = peer.session.player();
            if !peer.joined && host_frame >= index as u32 * join_every {
                peer.session.join(room, now)?;
                peer.joined = true;
            }
            if leave.is_some_and(|(who, at)| who == player && host_frame >= at) {
                log::info!("peer {player} leaving at host frame {host_frame}");
                peer.session.leave()?;
                peer.gone = true;
                continue;
            }
            if !peer.joined || peer.session.frame().is_some_and(|f| f >= target) {
                continue;
            }

            let input = peer.pilot.next();
            if let Err(err) = peer.session.tick(now, &input) {
                if !err.is_recoverable() {
                    return Err(err.into());
                }
                self.pending_events.push_back(NodeEvent::Error {
                    peer: player,
                    message: err.to_string(),
                });
                if peer.session.phase() == SessionPhase::Idle {
                    peer.session.join(room, now)?;
                }
            }
            for event in peer.session.drain_events() {
                self.pending_events
                    .push_back(NodeEvent::Session { peer: player, event });
            }
        }
        Ok(())
    }

    pub fn settled(&self, target: u32) -> bool {
        self.peers
            .iter()
            .filter(|p| !p.gone)
            .all(|p| p.session.frame().is_some_and(|f| f >= target))
    }

    /// State hash of every live peer, which must agree once settled.
    pub fn hashes(&self) -> Result<BTreeMap<PlayerId, String>> {
        let mut hashes = BTreeMap::new();
        for peer in self.peers.iter().filter(|p| !p.gone) {
            if let Some(simulation) = peer.session.simulation() {
                hashes.insert(peer.session.player(), state_hash(simulation)?);
            }
        }
        Ok(hashes)
    }

    pub fn take_recording(&mut self) -> Option<ReplayStack> {
        self.peers
            .first_mut()
            .and_then(|p| p.session.take_recording())
    }
}
