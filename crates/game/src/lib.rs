pub mod ecs;
pub mod error;
pub mod game;
pub mod physics;
pub mod replay;
pub mod replicate;
pub mod schedule;
pub mod simulation;
pub mod sync;

pub use ecs::{Category, Component, ComponentId, Entity, FieldValue, Registry, Template, World};
pub use error::{Error, Result};
pub use physics::{PhysicsSnapshot, PhysicsSubsystem, PhysicsSync, PhysicsWorld};
pub use replay::{ReplayRecorder, ReplayStack, ReplayValidator};
pub use replicate::{DeltaPacket, Snapshot, SnapshotEncoding, state_hash};
pub use schedule::{Scheduler, StepContext, System};
pub use simulation::{FixedTimestep, Scene, SeededRandom, Simulation, StepObserver};
pub use sync::{
    Frame, FrameEvent, FrameStack, LocalInput, LoopbackHub, NetMessage, PlayerId, Room, RoomId,
    RoomState, Session, SessionConfig, SessionEvent, SessionPhase, Transport,
};
