mod config;
mod frame;
mod lockstep;
mod protocol;
mod room;
mod session;
mod transport;

pub type PlayerId = u32;
pub type RoomId = u64;
pub type ConnectionId = u64;

pub use config::SessionConfig;
pub use frame::{Frame, FrameEvent, FrameRejected, FrameStack};
pub use lockstep::{Advance, Barrier, Progress, RoomState};
pub use protocol::{Envelope, NetMessage, PROTOCOL_MAGIC, PROTOCOL_VERSION};
pub use room::{PlayerRecord, Room};
pub use session::{LocalInput, Session, SessionEvent, SessionPhase};
pub use transport::{Inbound, LoopbackHub, LoopbackTransport, Target, Transport};
