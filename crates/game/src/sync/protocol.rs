use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::{ConnectionId, Frame, PlayerId, PlayerRecord, Room, RoomId};

pub const PROTOCOL_MAGIC: u32 = 0x4652_4D53;
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages exchanged between peers of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetMessage {
    Join {
        player: PlayerRecord,
        room: RoomId,
    },
    RequestState {
        player: PlayerId,
        room: RoomId,
        config: Value,
    },
    /// Snapshot handoff: serialized simulation plus every queued input.
    #[serde(rename_all = "camelCase")]
    State {
        room: RoomId,
        state: String,
        frame_stacks: BTreeMap<PlayerId, Vec<Frame>>,
        timestamp: u64,
    },
    Frame(Frame),
    UpdateRoom(Room),
    Rooms(BTreeMap<RoomId, Room>),
    /// Announces a connection's player to the others.
    Peer {
        connection: ConnectionId,
        player: PlayerRecord,
    },
    /// `last_frame` is set by the host once the departure frame is fixed.
    #[serde(rename_all = "camelCase")]
    UserDisconnect {
        player: PlayerId,
        last_frame: Option<u32>,
    },
    UpdatePlayerConnect(PlayerRecord),
    Message {
        text: String,
        timestamp: u64,
        player: PlayerId,
    },
}

impl NetMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::RequestState { .. } => "requestState",
            Self::State { .. } => "state",
            Self::Frame(_) => "frame",
            Self::UpdateRoom(_) => "updateRoom",
            Self::Rooms(_) => "rooms",
            Self::Peer { .. } => "peer",
            Self::UserDisconnect { .. } => "userDisconnect",
            Self::UpdatePlayerConnect(_) => "updatePlayerConnect",
            Self::Message { .. } => "message",
        }
    }
}

/// A message tagged with the connection that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub magic: u32,
    pub version: u32,
    pub from: ConnectionId,
    pub message: NetMessage,
}

impl Envelope {
    pub fn new(from: ConnectionId, message: NetMessage) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            from,
            message,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(data)?;
        if !envelope.is_valid() {
            return Err(Error::Codec(format!(
                "envelope {:#x} v{} from {}",
                envelope.magic, envelope.version, envelope.from
            )));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::FrameEvent;

    #[test]
    fn envelope_round_trip() {
        let frame = Frame {
            player: 2,
            frame: 40,
            keys: 3,
            events: vec![FrameEvent::Depart],
        };
        let envelope = Envelope::new(9, NetMessage::Frame(frame));
        let bytes = envelope.encode().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn message_tags() {
        let msg = NetMessage::UserDisconnect {
            player: 4,
            last_frame: Some(30),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["userDisconnect"]["lastFrame"], 30);
        assert_eq!(msg.kind(), "userDisconnect");
    }

    #[test]
    fn foreign_envelopes_rejected() {
        let mut envelope = Envelope::new(1, NetMessage::Rooms(BTreeMap::new()));
        envelope.version = 99;
        let bytes = serde_json::to_vec(&envelope).unwrap();
        assert!(matches!(Envelope::decode(&bytes), Err(Error::Codec(_))));
    }
}
