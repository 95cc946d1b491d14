use crate::ecs::Entity;
use crate::sync::{PlayerId, RoomId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("component registration closed, cannot register `{name}`")]
    RegistrationClosed { name: String },
    #[error("no frame stack for active player {player}")]
    MissingFrameStack { player: PlayerId },
    #[error("room {room} did not resolve in time")]
    RoomTimeout { room: RoomId },
    #[error("local player is not connected")]
    NotConnected,
    #[error("state mismatch at frame {frame}: expected {expected}, computed {actual}")]
    StateMismatch {
        frame: u32,
        expected: String,
        actual: String,
    },
    #[error("component dependency cycle between {names:?}")]
    DependencyCycle { names: Vec<String> },
    #[error("unknown component `{name}`")]
    UnknownComponent { name: String },
    #[error("component `{component}` has no field `{field}`")]
    UnknownField { component: String, field: String },
    #[error("field {index} of `{component}` expects {expected}")]
    FieldType {
        component: String,
        index: usize,
        expected: &'static str,
    },
    #[error("entity {0} is not alive")]
    EntityNotAlive(Entity),
    #[error("player {player} departs at frame {last_frame} but simulation is at {current}")]
    DepartureInPast {
        player: PlayerId,
        last_frame: u32,
        current: u32,
    },
    #[error("physics history does not reproduce handle of entity {entity}")]
    PhysicsIndexMismatch { entity: u32 },
    #[error("no snapshot at or before frame {frame}")]
    NoSnapshot { frame: u32 },
    #[error("validator halted after a state mismatch")]
    ValidatorHalted,
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Protocol-invariant violations. The session must be torn down, never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingFrameStack { .. }
                | Self::StateMismatch { .. }
                | Self::DepartureInPast { .. }
                | Self::PhysicsIndexMismatch { .. }
                | Self::ValidatorHalted
        )
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RoomTimeout { .. } | Self::NotConnected)
    }

    pub(crate) fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Error::MissingFrameStack { player: 1 }.is_fatal());
        assert!(!Error::MissingFrameStack { player: 1 }.is_recoverable());
        assert!(Error::RoomTimeout { room: 3 }.is_recoverable());
        assert!(Error::NotConnected.is_recoverable());
        assert!(!Error::NotConnected.is_fatal());
    }
}
