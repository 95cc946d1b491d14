use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::replicate::SnapshotEncoding;

/// Tunables shared by every peer of a room. All peers must agree on the
/// values that affect simulation: `tick_rate`, `leave_round`, `leave_horizon`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Frames between capturing input and executing it.
    pub frame_offset: u32,
    pub tick_rate: u32,
    /// Departure frames are rounded up to a multiple of this.
    pub leave_round: u32,
    /// Extra frames added after rounding, so every peer hears of the
    /// departure before it executes.
    pub leave_horizon: u32,
    #[serde(with = "millis")]
    pub room_timeout: Duration,
    /// Recorder snapshot cadence, in frames.
    pub snapshot_interval: u32,
    /// Recorder hash cadence, in frames.
    pub hash_interval: u32,
    pub encoding: SnapshotEncoding,
    /// Hand authority to the next player when the host leaves. When false
    /// the room closes instead.
    pub rebalance_on_leave: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_offset: 5,
            tick_rate: 60,
            leave_round: 10,
            leave_horizon: 10,
            room_timeout: Duration::from_secs(5),
            snapshot_interval: 100,
            hash_interval: 1,
            encoding: SnapshotEncoding::Json,
            rebalance_on_leave: true,
        }
    }
}

impl SessionConfig {
    /// A departure must run after every peer has heard of it, which takes
    /// longer than the input delay.
    pub fn validate(&self) -> Result<()> {
        if self.tick_rate == 0 {
            return Err(Error::InvalidConfig("tickRate must be at least 1".into()));
        }
        if self.leave_horizon <= self.frame_offset {
            return Err(Error::InvalidConfig(format!(
                "leaveHorizon {} must exceed frameOffset {}",
                self.leave_horizon, self.frame_offset
            )));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"frameOffset": 3, "roomTimeout": 250}"#).unwrap();
        assert_eq!(config.frame_offset, 3);
        assert_eq!(config.room_timeout, Duration::from_millis(250));
        assert_eq!(config.leave_round, 10);
        assert!(config.rebalance_on_leave);
    }

    #[test]
    fn horizon_must_outlast_input_delay() {
        assert!(SessionConfig::default().validate().is_ok());
        let config = SessionConfig {
            frame_offset: 10,
            leave_horizon: 10,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        let config = SessionConfig {
            frame_offset: 10,
            leave_horizon: 11,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
