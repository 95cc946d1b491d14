use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use framesync::{PlayerId, RoomId, SessionConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    pub peers: u32,
    pub frames: u32,
    pub seed: u32,
    pub room: RoomId,
    /// Frames the host runs between two joins.
    pub join_every: u32,
    /// Player that walks out, and the host frame at which it does.
    pub leave: Option<(PlayerId, u32)>,
    pub session: SessionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peers: 3,
            frames: 600,
            seed: 1,
            room: 1,
            join_every: 30,
            leave: None,
            session: SessionConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.session.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let text = r#"{ "peers": 4, "leave": [2, 300], "session": { "frameOffset": 3 } }"#;
        let config: NodeConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.peers, 4);
        assert_eq!(config.leave, Some((2, 300)));
        assert_eq!(config.session.frame_offset, 3);
        assert_eq!(config.frames, 600);
        assert_eq!(config.session.tick_rate, 60);
    }

    #[test]
    fn load_rejects_short_leave_horizon() {
        let path = std::env::temp_dir().join(format!("framesync-node-{}.json", std::process::id()));
        fs::write(&path, r#"{ "session": { "frameOffset": 12, "leaveHorizon": 10 } }"#).unwrap();
        let err = NodeConfig::load(&path).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(err.to_string().contains("leaveHorizon"));
    }
}
