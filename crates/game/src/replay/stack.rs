use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::replicate::Snapshot;
use crate::sync::{Frame, FrameEvent, PlayerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub frame: u32,
    pub keys: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<FrameEvent>,
}

impl RecordedFrame {
    pub fn to_frame(&self, player: PlayerId) -> Frame {
        Frame {
            player,
            frame: self.frame,
            keys: self.keys,
            events: self.events.clone(),
        }
    }
}

impl From<&Frame> for RecordedFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            frame: frame.frame,
            keys: frame.keys,
            events: frame.events.clone(),
        }
    }
}

/// Everything needed to re-run a session offline: consumed inputs, periodic
/// snapshots and the state hashes observed while it ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStack {
    pub seed: u32,
    pub tick_rate: u32,
    /// Player spawn configs, taken from admissions seen while recording.
    pub configs: BTreeMap<PlayerId, Value>,
    pub frames: BTreeMap<PlayerId, Vec<RecordedFrame>>,
    pub snapshots: BTreeMap<u32, Snapshot>,
    /// Keyed by the frame number reached after the step.
    pub state_hashes: BTreeMap<u32, String>,
}

impl ReplayStack {
    pub fn new(seed: u32, tick_rate: u32) -> Self {
        Self {
            seed,
            tick_rate,
            ..Self::default()
        }
    }

    pub fn record_frame(&mut self, frame: &Frame) {
        for event in &frame.events {
            if let FrameEvent::Admit { player, config } = event {
                self.configs.insert(*player, config.clone());
            }
        }
        self.frames
            .entry(frame.player)
            .or_default()
            .push(RecordedFrame::from(frame));
    }

    /// Recorded input for every player from `start` on.
    pub fn frames_from(&self, start: u32) -> BTreeMap<PlayerId, Vec<Frame>> {
        self.frames
            .iter()
            .map(|(player, frames)| {
                let tail: Vec<Frame> = frames
                    .iter()
                    .filter(|f| f.frame >= start)
                    .map(|f| f.to_frame(*player))
                    .collect();
                (*player, tail)
            })
            .filter(|(_, tail)| !tail.is_empty())
            .collect()
    }

    pub fn closest_snapshot(&self, frame: u32) -> Option<&Snapshot> {
        self.snapshots.range(..=frame).next_back().map(|(_, s)| s)
    }

    pub fn first_frame(&self) -> Option<u32> {
        self.snapshots.keys().next().copied()
    }

    /// Frame reached once every recorded input has been consumed.
    pub fn end_frame(&self) -> u32 {
        let consumed = self
            .frames
            .values()
            .filter_map(|frames| frames.last())
            .map(|f| f.frame + 1)
            .max();
        consumed.or(self.first_frame()).unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(player: PlayerId, number: u32, keys: u32) -> Frame {
        Frame {
            player,
            frame: number,
            keys,
            events: Vec::new(),
        }
    }

    #[test]
    fn frames_from_filters_and_skips_empty() {
        let mut stack = ReplayStack::new(1, 60);
        for n in 0..5 {
            stack.record_frame(&frame(1, n, n));
        }
        stack.record_frame(&frame(2, 1, 0));

        let tail = stack.frames_from(3);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[&1].iter().map(|f| f.keys).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(stack.end_frame(), 5);
    }

    #[test]
    fn admissions_fill_configs() {
        let mut stack = ReplayStack::new(1, 60);
        let mut host = frame(1, 0, 0);
        host.events.push(FrameEvent::Admit {
            player: 4,
            config: serde_json::json!({ "speed": 2.0 }),
        });
        stack.record_frame(&host);
        assert_eq!(stack.configs[&4]["speed"], 2.0);
    }

    #[test]
    fn json_file_round_trip() {
        let mut stack = ReplayStack::new(9, 30);
        stack.record_frame(&frame(1, 0, 6));
        stack.state_hashes.insert(1, "00000000deadbeef".into());

        let path = std::env::temp_dir().join(format!("replay-{}.json", std::process::id()));
        stack.save(&path).unwrap();
        let loaded = ReplayStack::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, stack);
    }
}
