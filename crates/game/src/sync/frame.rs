use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::PlayerId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameEvent {
    /// Game-defined action, handed to the player's input component.
    Action(u16),
    /// Carried by the host's own frame: spawn `player` when this frame runs.
    Admit { player: PlayerId, config: Value },
    /// Last frame of a departing player: its entity is removed when this
    /// frame runs.
    Depart,
}

/// One player's complete input for one simulation frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub player: PlayerId,
    pub frame: u32,
    pub keys: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<FrameEvent>,
}

impl Frame {
    pub fn empty(player: PlayerId, frame: u32) -> Self {
        Self {
            player,
            frame,
            keys: 0,
            events: Vec::new(),
        }
    }

    pub fn actions(&self) -> impl Iterator<Item = u16> + '_ {
        self.events.iter().filter_map(|e| match e {
            FrameEvent::Action(a) => Some(*a),
            _ => None,
        })
    }

    pub fn departs(&self) -> bool {
        self.events.iter().any(|e| matches!(e, FrameEvent::Depart))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRejected {
    /// At or before a frame already accepted or consumed.
    Stale { frame: u32, expected: u32 },
    /// Would leave a hole in the sequence.
    Gap { frame: u32, expected: u32 },
    /// The player has departed; nothing follows the departure frame.
    Closed { frame: u32 },
}

impl fmt::Display for FrameRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale { frame, expected } => {
                write!(f, "stale frame {frame}, expecting {expected}")
            }
            Self::Gap { frame, expected } => write!(f, "frame {frame} skips ahead of {expected}"),
            Self::Closed { frame } => write!(f, "frame {frame} after departure"),
        }
    }
}

/// Pending input of one player, gap-free and strictly increasing.
#[derive(Debug, Clone)]
pub struct FrameStack {
    player: PlayerId,
    frames: VecDeque<Frame>,
    next: u32,
    closed: bool,
}

impl FrameStack {
    /// An empty stack that accepts `start` as its first frame.
    pub fn new(player: PlayerId, start: u32) -> Self {
        Self {
            player,
            frames: VecDeque::new(),
            next: start,
            closed: false,
        }
    }

    /// A stack pre-filled with `count` empty frames from `start`, so the
    /// barrier has input to consume before the player's own frames arrive.
    pub fn seeded(player: PlayerId, start: u32, count: u32) -> Self {
        let mut stack = Self::new(player, start);
        for frame in start..start + count {
            stack.frames.push_back(Frame::empty(player, frame));
        }
        stack.next = start + count;
        stack
    }

    /// Rebuilds a stack from transmitted frames. The frames must already be
    /// contiguous; the first one sets the starting point.
    pub fn from_frames(player: PlayerId, start: u32, frames: Vec<Frame>) -> Self {
        let mut stack = Self::new(player, frames.first().map_or(start, |f| f.frame));
        for frame in frames {
            let departs = frame.departs();
            if stack.push(frame).is_ok() && departs {
                stack.closed = true;
            }
        }
        stack
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn push(&mut self, frame: Frame) -> Result<(), FrameRejected> {
        if self.closed {
            return Err(FrameRejected::Closed { frame: frame.frame });
        }
        if frame.frame < self.next {
            return Err(FrameRejected::Stale {
                frame: frame.frame,
                expected: self.next,
            });
        }
        if frame.frame > self.next {
            return Err(FrameRejected::Gap {
                frame: frame.frame,
                expected: self.next,
            });
        }
        self.next += 1;
        self.frames.push_back(frame);
        Ok(())
    }

    pub fn head(&self) -> Option<&Frame> {
        self.frames.front()
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Drops queued frames numbered below `current`. Returns how many went.
    pub fn drop_stale(&mut self, current: u32) -> usize {
        let mut dropped = 0;
        while self.frames.front().is_some_and(|f| f.frame < current) {
            self.frames.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Number of the last frame accepted, if any.
    pub fn tail(&self) -> Option<u32> {
        self.next.checked_sub(1)
    }

    pub fn next_expected(&self) -> u32 {
        self.next
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Pads with empty frames through `last_frame`, marks that frame as the
    /// departure and closes the stack. Queued frames past `last_frame` are
    /// discarded and returned. A stack that opens after `last_frame` departs
    /// on its first frame instead, so the closed stack always ends in `Depart`.
    pub fn fill_until(&mut self, last_frame: u32) -> Vec<Frame> {
        let first = self.frames.front().map_or(self.next, |f| f.frame);
        let last_frame = last_frame.max(first);
        let mut discarded = Vec::new();
        while self.frames.back().is_some_and(|f| f.frame > last_frame) {
            if let Some(frame) = self.frames.pop_back() {
                discarded.push(frame);
            }
        }
        discarded.reverse();
        if self.next > last_frame + 1 {
            self.next = last_frame + 1;
        }
        while self.next <= last_frame {
            self.frames.push_back(Frame::empty(self.player, self.next));
            self.next += 1;
        }
        if let Some(last) = self.frames.back_mut()
            && last.frame == last_frame
            && !last.departs()
        {
            last.events.push(FrameEvent::Depart);
        }
        self.closed = true;
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(frame: u32, keys: u32) -> Frame {
        Frame {
            player: 1,
            frame,
            keys,
            events: Vec::new(),
        }
    }

    #[test]
    fn strictly_increasing_without_gaps() {
        let mut stack = FrameStack::seeded(1, 0, 5);
        assert_eq!(stack.len(), 5);
        assert_eq!(stack.tail(), Some(4));

        assert!(stack.push(input(5, 1)).is_ok());
        assert_eq!(
            stack.push(input(5, 2)),
            Err(FrameRejected::Stale { frame: 5, expected: 6 })
        );
        assert_eq!(
            stack.push(input(3, 2)),
            Err(FrameRejected::Stale { frame: 3, expected: 6 })
        );
        assert_eq!(
            stack.push(input(8, 2)),
            Err(FrameRejected::Gap { frame: 8, expected: 6 })
        );
        let numbers: Vec<u32> = stack.frames().map(|f| f.frame).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn stale_heads_are_dropped() {
        let mut stack = FrameStack::seeded(1, 10, 5);
        assert_eq!(stack.drop_stale(12), 2);
        assert_eq!(stack.head().map(|f| f.frame), Some(12));
        assert_eq!(stack.drop_stale(12), 0);
    }

    #[test]
    fn fill_until_closes_with_departure() {
        let mut stack = FrameStack::seeded(1, 0, 3);
        stack.push(input(3, 7)).unwrap();
        assert!(stack.fill_until(9).is_empty());
        assert!(stack.is_closed());
        assert_eq!(stack.len(), 10);
        assert_eq!(stack.frames().nth(3).map(|f| f.keys), Some(7));
        let last = stack.frames().last().unwrap();
        assert_eq!(last.frame, 9);
        assert!(last.departs());
        assert!(matches!(
            stack.push(input(10, 0)),
            Err(FrameRejected::Closed { frame: 10 })
        ));
    }

    #[test]
    fn fill_until_truncates_overshoot() {
        let mut stack = FrameStack::seeded(1, 0, 6);
        let dropped = stack.fill_until(3);
        assert_eq!(dropped.iter().map(|f| f.frame).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(stack.tail(), Some(3));
        assert!(stack.frames().last().unwrap().departs());
    }

    #[test]
    fn fill_until_before_first_frame_departs_on_it() {
        let mut stack = FrameStack::seeded(9, 11, 10);
        let dropped = stack.fill_until(10);
        assert_eq!(dropped.len(), 9);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.tail(), Some(11));
        let head = stack.head().unwrap();
        assert_eq!(head.frame, 11);
        assert!(head.departs());
        assert!(stack.is_closed());
    }

    #[test]
    fn from_frames_keeps_departure() {
        let mut source = FrameStack::seeded(2, 4, 2);
        source.fill_until(7);
        let rebuilt = FrameStack::from_frames(2, 0, source.frames().cloned().collect());
        assert_eq!(rebuilt.head().map(|f| f.frame), Some(4));
        assert_eq!(rebuilt.tail(), Some(7));
        assert!(rebuilt.is_closed());
    }

    #[test]
    fn json_shape() {
        let frame = Frame {
            player: 3,
            frame: 12,
            keys: 5,
            events: vec![FrameEvent::Action(2)],
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["events"][0]["action"], 2);
        let empty = serde_json::to_value(Frame::empty(3, 1)).unwrap();
        assert!(empty.get("events").is_none());
    }
}
