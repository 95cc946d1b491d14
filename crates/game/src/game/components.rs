use glam::Vec2;

use crate::ecs::{Component, Entity, FieldReader, FieldValue};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transform {
    pub position: Vec2,
    pub rotation: f32,
}

impl Component for Transform {
    const NAME: &'static str = "Transform";
    const FIELDS: &'static [&'static str] = &["position", "rotation"];

    fn field(&self, index: usize) -> FieldValue {
        match index {
            0 => self.position.into(),
            _ => self.rotation.into(),
        }
    }

    fn set_field(&mut self, index: usize, value: &FieldValue) -> Result<()> {
        let reader = FieldReader::new(Self::NAME, index, value);
        match index {
            0 => self.position = reader.vec2()?,
            _ => self.rotation = reader.f32()?,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub velocity: Vec2,
    pub speed: f32,
}

impl Default for Motion {
    fn default() -> Self {
        Self {
            velocity: Vec2::ZERO,
            speed: 4.0,
        }
    }
}

impl Component for Motion {
    const NAME: &'static str = "Motion";
    const FIELDS: &'static [&'static str] = &["velocity", "speed"];

    fn dependencies() -> &'static [&'static str] {
        &["Transform"]
    }

    fn field(&self, index: usize) -> FieldValue {
        match index {
            0 => self.velocity.into(),
            _ => self.speed.into(),
        }
    }

    fn set_field(&mut self, index: usize, value: &FieldValue) -> Result<()> {
        let reader = FieldReader::new(Self::NAME, index, value);
        match index {
            0 => self.velocity = reader.vec2()?,
            _ => self.speed = reader.f32()?,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collider {
    pub radius: f32,
}

impl Default for Collider {
    fn default() -> Self {
        Self { radius: 0.5 }
    }
}

impl Component for Collider {
    const NAME: &'static str = "Collider";
    const FIELDS: &'static [&'static str] = &["radius"];

    fn dependencies() -> &'static [&'static str] {
        &["Transform"]
    }

    fn field(&self, _index: usize) -> FieldValue {
        self.radius.into()
    }

    fn set_field(&mut self, index: usize, value: &FieldValue) -> Result<()> {
        self.radius = FieldReader::new(Self::NAME, index, value).f32()?;
        Ok(())
    }
}

/// Input slot of one player's entity. Filled from that player's frame stack
/// at the start of each step and nowhere else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerControl {
    pub player: u32,
    pub keys: u32,
    pub prev_keys: u32,
    pub events: Vec<u32>,
}

impl PlayerControl {
    pub fn pressed(&self, bit: u32) -> bool {
        self.keys & bit != 0 && self.prev_keys & bit == 0
    }
}

impl Component for PlayerControl {
    const NAME: &'static str = "PlayerControl";
    const FIELDS: &'static [&'static str] = &["player", "keys", "prev_keys", "events"];

    fn field(&self, index: usize) -> FieldValue {
        match index {
            0 => self.player.into(),
            1 => self.keys.into(),
            2 => self.prev_keys.into(),
            _ => self.events.clone().into(),
        }
    }

    fn set_field(&mut self, index: usize, value: &FieldValue) -> Result<()> {
        let reader = FieldReader::new(Self::NAME, index, value);
        match index {
            0 => self.player = reader.u32()?,
            1 => self.keys = reader.u32()?,
            2 => self.prev_keys = reader.u32()?,
            _ => self.events = reader.list()?,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Health {
    pub hp: i32,
    pub max: i32,
}

impl Default for Health {
    fn default() -> Self {
        Self { hp: 10, max: 10 }
    }
}

impl Component for Health {
    const NAME: &'static str = "Health";
    const FIELDS: &'static [&'static str] = &["hp", "max"];

    fn field(&self, index: usize) -> FieldValue {
        match index {
            0 => self.hp.into(),
            _ => self.max.into(),
        }
    }

    fn set_field(&mut self, index: usize, value: &FieldValue) -> Result<()> {
        let reader = FieldReader::new(Self::NAME, index, value);
        match index {
            0 => self.hp = reader.i32()?,
            _ => self.max = reader.i32()?,
        }
        Ok(())
    }
}

/// Steers toward another entity. The target is a plain id and may go stale;
/// it is checked against the world before every use.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Follow {
    pub target: Option<Entity>,
    pub range: f32,
}

impl Component for Follow {
    const NAME: &'static str = "Follow";
    const FIELDS: &'static [&'static str] = &["target", "range"];

    fn dependencies() -> &'static [&'static str] {
        &["Motion"]
    }

    fn field(&self, index: usize) -> FieldValue {
        match index {
            0 => self.target.into(),
            _ => self.range.into(),
        }
    }

    fn set_field(&mut self, index: usize, value: &FieldValue) -> Result<()> {
        let reader = FieldReader::new(Self::NAME, index, value);
        match index {
            0 => self.target = reader.entity()?,
            _ => self.range = reader.f32()?,
        }
        Ok(())
    }
}

/// Frames left before the entity is destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Lifetime {
    pub frames: u32,
}

impl Component for Lifetime {
    const NAME: &'static str = "Lifetime";
    const FIELDS: &'static [&'static str] = &["frames"];

    fn field(&self, _index: usize) -> FieldValue {
        self.frames.into()
    }

    fn set_field(&mut self, index: usize, value: &FieldValue) -> Result<()> {
        self.frames = FieldReader::new(Self::NAME, index, value).u32()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_round_trip() {
        let control = PlayerControl {
            player: 4,
            keys: 0b101,
            prev_keys: 0b1,
            events: vec![2, 9],
        };
        let mut copy = PlayerControl::default();
        for (i, value) in control.fields().iter().enumerate() {
            copy.set_field(i, value).unwrap();
        }
        assert_eq!(copy, control);
        assert!(control.pressed(0b100));
        assert!(!control.pressed(0b1));
    }

    #[test]
    fn follow_target_is_nullable() {
        let mut follow = Follow::default();
        follow.set_field(0, &Some(Entity(5)).into()).unwrap();
        assert_eq!(follow.target, Some(Entity(5)));
        follow.set_field(0, &FieldValue::Entity(None)).unwrap();
        assert_eq!(follow.target, None);
    }
}
