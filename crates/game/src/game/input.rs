use bitflags::bitflags;
use glam::Vec2;

bitflags! {
    /// Held-key bits carried in every frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Keys: u32 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const ACTION = 1 << 4;
        const BOOST = 1 << 5;
    }
}

/// Action ids carried as frame events.
pub mod action {
    pub const DASH: u16 = 1;
    pub const SPARK: u16 = 2;
}

impl Keys {
    /// Unit steering direction, zero when opposing keys cancel out.
    pub fn direction(self) -> Vec2 {
        let mut dir = Vec2::ZERO;
        if self.contains(Keys::UP) {
            dir.y += 1.0;
        }
        if self.contains(Keys::DOWN) {
            dir.y -= 1.0;
        }
        if self.contains(Keys::RIGHT) {
            dir.x += 1.0;
        }
        if self.contains(Keys::LEFT) {
            dir.x -= 1.0;
        }
        dir.normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_keys() {
        assert_eq!(Keys::RIGHT.direction(), Vec2::X);
        assert_eq!((Keys::LEFT | Keys::RIGHT).direction(), Vec2::ZERO);
        let diagonal = (Keys::UP | Keys::RIGHT).direction();
        assert!((diagonal.length() - 1.0).abs() < 1e-6);
        assert_eq!(Keys::from_bits_truncate(0xFFFF_FF00), Keys::empty());
    }
}
