mod components;
mod input;
mod scene;
mod systems;

pub use components::{Collider, Follow, Health, Lifetime, Motion, PlayerControl, Transform};
pub use input::{Keys, action};
pub use scene::{Arena, register, registry};
pub use systems::{
    DashEffect, Expire, FollowTarget, Integrate, PlayerActions, PlayerMovement, SparkEffect,
};
