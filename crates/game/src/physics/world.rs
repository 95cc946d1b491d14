use std::collections::BTreeMap;

use glam::Vec2;
use log::debug;
use rapier3d::prelude::*;

use crate::ecs::Entity;
use crate::error::{Error, Result};

use super::{BodyOp, BodyState, PhysicsSnapshot, PhysicsSubsystem};

/// rapier-backed physics for planar motion. Every body is kinematic and
/// velocity driven, lives at z = 0 and carries a sensor ball collider.
pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector,
    handles: BTreeMap<Entity, (RigidBodyHandle, ColliderHandle)>,
    history: Vec<BodyOp>,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DT)
    }
}

impl PhysicsWorld {
    const DEFAULT_DT: Real = 1.0 / 60.0;
    /// History length that triggers a rebuild from the live bodies.
    pub const HISTORY_LIMIT: usize = 512;

    pub fn new(dt: Real) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = dt;
        integration_parameters.min_ccd_dt = dt / 100.0;

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: Vector::new(0.0, 0.0, 0.0),
            handles: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn dt(&self) -> Real {
        self.integration_parameters.dt
    }

    fn create(&mut self, entity: Entity, position: Vec2, radius: f32) {
        let body = RigidBodyBuilder::kinematic_velocity_based()
            .translation(Vector::new(position.x, position.y, 0.0))
            .lock_rotations()
            .build();
        let body_handle = self.bodies.insert(body);

        let collider = ColliderBuilder::ball(radius).sensor(true).build();
        let collider_handle =
            self.colliders
                .insert_with_parent(collider, body_handle, &mut self.bodies);

        self.handles.insert(entity, (body_handle, collider_handle));
        self.history.push(BodyOp::Create {
            entity: entity.id(),
            radius,
        });
    }

    fn destroy(&mut self, entity: Entity) -> bool {
        let Some((handle, _)) = self.handles.remove(&entity) else {
            return false;
        };
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        self.history.push(BodyOp::Remove {
            entity: entity.id(),
        });
        true
    }

    pub fn set_position(&mut self, entity: Entity, position: Vec2) {
        let Some((handle, _)) = self.handles.get(&entity) else {
            return;
        };
        if let Some(body) = self.bodies.get_mut(*handle) {
            let current_rot = *body.rotation();
            let pose = Pose::from_parts(Vector::new(position.x, position.y, 0.0), current_rot);
            body.set_position(pose, true);
        }
    }

    pub fn velocity(&self, entity: Entity) -> Option<Vec2> {
        let (handle, _) = self.handles.get(&entity)?;
        self.bodies.get(*handle).map(|b| {
            let v = b.linvel();
            Vec2::new(v.x, v.y)
        })
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Rebuilds the engine with only the live bodies, created in entity
    /// order. Handles are renumbered and the history restarts from this
    /// baseline. Runs at the same step on every replica since the history
    /// length is part of the replicated state.
    fn rebase(&mut self) {
        let radii: BTreeMap<Entity, f32> = self
            .handles
            .iter()
            .filter_map(|(entity, (_, collider))| {
                let ball = self.colliders.get(*collider)?.shape().as_ball()?;
                Some((*entity, ball.radius))
            })
            .collect();
        let mut fresh = Self::new(self.dt());
        for state in self.body_states() {
            let entity = Entity(state.entity);
            let Some(radius) = radii.get(&entity) else {
                continue;
            };
            fresh.create(entity, Vec2::from_array(state.position), *radius);
            fresh.set_velocity(entity, Vec2::from_array(state.velocity));
        }
        debug!(
            "physics rebased: {} history ops folded into {} bodies",
            self.history.len(),
            fresh.handles.len()
        );
        *self = fresh;
    }

    fn body_states(&self) -> Vec<BodyState> {
        self.handles
            .iter()
            .filter_map(|(entity, (handle, _))| {
                let body = self.bodies.get(*handle)?;
                let t = body.translation();
                let v = body.linvel();
                Some(BodyState {
                    entity: entity.id(),
                    position: [t.x, t.y],
                    velocity: [v.x, v.y],
                })
            })
            .collect()
    }
}

impl PhysicsSubsystem for PhysicsWorld {
    fn step(&mut self, dt: f32) {
        if self.history.len() > Self::HISTORY_LIMIT {
            self.rebase();
        }
        self.integration_parameters.dt = dt;
        self.pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }

    fn save(&self) -> Result<PhysicsSnapshot> {
        let blob = bincode::serde::encode_to_vec(self.body_states(), bincode::config::standard())
            .map_err(Error::codec)?;
        Ok(PhysicsSnapshot {
            bodies: self
                .handles
                .iter()
                .map(|(e, (b, _))| (e.id(), b.into_raw_parts()))
                .collect(),
            colliders: self
                .handles
                .iter()
                .map(|(e, (_, c))| (e.id(), c.into_raw_parts()))
                .collect(),
            blob,
            history: self.history.clone(),
        })
    }

    fn restore(&mut self, snapshot: &PhysicsSnapshot) -> Result<()> {
        *self = Self::new(self.dt());
        for op in &snapshot.history {
            match *op {
                BodyOp::Create { entity, radius } => {
                    self.create(Entity(entity), Vec2::ZERO, radius)
                }
                BodyOp::Remove { entity } => {
                    self.destroy(Entity(entity));
                }
            }
        }

        if self.handles.len() != snapshot.bodies.len() {
            return Err(Error::PhysicsIndexMismatch {
                entity: u32::MAX,
            });
        }
        for (entity, (body, collider)) in &self.handles {
            let id = entity.id();
            if snapshot.bodies.get(&id) != Some(&body.into_raw_parts())
                || snapshot.colliders.get(&id) != Some(&collider.into_raw_parts())
            {
                return Err(Error::PhysicsIndexMismatch { entity: id });
            }
        }

        let (states, _): (Vec<BodyState>, usize) =
            bincode::serde::decode_from_slice(&snapshot.blob, bincode::config::standard())
                .map_err(Error::codec)?;
        for state in states {
            let entity = Entity(state.entity);
            if !self.handles.contains_key(&entity) {
                return Err(Error::PhysicsIndexMismatch {
                    entity: state.entity,
                });
            }
            self.set_position(entity, Vec2::from_array(state.position));
            self.set_velocity(entity, Vec2::from_array(state.velocity));
        }
        debug!(
            "physics restored: {} bodies from {} history ops",
            self.handles.len(),
            snapshot.history.len()
        );
        Ok(())
    }

    fn ensure_body(&mut self, entity: Entity, position: Vec2, radius: f32) {
        if !self.handles.contains_key(&entity) {
            self.create(entity, position, radius);
        }
    }

    fn remove_body(&mut self, entity: Entity) -> bool {
        self.destroy(entity)
    }

    fn set_velocity(&mut self, entity: Entity, velocity: Vec2) {
        let Some((handle, _)) = self.handles.get(&entity) else {
            return;
        };
        if let Some(body) = self.bodies.get_mut(*handle) {
            body.set_linvel(Vector::new(velocity.x, velocity.y, 0.0), true);
        }
    }

    fn teleport(&mut self, entity: Entity, position: Vec2) {
        self.set_position(entity, position);
    }

    fn position(&self, entity: Entity) -> Option<Vec2> {
        let (handle, _) = self.handles.get(&entity)?;
        self.bodies.get(*handle).map(|b| {
            let t = b.translation();
            Vec2::new(t.x, t.y)
        })
    }

    fn bodies(&self) -> Vec<Entity> {
        self.handles.keys().copied().collect()
    }
}
