use std::sync::Arc;

use log::debug;

use crate::ecs::{Registry, World};
use crate::error::Result;
use crate::physics::{PhysicsSubsystem, PhysicsSync, PhysicsWorld};
use crate::schedule::{Scheduler, StepContext};

use super::StepObserver;

/// Converts wall-clock deltas into whole ticks. Only decides how often a
/// step is attempted; simulated time never reads the wall clock.
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.min(0.25);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.dt
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

/// World, schedule and physics stepped together.
///
/// `frame()` is the number of the next frame to execute; a fresh simulation
/// is at frame 0.
pub struct Simulation {
    world: World,
    scheduler: Scheduler,
    physics: Box<dyn PhysicsSubsystem>,
    seed: u32,
    dt: f32,
    frame: u32,
    elapsed: f64,
    observers: Vec<Box<dyn StepObserver>>,
}

impl Simulation {
    pub fn new(registry: &Registry, seed: u32, tick_rate: u32) -> Self {
        let dt = FixedTimestep::new(tick_rate).dt();
        Self::with_physics(registry, seed, tick_rate, Box::new(PhysicsWorld::new(dt)))
    }

    /// Seals `registry`: no component or system may be registered once a
    /// simulation has been built from it.
    pub fn with_physics(
        registry: &Registry,
        seed: u32,
        tick_rate: u32,
        physics: Box<dyn PhysicsSubsystem>,
    ) -> Self {
        registry.seal();
        let table = Arc::new(registry.component_table());
        let scheduler = Scheduler::new(registry.systems());
        debug!(
            "simulation built: {} components, run order {:?}",
            table.len(),
            scheduler.run_order()
        );
        Self {
            world: World::new(table, seed),
            scheduler,
            physics,
            seed,
            dt: FixedTimestep::new(tick_rate).dt(),
            frame: 0,
            elapsed: 0.0,
            observers: Vec::new(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn physics(&self) -> &dyn PhysicsSubsystem {
        self.physics.as_ref()
    }

    pub(crate) fn physics_mut(&mut self) -> &mut dyn PhysicsSubsystem {
        self.physics.as_mut()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub(crate) fn set_frame(&mut self, frame: u32) {
        self.frame = frame;
        self.elapsed = frame as f64 * self.dt as f64;
    }

    pub fn add_observer(&mut self, observer: Box<dyn StepObserver>) {
        self.observers.push(observer);
    }

    /// Runs one frame: scheduled systems, physics, then the clock.
    pub fn step(&mut self) -> Result<()> {
        let ctx = StepContext {
            frame: self.frame,
            dt: self.dt,
            scheduler: &self.scheduler,
        };
        self.scheduler.run(&mut self.world, &ctx)?;

        PhysicsSync::world_to_physics(&self.world, self.physics.as_mut());
        self.physics.step(self.dt);
        PhysicsSync::physics_to_world(self.physics.as_ref(), &mut self.world);

        self.frame += 1;
        self.elapsed = self.frame as f64 * self.dt as f64;

        for observer in &self.observers {
            observer.on_step_complete(self);
        }
        Ok(())
    }
}
