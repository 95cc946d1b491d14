use std::sync::Arc;

use log::trace;

use crate::ecs::{Category, Entity, World};
use crate::error::Result;

use super::{StepContext, System};

/// Fixed run order for a set of systems.
pub struct Scheduler {
    systems: Vec<Arc<dyn System>>,
}

impl Scheduler {
    /// Orders by `(priority, name)`. Registration order never matters.
    pub fn new(mut systems: Vec<Arc<dyn System>>) -> Self {
        systems.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        Self { systems }
    }

    pub fn systems(&self) -> impl Iterator<Item = &dyn System> {
        self.systems.iter().map(|s| s.as_ref())
    }

    pub fn run_order(&self) -> Vec<&str> {
        self.systems
            .iter()
            .filter(|s| !s.is_manual())
            .map(|s| s.name())
            .collect()
    }

    pub fn run(&self, world: &mut World, ctx: &StepContext<'_>) -> Result<()> {
        for system in self.systems.iter().filter(|s| !s.is_manual()) {
            trace!("frame {} running {}", ctx.frame, system.name());
            system.run(world, ctx)?;
        }
        Ok(())
    }

    /// Runs every manual system of `category` against `entity`. `before` may
    /// override fields ahead of each system, `after` may inspect or adjust the
    /// result.
    pub fn run_mods<B, A>(
        &self,
        category: Category,
        world: &mut World,
        entity: Entity,
        ctx: &StepContext<'_>,
        mut before: B,
        mut after: A,
    ) -> Result<()>
    where
        B: FnMut(&mut World, Entity, &dyn System) -> Result<()>,
        A: FnMut(&mut World, Entity, &dyn System) -> Result<()>,
    {
        for system in self
            .systems
            .iter()
            .filter(|s| s.is_manual() && s.category() == category)
        {
            if !world.is_alive(entity) {
                break;
            }
            before(world, entity, system.as_ref())?;
            system.run_for(world, entity, ctx)?;
            after(world, entity, system.as_ref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::ecs::Registry;

    struct Tracer {
        name: &'static str,
        category: Category,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl System for Tracer {
        fn name(&self) -> &str {
            self.name
        }

        fn category(&self) -> Category {
            self.category
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn run(&self, _world: &mut World, _ctx: &StepContext<'_>) -> Result<()> {
            self.log.lock().push(self.name.to_string());
            Ok(())
        }

        fn run_for(
            &self,
            _world: &mut World,
            entity: Entity,
            _ctx: &StepContext<'_>,
        ) -> Result<()> {
            self.log.lock().push(format!("{}@{}", self.name, entity));
            Ok(())
        }
    }

    fn tracer(
        name: &'static str,
        category: Category,
        priority: i32,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn System> {
        Arc::new(Tracer {
            name,
            category,
            priority,
            log: Arc::clone(log),
        })
    }

    fn world() -> World {
        World::new(Arc::new(Registry::new().component_table()), 1)
    }

    #[test]
    fn ties_break_by_name_not_registration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Scheduler::new(vec![
            tracer("zeta", Category::Logic, 1, &log),
            tracer("alpha", Category::Logic, 1, &log),
            tracer("first", Category::Input, 0, &log),
        ]);
        let b = Scheduler::new(vec![
            tracer("first", Category::Input, 0, &log),
            tracer("alpha", Category::Logic, 1, &log),
            tracer("zeta", Category::Logic, 1, &log),
        ]);
        assert_eq!(a.run_order(), vec!["first", "alpha", "zeta"]);
        assert_eq!(a.run_order(), b.run_order());
    }

    #[test]
    fn manual_systems_only_run_through_mods() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let scheduler = Scheduler::new(vec![
            tracer("move", Category::Motion, 10, &log),
            tracer("boost", Category::Effect, -1, &log),
            tracer("shield", Category::Effect, -2, &log),
            tracer("other", Category::Logic, -1, &log),
        ]);
        let mut world = world();
        let entity = world.spawn();
        let ctx = StepContext {
            frame: 0,
            dt: 1.0 / 60.0,
            scheduler: &scheduler,
        };

        scheduler.run(&mut world, &ctx).unwrap();
        assert_eq!(*log.lock(), vec!["move"]);

        let mut seen = Vec::new();
        scheduler
            .run_mods(
                Category::Effect,
                &mut world,
                entity,
                &ctx,
                |_, _, _| Ok(()),
                |_, _, system| {
                    seen.push(system.name().to_string());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(seen, vec!["shield", "boost"]);
        assert_eq!(log.lock()[1..], ["shield@#0", "boost@#0"]);
    }
}
