use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use crate::error::{Error, Result};
use crate::schedule::System;

use super::component::{Category, Component, ComponentId, ComponentInfo, MAX_FIELDS};
use super::store::{ErasedStore, Store};

type StoreFactory = fn(ComponentInfo) -> Box<dyn ErasedStore>;

fn make_store<T: Component>(info: ComponentInfo) -> Box<dyn ErasedStore> {
    Box::new(Store::<T>::new(info))
}

#[derive(Clone)]
struct ComponentEntry {
    type_id: TypeId,
    name: &'static str,
    category: Category,
    priority: i32,
    fields: &'static [&'static str],
    dependencies: &'static [&'static str],
    factory: StoreFactory,
}

/// Component and system registrations for one simulation setup.
///
/// Registration is a builder step: once a [`crate::Simulation`] has been
/// built from the registry it is sealed and further registration fails.
#[derive(Default)]
pub struct Registry {
    components: Vec<ComponentEntry>,
    systems: Vec<Arc<dyn System>>,
    sealed: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_component<T: Component>(
        &mut self,
        category: Category,
        priority: i32,
    ) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::RegistrationClosed {
                name: T::NAME.to_string(),
            });
        }
        if self.components.iter().any(|c| c.name == T::NAME) {
            return Ok(());
        }
        if T::FIELDS.len() > MAX_FIELDS {
            return Err(Error::Codec(format!(
                "{} declares {} fields, limit is {MAX_FIELDS}",
                T::NAME,
                T::FIELDS.len()
            )));
        }
        debug!("registered component {} ({:?}, {})", T::NAME, category, priority);
        self.components.push(ComponentEntry {
            type_id: TypeId::of::<T>(),
            name: T::NAME,
            category,
            priority,
            fields: T::FIELDS,
            dependencies: T::dependencies(),
            factory: make_store::<T>,
        });
        Ok(())
    }

    pub fn register_system(&mut self, system: Arc<dyn System>) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::RegistrationClosed {
                name: system.name().to_string(),
            });
        }
        if self.systems.iter().any(|s| s.name() == system.name()) {
            return Ok(());
        }
        let missing = system
            .dependencies()
            .iter()
            .copied()
            .find(|name| !self.components.iter().any(|c| c.name == *name));
        if let Some(name) = missing {
            return Err(Error::UnknownComponent {
                name: name.to_string(),
            });
        }
        debug!("registered system {} needing {:?}", system.name(), system.dependencies());
        self.systems.push(system);
        Ok(())
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    pub fn systems(&self) -> Vec<Arc<dyn System>> {
        self.systems.clone()
    }

    /// Builds the id table. Ids follow lexicographic name order, so two
    /// registries holding the same kinds agree regardless of call order.
    pub fn component_table(&self) -> ComponentTable {
        let mut entries = self.components.clone();
        entries.sort_by(|a, b| a.name.cmp(b.name));

        let mut table = ComponentTable::default();
        for (index, entry) in entries.into_iter().enumerate() {
            let id = index as ComponentId;
            table.by_type.insert(entry.type_id, id);
            table.by_name.insert(entry.name, id);
            table.infos.push(ComponentInfo {
                id,
                name: entry.name,
                category: entry.category,
                priority: entry.priority,
                fields: entry.fields,
                dependencies: entry.dependencies,
            });
            table.factories.push(entry.factory);
        }
        table
    }
}

#[derive(Default)]
pub struct ComponentTable {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, ComponentId>,
    by_name: HashMap<&'static str, ComponentId>,
    factories: Vec<StoreFactory>,
}

impl ComponentTable {
    pub fn id_of<T: Component>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn id_by_name(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id as usize)
    }

    pub fn infos(&self) -> &[ComponentInfo] {
        &self.infos
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub(crate) fn make_stores(&self) -> Vec<Box<dyn ErasedStore>> {
        self.infos
            .iter()
            .zip(&self.factories)
            .map(|(info, factory)| factory(info.clone()))
            .collect()
    }
}

pub type SharedTable = Arc<ComponentTable>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::World;
    use crate::game::{Motion, PlayerControl, Transform};
    use crate::schedule::StepContext;

    struct Drift;

    impl System for Drift {
        fn name(&self) -> &str {
            "drift"
        }

        fn category(&self) -> Category {
            Category::Motion
        }

        fn priority(&self) -> i32 {
            0
        }

        fn dependencies(&self) -> &[&'static str] {
            &["Motion", "Transform"]
        }

        fn run(&self, _world: &mut World, _ctx: &StepContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn ids_follow_name_order() {
        let mut a = Registry::new();
        a.register_component::<Transform>(Category::Motion, 50).unwrap();
        a.register_component::<Motion>(Category::Motion, 40).unwrap();
        a.register_component::<PlayerControl>(Category::Input, 0).unwrap();

        let mut b = Registry::new();
        b.register_component::<PlayerControl>(Category::Input, 0).unwrap();
        b.register_component::<Transform>(Category::Motion, 50).unwrap();
        b.register_component::<Motion>(Category::Motion, 40).unwrap();

        let (ta, tb) = (a.component_table(), b.component_table());
        assert_eq!(ta.id_of::<Motion>(), tb.id_of::<Motion>());
        assert_eq!(ta.id_of::<Transform>(), tb.id_of::<Transform>());
        assert_eq!(ta.id_by_name("Motion"), Some(0));
    }

    #[test]
    fn registration_is_idempotent_then_closed() {
        let mut registry = Registry::new();
        registry.register_component::<Transform>(Category::Motion, 0).unwrap();
        registry.register_component::<Transform>(Category::Logic, 9).unwrap();
        assert_eq!(registry.component_table().len(), 1);

        registry.seal();
        let err = registry
            .register_component::<Motion>(Category::Motion, 0)
            .unwrap_err();
        assert!(matches!(err, Error::RegistrationClosed { name } if name == "Motion"));
    }

    #[test]
    fn systems_need_their_components() {
        let mut registry = Registry::new();
        registry.register_component::<Motion>(Category::Motion, 0).unwrap();
        let err = registry.register_system(Arc::new(Drift)).unwrap_err();
        assert!(matches!(err, Error::UnknownComponent { name } if name == "Transform"));

        registry.register_component::<Transform>(Category::Motion, 0).unwrap();
        registry.register_system(Arc::new(Drift)).unwrap();
        assert_eq!(registry.systems().len(), 1);
    }
}
