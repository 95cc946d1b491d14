use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::simulation::SeededRandom;

use super::component::{Component, ComponentId, ComponentInfo, FieldValue};
use super::entity::{Entity, EntityAllocator};
use super::registry::{ComponentTable, SharedTable};
use super::store::{ErasedStore, Mut, Store, StoreEntry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub name: String,
    pub entries: Vec<StoreEntry>,
}

/// Everything the component side of a snapshot carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    pub allocator: EntityAllocator,
    pub rng: SeededRandom,
    pub stores: Vec<StoreState>,
}

pub struct World {
    table: SharedTable,
    allocator: EntityAllocator,
    stores: Vec<Box<dyn ErasedStore>>,
    rng: SeededRandom,
}

impl World {
    pub fn new(table: SharedTable, seed: u32) -> Self {
        let stores = table.make_stores();
        Self {
            table,
            allocator: EntityAllocator::new(),
            stores,
            rng: SeededRandom::new(seed),
        }
    }

    pub fn table(&self) -> &ComponentTable {
        &self.table
    }

    pub fn shared_table(&self) -> SharedTable {
        Arc::clone(&self.table)
    }

    pub fn spawn(&mut self) -> Entity {
        self.allocator.allocate()
    }

    /// Removes every component of `entity` and frees its id.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.allocator.is_alive(entity) {
            return false;
        }
        for store in &mut self.stores {
            store.remove(entity);
        }
        self.allocator.release(entity)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.allocator.alive()
    }

    pub fn entity_count(&self) -> usize {
        self.allocator.len()
    }

    pub fn rng_mut(&mut self) -> &mut SeededRandom {
        &mut self.rng
    }

    pub fn component_id<T: Component>(&self) -> Result<ComponentId> {
        self.table.id_of::<T>().ok_or_else(|| Error::UnknownComponent {
            name: T::NAME.to_string(),
        })
    }

    pub fn component_id_by_name(&self, name: &str) -> Result<ComponentId> {
        self.table
            .id_by_name(name)
            .ok_or_else(|| Error::UnknownComponent {
                name: name.to_string(),
            })
    }

    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.table.info(id)
    }

    fn store<T: Component>(&self) -> Option<&Store<T>> {
        let id = self.table.id_of::<T>()?;
        self.stores[id as usize].as_any().downcast_ref::<Store<T>>()
    }

    fn store_mut<T: Component>(&mut self) -> Option<&mut Store<T>> {
        let id = self.table.id_of::<T>()?;
        self.stores[id as usize]
            .as_any_mut()
            .downcast_mut::<Store<T>>()
    }

    pub(crate) fn erased(&self, id: ComponentId) -> Option<&dyn ErasedStore> {
        self.stores.get(id as usize).map(|s| s.as_ref())
    }

    pub(crate) fn erased_mut(&mut self, id: ComponentId) -> Option<&mut Box<dyn ErasedStore>> {
        self.stores.get_mut(id as usize)
    }

    pub fn add<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        if !self.is_alive(entity) {
            return Err(Error::EntityNotAlive(entity));
        }
        let store = self.store_mut::<T>().ok_or_else(|| Error::UnknownComponent {
            name: T::NAME.to_string(),
        })?;
        store.insert(entity, value);
        Ok(())
    }

    /// Adds a component by name: defaults first, then the given field overrides.
    pub fn add_with(
        &mut self,
        name: &str,
        entity: Entity,
        overrides: &[(&str, FieldValue)],
    ) -> Result<()> {
        if !self.is_alive(entity) {
            return Err(Error::EntityNotAlive(entity));
        }
        let id = self.component_id_by_name(name)?;
        self.stores[id as usize].add_with(entity, overrides)
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.store::<T>().is_some_and(|s| s.get(entity).is_some())
    }

    pub fn has_id(&self, id: ComponentId, entity: Entity) -> bool {
        self.erased(id).is_some_and(|s| s.has(entity))
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.store::<T>()?.get(entity)
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<Mut<'_, T>> {
        self.store_mut::<T>()?.get_mut(entity)
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        self.store_mut::<T>()?.take(entity)
    }

    pub fn update_field(
        &mut self,
        id: ComponentId,
        entity: Entity,
        field: &str,
        value: &FieldValue,
    ) -> Result<()> {
        let info = self.table.info(id).ok_or_else(|| Error::UnknownComponent {
            name: id.to_string(),
        })?;
        let index = info
            .fields
            .iter()
            .position(|f| *f == field)
            .ok_or_else(|| Error::UnknownField {
                component: info.name.to_string(),
                field: field.to_string(),
            })?;
        self.stores[id as usize].set_field(entity, index, value)
    }

    pub fn dirty_mask<T: Component>(&self, entity: Entity) -> Option<u32> {
        let id = self.table.id_of::<T>()?;
        self.stores[id as usize].mask(entity)
    }

    /// Entities holding every listed kind, ascending by id. Computed on each
    /// call, so additions and removals made earlier in the step are visible.
    pub fn query(&self, ids: &[ComponentId]) -> Vec<Entity> {
        let Some(smallest) = ids
            .iter()
            .filter_map(|id| self.erased(*id))
            .min_by_key(|s| s.len())
        else {
            return Vec::new();
        };
        if ids.iter().any(|id| self.erased(*id).is_none()) {
            return Vec::new();
        }
        let mut found: Vec<Entity> = smallest
            .entities()
            .into_iter()
            .filter(|e| ids.iter().all(|id| self.has_id(*id, *e)))
            .collect();
        found.sort_unstable();
        found
    }

    pub fn query_names(&self, names: &[&str]) -> Result<Vec<Entity>> {
        let ids = names
            .iter()
            .map(|n| self.component_id_by_name(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.query(&ids))
    }

    pub fn with<T: Component>(&self) -> Vec<Entity> {
        match self.table.id_of::<T>() {
            Some(id) => self.query(&[id]),
            None => Vec::new(),
        }
    }

    pub fn with2<A: Component, B: Component>(&self) -> Vec<Entity> {
        match (self.table.id_of::<A>(), self.table.id_of::<B>()) {
            (Some(a), Some(b)) => self.query(&[a, b]),
            _ => Vec::new(),
        }
    }

    pub fn save(&self) -> WorldState {
        WorldState {
            allocator: self.allocator.clone(),
            rng: self.rng.clone(),
            stores: self
                .stores
                .iter()
                .map(|store| StoreState {
                    name: store.info().name.to_string(),
                    entries: store.save(),
                })
                .collect(),
        }
    }

    pub fn load(&mut self, state: &WorldState) -> Result<()> {
        for store in &mut self.stores {
            store.clear();
        }
        for saved in &state.stores {
            let id = self.component_id_by_name(&saved.name)?;
            self.stores[id as usize].load(&saved.entries)?;
        }
        self.allocator = state.allocator.clone();
        self.rng = state.rng.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Category, Registry};
    use crate::game::{Health, Motion, Transform};
    use glam::Vec2;

    fn world() -> World {
        let mut registry = Registry::new();
        registry.register_component::<Transform>(Category::Motion, 50).unwrap();
        registry.register_component::<Motion>(Category::Motion, 40).unwrap();
        registry.register_component::<Health>(Category::Logic, 30).unwrap();
        World::new(Arc::new(registry.component_table()), 7)
    }

    #[test]
    fn query_sees_same_step_changes() {
        let mut world = world();
        let a = world.spawn();
        let b = world.spawn();
        world.add(a, Transform::default()).unwrap();
        world.add(a, Motion::default()).unwrap();
        world.add(b, Transform::default()).unwrap();

        assert_eq!(world.with2::<Transform, Motion>(), vec![a]);
        world.add(b, Motion::default()).unwrap();
        assert_eq!(world.with2::<Transform, Motion>(), vec![a, b]);
        world.remove::<Motion>(a);
        assert_eq!(world.with2::<Transform, Motion>(), vec![b]);
    }

    #[test]
    fn destroy_removes_all_components() {
        let mut world = world();
        let e = world.spawn();
        world.add(e, Transform::default()).unwrap();
        world.add(e, Health { hp: 3, max: 3 }).unwrap();
        assert!(world.destroy(e));
        assert!(!world.has::<Transform>(e));
        assert!(!world.has::<Health>(e));
        assert!(world.add(e, Health::default()).is_err());

        let reused = world.spawn();
        assert_eq!(reused, e);
        assert!(!world.has::<Health>(reused));
    }

    #[test]
    fn add_with_by_name() {
        let mut world = world();
        let e = world.spawn();
        world
            .add_with("Transform", e, &[("position", Vec2::new(3.0, 4.0).into())])
            .unwrap();
        assert_eq!(world.get::<Transform>(e).unwrap().position, Vec2::new(3.0, 4.0));
        assert!(matches!(
            world.add_with("Missing", e, &[]),
            Err(Error::UnknownComponent { .. })
        ));
    }

    #[test]
    fn save_and_load() {
        let mut world = world();
        let e = world.spawn();
        world.add(e, Health { hp: 9, max: 10 }).unwrap();
        world.rng_mut().next_u32();
        let state = world.save();

        let mut other = self::world();
        other.load(&state).unwrap();
        assert_eq!(other.get::<Health>(e), Some(&Health { hp: 9, max: 10 }));
        assert_eq!(other.save(), state);
    }
}
