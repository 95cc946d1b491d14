use std::any::Any;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::component::{Component, ComponentInfo, FieldValue};
use super::Entity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub entity: u32,
    pub fields: Vec<FieldValue>,
}

/// Dense storage for one component kind, indexed through a sparse entity table.
#[derive(Debug)]
pub struct Store<T: Component> {
    info: ComponentInfo,
    sparse: Vec<Option<u32>>,
    dense: Vec<Entity>,
    data: Vec<T>,
    masks: Vec<u32>,
}

impl<T: Component> Store<T> {
    pub fn new(info: ComponentInfo) -> Self {
        Self {
            info,
            sparse: Vec::new(),
            dense: Vec::new(),
            data: Vec::new(),
            masks: Vec::new(),
        }
    }

    fn slot(&self, entity: Entity) -> Option<usize> {
        self.sparse
            .get(entity.index())
            .copied()
            .flatten()
            .map(|s| s as usize)
    }

    pub fn insert(&mut self, entity: Entity, value: T) {
        if let Some(slot) = self.slot(entity) {
            self.data[slot] = value;
            self.masks[slot] = T::full_mask();
            return;
        }
        if self.sparse.len() <= entity.index() {
            self.sparse.resize(entity.index() + 1, None);
        }
        self.sparse[entity.index()] = Some(self.dense.len() as u32);
        self.dense.push(entity);
        self.data.push(value);
        self.masks.push(T::full_mask());
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.slot(entity).map(|slot| &self.data[slot])
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<Mut<'_, T>> {
        let slot = self.slot(entity)?;
        let before = self.data[slot].clone();
        Some(Mut {
            value: &mut self.data[slot],
            mask: &mut self.masks[slot],
            before: Some(before),
        })
    }

    /// Mutable access that bypasses change detection. Used when applying
    /// remote state.
    pub fn get_mut_untracked(&mut self, entity: Entity) -> Option<&mut T> {
        let slot = self.slot(entity)?;
        Some(&mut self.data[slot])
    }

    pub fn take(&mut self, entity: Entity) -> Option<T> {
        let slot = self.slot(entity)?;
        self.sparse[entity.index()] = None;
        let last = self.dense.len() - 1;
        if slot != last {
            let moved = self.dense[last];
            self.sparse[moved.index()] = Some(slot as u32);
        }
        self.dense.swap_remove(slot);
        self.masks.swap_remove(slot);
        Some(self.data.swap_remove(slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.dense.iter().copied().zip(self.data.iter())
    }
}

/// Change-detecting mutable handle. On drop, every field whose bits changed
/// is flagged in the entity's dirty mask.
pub struct Mut<'a, T: Component> {
    value: &'a mut T,
    mask: &'a mut u32,
    before: Option<T>,
}

impl<T: Component> Deref for Mut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T: Component> DerefMut for Mut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<T: Component> Drop for Mut<'_, T> {
    fn drop(&mut self) {
        let Some(before) = self.before.take() else {
            return;
        };
        for index in 0..T::FIELDS.len() {
            if !before.field(index).same_bits(&self.value.field(index)) {
                *self.mask |= 1 << index;
            }
        }
    }
}

/// Type-erased view of a [`Store`], used where the component kind is only
/// known by id or name.
pub trait ErasedStore: Any {
    fn info(&self) -> &ComponentInfo;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn has(&self, entity: Entity) -> bool;
    fn remove(&mut self, entity: Entity) -> bool;
    fn entities(&self) -> Vec<Entity>;
    fn len(&self) -> usize;
    fn add_with(&mut self, entity: Entity, overrides: &[(&str, FieldValue)]) -> Result<()>;
    fn fields_of(&self, entity: Entity) -> Option<Vec<FieldValue>>;
    fn set_field(&mut self, entity: Entity, index: usize, value: &FieldValue) -> Result<()>;
    fn mask(&self, entity: Entity) -> Option<u32>;
    /// Returns `(mask, values of the set bits in field order)` and clears the mask.
    fn take_dirty(&mut self, entity: Entity) -> Option<(u32, Vec<FieldValue>)>;
    fn apply_masked(&mut self, entity: Entity, mask: u32, values: &[FieldValue]) -> Result<()>;
    fn save(&self) -> Vec<StoreEntry>;
    fn load(&mut self, entries: &[StoreEntry]) -> Result<()>;
    fn clear(&mut self);
}

impl<T: Component> ErasedStore for Store<T> {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn has(&self, entity: Entity) -> bool {
        self.slot(entity).is_some()
    }

    fn remove(&mut self, entity: Entity) -> bool {
        self.take(entity).is_some()
    }

    fn entities(&self) -> Vec<Entity> {
        self.dense.clone()
    }

    fn len(&self) -> usize {
        self.dense.len()
    }

    fn add_with(&mut self, entity: Entity, overrides: &[(&str, FieldValue)]) -> Result<()> {
        let mut value = T::default();
        for (name, field) in overrides {
            let index = T::field_index(name).ok_or_else(|| Error::UnknownField {
                component: T::NAME.to_string(),
                field: (*name).to_string(),
            })?;
            value.set_field(index, field)?;
        }
        self.insert(entity, value);
        Ok(())
    }

    fn fields_of(&self, entity: Entity) -> Option<Vec<FieldValue>> {
        self.get(entity).map(T::fields)
    }

    fn set_field(&mut self, entity: Entity, index: usize, value: &FieldValue) -> Result<()> {
        let slot = self.slot(entity).ok_or(Error::EntityNotAlive(entity))?;
        if index >= T::FIELDS.len() {
            return Err(Error::UnknownField {
                component: T::NAME.to_string(),
                field: index.to_string(),
            });
        }
        let changed = !self.data[slot].field(index).same_bits(value);
        self.data[slot].set_field(index, value)?;
        if changed {
            self.masks[slot] |= 1 << index;
        }
        Ok(())
    }

    fn mask(&self, entity: Entity) -> Option<u32> {
        self.slot(entity).map(|slot| self.masks[slot])
    }

    fn take_dirty(&mut self, entity: Entity) -> Option<(u32, Vec<FieldValue>)> {
        let slot = self.slot(entity)?;
        let mask = self.masks[slot];
        if mask == 0 {
            return None;
        }
        let values = (0..T::FIELDS.len())
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| self.data[slot].field(i))
            .collect();
        self.masks[slot] = 0;
        Some((mask, values))
    }

    fn apply_masked(&mut self, entity: Entity, mask: u32, values: &[FieldValue]) -> Result<()> {
        if self.slot(entity).is_none() {
            self.insert(entity, T::default());
            if let Some(slot) = self.slot(entity) {
                self.masks[slot] = 0;
            }
        }
        let Some(value) = self.get_mut_untracked(entity) else {
            return Err(Error::EntityNotAlive(entity));
        };
        let mut values = values.iter();
        for index in 0..T::FIELDS.len() {
            if mask & (1 << index) == 0 {
                continue;
            }
            let field = values
                .next()
                .ok_or_else(|| Error::Codec(format!("{}: record shorter than mask", T::NAME)))?;
            value.set_field(index, field)?;
        }
        if values.next().is_some() {
            return Err(Error::Codec(format!("{}: record longer than mask", T::NAME)));
        }
        Ok(())
    }

    fn save(&self) -> Vec<StoreEntry> {
        let mut entries: Vec<StoreEntry> = self
            .iter()
            .map(|(entity, value)| StoreEntry {
                entity: entity.id(),
                fields: value.fields(),
            })
            .collect();
        entries.sort_by_key(|e| e.entity);
        entries
    }

    fn load(&mut self, entries: &[StoreEntry]) -> Result<()> {
        self.clear();
        for entry in entries {
            let mut value = T::default();
            if entry.fields.len() != T::FIELDS.len() {
                return Err(Error::Codec(format!(
                    "{}: expected {} fields, got {}",
                    T::NAME,
                    T::FIELDS.len(),
                    entry.fields.len()
                )));
            }
            for (index, field) in entry.fields.iter().enumerate() {
                value.set_field(index, field)?;
            }
            let entity = Entity(entry.entity);
            self.insert(entity, value);
            if let Some(slot) = self.slot(entity) {
                self.masks[slot] = 0;
            }
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.sparse.clear();
        self.dense.clear();
        self.data.clear();
        self.masks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{Category, FieldReader};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        value: i32,
        step: i32,
    }

    impl Component for Counter {
        const NAME: &'static str = "Counter";
        const FIELDS: &'static [&'static str] = &["value", "step"];

        fn field(&self, index: usize) -> FieldValue {
            match index {
                0 => self.value.into(),
                _ => self.step.into(),
            }
        }

        fn set_field(&mut self, index: usize, value: &FieldValue) -> Result<()> {
            let reader = FieldReader::new(Self::NAME, index, value);
            match index {
                0 => self.value = reader.i32()?,
                _ => self.step = reader.i32()?,
            }
            Ok(())
        }
    }

    fn store() -> Store<Counter> {
        Store::new(ComponentInfo {
            id: 0,
            name: Counter::NAME,
            category: Category::Logic,
            priority: 0,
            fields: Counter::FIELDS,
            dependencies: &[],
        })
    }

    #[test]
    fn swap_remove_keeps_index() {
        let mut store = store();
        for id in 0..4 {
            store.insert(Entity(id), Counter { value: id as i32, step: 0 });
        }
        assert!(store.remove(Entity(1)));
        assert!(!store.has(Entity(1)));
        assert_eq!(store.get(Entity(3)).unwrap().value, 3);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn guard_marks_only_changed_fields() {
        let mut store = store();
        store.insert(Entity(0), Counter::default());
        store.take_dirty(Entity(0));
        assert_eq!(store.mask(Entity(0)), Some(0));

        store.get_mut(Entity(0)).unwrap().step = 4;
        assert_eq!(store.mask(Entity(0)), Some(0b10));

        {
            let mut c = store.get_mut(Entity(0)).unwrap();
            (*c).value = 0;
        }
        assert_eq!(store.mask(Entity(0)), Some(0b10));
    }

    #[test]
    fn overrides_apply_over_defaults() {
        let mut store = store();
        store
            .add_with(Entity(2), &[("step", FieldValue::I32(7))])
            .unwrap();
        assert_eq!(store.get(Entity(2)), Some(&Counter { value: 0, step: 7 }));
        assert!(store.add_with(Entity(3), &[("nope", FieldValue::I32(1))]).is_err());
    }

    #[test]
    fn save_load_sorted() {
        let mut store = store();
        store.insert(Entity(5), Counter { value: 5, step: 1 });
        store.insert(Entity(1), Counter { value: 1, step: 1 });
        let saved = store.save();
        assert_eq!(saved[0].entity, 1);

        let mut other = self::store();
        other.load(&saved).unwrap();
        assert_eq!(other.get(Entity(5)).unwrap().value, 5);
        assert_eq!(other.mask(Entity(5)), Some(0));
    }
}
