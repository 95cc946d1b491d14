use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

use super::component::FieldValue;
use super::{Entity, World};

/// A named group of components instantiated together onto one entity.
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub name: &'static str,
    parts: Vec<(&'static str, Vec<(&'static str, FieldValue)>)>,
}

impl Template {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            parts: Vec::new(),
        }
    }

    pub fn with(mut self, component: &'static str) -> Self {
        self.parts.push((component, Vec::new()));
        self
    }

    pub fn with_fields(
        mut self,
        component: &'static str,
        overrides: Vec<(&'static str, FieldValue)>,
    ) -> Self {
        self.parts.push((component, overrides));
        self
    }

    /// Override a field on a component already in the template.
    pub fn set(&mut self, component: &str, field: &'static str, value: FieldValue) {
        if let Some((_, overrides)) = self.parts.iter_mut().find(|(c, _)| *c == component) {
            overrides.retain(|(f, _)| *f != field);
            overrides.push((field, value));
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.parts.iter().map(|(c, _)| *c)
    }

    /// Order in which the components must be added so each one follows its
    /// declared dependencies. Dependencies outside the template are assumed
    /// to be present already.
    pub fn add_order(&self, world: &World) -> Result<Vec<&'static str>> {
        let members: BTreeSet<&'static str> = self.components().collect();
        let mut pending: BTreeMap<&'static str, BTreeSet<&'static str>> = BTreeMap::new();
        for name in &members {
            let id = world.component_id_by_name(name)?;
            let deps = world
                .info(id)
                .map(|info| info.dependencies)
                .unwrap_or_default();
            pending.insert(
                *name,
                deps.iter()
                    .copied()
                    .filter(|d| members.contains(d) && d != name)
                    .collect(),
            );
        }

        let mut order = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let ready: Vec<&'static str> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();
            if ready.is_empty() {
                return Err(Error::DependencyCycle {
                    names: pending.keys().map(|n| n.to_string()).collect(),
                });
            }
            for name in ready {
                pending.remove(name);
                for deps in pending.values_mut() {
                    deps.remove(name);
                }
                order.push(name);
            }
        }
        Ok(order)
    }

    pub fn instantiate(&self, world: &mut World, entity: Entity) -> Result<()> {
        for name in self.add_order(world)? {
            let overrides = self
                .parts
                .iter()
                .find(|(c, _)| *c == name)
                .map(|(_, o)| o.as_slice())
                .unwrap_or_default();
            world.add_with(name, entity, overrides)?;
        }
        Ok(())
    }

    pub fn spawn(&self, world: &mut World) -> Result<Entity> {
        let entity = world.spawn();
        if let Err(err) = self.instantiate(world, entity) {
            world.destroy(entity);
            return Err(err);
        }
        Ok(entity)
    }
}
