use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::ecs::{ComponentId, Entity, FieldValue, World};
use crate::error::{Error, Result};

/// Changed fields of one component on one entity. `values` holds the fields
/// whose bit is set in `mask`, in field order.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct DeltaRecord {
    pub entity: u32,
    pub component: u16,
    pub mask: u32,
    pub values: Vec<FieldValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct DeltaPacket {
    pub frame: u32,
    pub records: Vec<DeltaRecord>,
}

impl DeltaPacket {
    /// Gathers every dirty field of `entities` and clears their masks.
    /// Entities with nothing dirty contribute no record.
    pub fn collect(world: &mut World, entities: &[Entity], frame: u32) -> Self {
        let mut sorted = entities.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let kinds = world.table().len() as ComponentId;
        let mut records = Vec::new();
        for entity in sorted {
            for component in 0..kinds {
                let Some(store) = world.erased_mut(component) else {
                    continue;
                };
                if let Some((mask, values)) = store.take_dirty(entity) {
                    records.push(DeltaRecord {
                        entity: entity.id(),
                        component,
                        mask,
                        values,
                    });
                }
            }
        }
        Self { frame, records }
    }

    /// Writes the carried values without marking anything dirty on `world`.
    pub fn apply(&self, world: &mut World) -> Result<()> {
        for record in &self.records {
            let entity = Entity(record.entity);
            if !world.is_alive(entity) {
                return Err(Error::EntityNotAlive(entity));
            }
            let store = world
                .erased_mut(record.component)
                .ok_or_else(|| Error::UnknownComponent {
                    name: record.component.to_string(),
                })?;
            store.apply_masked(entity, record.mask, &record.values)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(Error::codec)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(Error::codec)
    }
}

pub fn encode(world: &mut World, entities: &[Entity], frame: u32) -> Result<Vec<u8>> {
    DeltaPacket::collect(world, entities, frame).to_bytes()
}

pub fn decode(world: &mut World, data: &[u8]) -> Result<DeltaPacket> {
    let packet = DeltaPacket::from_bytes(data)?;
    packet.apply(world)?;
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec2;
    use proptest::prelude::*;

    use super::*;
    use crate::ecs::{Category, Registry, SharedTable};
    use crate::game::{Follow, Health, PlayerControl, Transform};

    fn table() -> SharedTable {
        let mut registry = Registry::new();
        registry.register_component::<Transform>(Category::Motion, 0).unwrap();
        registry.register_component::<Health>(Category::Logic, 0).unwrap();
        registry.register_component::<Follow>(Category::Logic, 0).unwrap();
        registry.register_component::<PlayerControl>(Category::Input, 0).unwrap();
        Arc::new(registry.component_table())
    }

    /// Source and mirror with identical entities and clean masks.
    fn pair(count: u32) -> (World, World) {
        let table = table();
        let mut source = World::new(Arc::clone(&table), 1);
        let mut mirror = World::new(table, 1);
        for world in [&mut source, &mut mirror] {
            for _ in 0..count {
                let e = world.spawn();
                world.add(e, Transform::default()).unwrap();
                world.add(e, Health::default()).unwrap();
                world.add(e, Follow::default()).unwrap();
                world.add(e, PlayerControl::default()).unwrap();
            }
        }
        let all: Vec<Entity> = source.entities().collect();
        DeltaPacket::collect(&mut source, &all, 0);
        DeltaPacket::collect(&mut mirror, &all, 0);
        (source, mirror)
    }

    #[derive(Debug, Clone)]
    enum Change {
        Position(u32, f32, f32),
        Hp(u32, i32),
        Target(u32, Option<u32>),
        Keys(u32, u32),
        Events(u32, Vec<u32>),
    }

    fn change(count: u32) -> impl Strategy<Value = Change> {
        prop_oneof![
            (0..count, -100.0f32..100.0, -100.0f32..100.0)
                .prop_map(|(e, x, y)| Change::Position(e, x, y)),
            (0..count, -50i32..50).prop_map(|(e, hp)| Change::Hp(e, hp)),
            (0..count, proptest::option::of(0..count)).prop_map(|(e, t)| Change::Target(e, t)),
            (0..count, any::<u32>()).prop_map(|(e, k)| Change::Keys(e, k)),
            (0..count, proptest::collection::vec(0u32..8, 0..4))
                .prop_map(|(e, ev)| Change::Events(e, ev)),
        ]
    }

    fn apply_change(world: &mut World, change: &Change) -> Entity {
        match change {
            Change::Position(e, x, y) => {
                world.get_mut::<Transform>(Entity(*e)).unwrap().position = Vec2::new(*x, *y);
                Entity(*e)
            }
            Change::Hp(e, hp) => {
                world.get_mut::<Health>(Entity(*e)).unwrap().hp = *hp;
                Entity(*e)
            }
            Change::Target(e, t) => {
                world.get_mut::<Follow>(Entity(*e)).unwrap().target = t.map(Entity);
                Entity(*e)
            }
            Change::Keys(e, k) => {
                world.get_mut::<PlayerControl>(Entity(*e)).unwrap().keys = *k;
                Entity(*e)
            }
            Change::Events(e, ev) => {
                world.get_mut::<PlayerControl>(Entity(*e)).unwrap().events = ev.clone();
                Entity(*e)
            }
        }
    }

    fn fields(world: &World, entity: Entity) -> Vec<Option<Vec<FieldValue>>> {
        let kinds = world.table().len() as ComponentId;
        (0..kinds)
            .map(|id| world.erased(id).and_then(|s| s.fields_of(entity)))
            .collect()
    }

    fn same_bits(a: &[Option<Vec<FieldValue>>], b: &[Option<Vec<FieldValue>>]) -> bool {
        a.len() == b.len()
            && a.iter().zip(b).all(|(x, y)| match (x, y) {
                (Some(x), Some(y)) => {
                    x.len() == y.len() && x.iter().zip(y).all(|(f, g)| f.same_bits(g))
                }
                (None, None) => true,
                _ => false,
            })
    }

    proptest! {
        #[test]
        fn decode_reproduces_dirty_fields(changes in proptest::collection::vec(change(6), 0..24)) {
            let (mut source, mut mirror) = pair(6);
            for c in &changes {
                apply_change(&mut source, c);
            }
            let all: Vec<Entity> = source.entities().collect();
            let bytes = encode(&mut source, &all, 3).unwrap();
            let packet = decode(&mut mirror, &bytes).unwrap();
            prop_assert_eq!(packet.frame, 3);

            for entity in &all {
                prop_assert_eq!(fields(&source, *entity), fields(&mirror, *entity));
            }
            // decoding marks nothing dirty on the receiving side
            let again = DeltaPacket::collect(&mut mirror, &all, 4);
            prop_assert!(again.records.is_empty());
        }

        #[test]
        fn clean_entities_never_encoded(changes in proptest::collection::vec(change(6), 0..24)) {
            let (mut source, _) = pair(6);
            let mut touched = std::collections::BTreeSet::new();
            for c in &changes {
                let before = fields(&source, match c {
                    Change::Position(e, ..) | Change::Hp(e, _) | Change::Target(e, _)
                    | Change::Keys(e, _) | Change::Events(e, _) => Entity(*e),
                });
                let entity = apply_change(&mut source, c);
                if !same_bits(&fields(&source, entity), &before) {
                    touched.insert(entity.id());
                }
            }
            let all: Vec<Entity> = source.entities().collect();
            let packet = DeltaPacket::collect(&mut source, &all, 0);
            for record in &packet.records {
                prop_assert!(record.mask != 0);
                prop_assert!(touched.contains(&record.entity));
                prop_assert_eq!(record.values.len(), record.mask.count_ones() as usize);
            }
            let second = DeltaPacket::collect(&mut source, &all, 1);
            prop_assert!(second.records.is_empty());
        }
    }

    #[test]
    fn untouched_fields_survive_decode() {
        let (mut source, mut mirror) = pair(2);
        mirror.get_mut::<Health>(Entity(1)).unwrap().max = 99;
        source.get_mut::<Health>(Entity(1)).unwrap().hp = 3;

        let bytes = encode(&mut source, &[Entity(0), Entity(1)], 0).unwrap();
        decode(&mut mirror, &bytes).unwrap();
        assert_eq!(mirror.get::<Health>(Entity(1)), Some(&Health { hp: 3, max: 99 }));
    }

    #[test]
    fn decode_rejects_unknown_entities() {
        let (mut source, _) = pair(3);
        let table = source.shared_table();
        let mut empty = World::new(table, 1);
        source.get_mut::<Health>(Entity(2)).unwrap().hp = 0;
        let bytes = encode(&mut source, &[Entity(2)], 0).unwrap();
        assert!(matches!(
            decode(&mut empty, &bytes),
            Err(Error::EntityNotAlive(Entity(2)))
        ));
    }
}
