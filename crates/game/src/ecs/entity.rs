use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(pub u32);

impl Entity {
    pub fn id(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out entity ids, reusing destroyed ones most-recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAllocator {
    next_id: u32,
    free: Vec<u32>,
    alive: Vec<bool>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> Entity {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.alive.push(false);
                id
            }
        };
        self.alive[id as usize] = true;
        Entity(id)
    }

    pub fn release(&mut self, entity: Entity) -> bool {
        match self.alive.get_mut(entity.index()) {
            Some(alive) if *alive => {
                *alive = false;
                self.free.push(entity.0);
                true
            }
            _ => false,
        }
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.get(entity.index()).copied().unwrap_or(false)
    }

    pub fn alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(id, _)| Entity(id as u32))
    }

    pub fn len(&self) -> usize {
        self.alive.iter().filter(|a| **a).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_released_ids() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        assert_eq!((a.0, b.0, c.0), (0, 1, 2));

        assert!(alloc.release(b));
        assert!(!alloc.release(b));
        assert!(!alloc.is_alive(b));

        let d = alloc.allocate();
        assert_eq!(d, b);
        assert_eq!(alloc.allocate().0, 3);
        assert_eq!(alloc.len(), 4);
    }

    #[test]
    fn alive_iterates_in_id_order() {
        let mut alloc = EntityAllocator::new();
        for _ in 0..4 {
            alloc.allocate();
        }
        alloc.release(Entity(1));
        let ids: Vec<u32> = alloc.alive().map(Entity::id).collect();
        assert_eq!(ids, vec![0, 2, 3]);
    }
}
