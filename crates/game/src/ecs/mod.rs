mod component;
mod entity;
mod registry;
mod store;
mod template;
mod world;

pub use component::{
    Category, Component, ComponentId, ComponentInfo, FieldReader, FieldValue, MAX_FIELDS,
    full_mask,
};
pub use entity::{Entity, EntityAllocator};
pub use registry::{ComponentTable, Registry, SharedTable};
pub use store::{ErasedStore, Mut, Store, StoreEntry};
pub use template::Template;
pub use world::{StoreState, World, WorldState};
