use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::Entity;

pub const MAX_FIELDS: usize = 32;

pub type ComponentId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Input,
    Logic,
    Motion,
    Effect,
    Presentation,
}

/// One scalar field value. This is the unit of dirty tracking, delta
/// encoding and snapshot storage.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub enum FieldValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    Vec2([f32; 2]),
    Entity(Option<u32>),
    List(Vec<u32>),
}

impl FieldValue {
    /// Bitwise equality, so `-0.0`/`0.0` and NaN payloads count as changes.
    pub fn same_bits(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::F32(a), Self::F32(b)) => a.to_bits() == b.to_bits(),
            (Self::Vec2(a), Self::Vec2(b)) => {
                a[0].to_bits() == b[0].to_bits() && a[1].to_bits() == b[1].to_bits()
            }
            _ => self == other,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::I32(_) => "i32",
            Self::U32(_) => "u32",
            Self::F32(_) => "f32",
            Self::Vec2(_) => "vec2",
            Self::Entity(_) => "entity",
            Self::List(_) => "list",
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::I32(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        Self::F32(value)
    }
}

impl From<Vec2> for FieldValue {
    fn from(value: Vec2) -> Self {
        Self::Vec2(value.to_array())
    }
}

impl From<Option<Entity>> for FieldValue {
    fn from(value: Option<Entity>) -> Self {
        Self::Entity(value.map(Entity::id))
    }
}

impl From<Vec<u32>> for FieldValue {
    fn from(value: Vec<u32>) -> Self {
        Self::List(value)
    }
}

/// Typed extraction used by `Component::set_field` implementations.
pub struct FieldReader<'a> {
    component: &'static str,
    index: usize,
    value: &'a FieldValue,
}

impl<'a> FieldReader<'a> {
    pub fn new(component: &'static str, index: usize, value: &'a FieldValue) -> Self {
        Self {
            component,
            index,
            value,
        }
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::FieldType {
            component: self.component.to_string(),
            index: self.index,
            expected,
        }
    }

    pub fn bool(&self) -> Result<bool> {
        match self.value {
            FieldValue::Bool(v) => Ok(*v),
            _ => Err(self.mismatch("bool")),
        }
    }

    pub fn i32(&self) -> Result<i32> {
        match self.value {
            FieldValue::I32(v) => Ok(*v),
            _ => Err(self.mismatch("i32")),
        }
    }

    pub fn u32(&self) -> Result<u32> {
        match self.value {
            FieldValue::U32(v) => Ok(*v),
            _ => Err(self.mismatch("u32")),
        }
    }

    pub fn f32(&self) -> Result<f32> {
        match self.value {
            FieldValue::F32(v) => Ok(*v),
            _ => Err(self.mismatch("f32")),
        }
    }

    pub fn vec2(&self) -> Result<Vec2> {
        match self.value {
            FieldValue::Vec2(v) => Ok(Vec2::from_array(*v)),
            _ => Err(self.mismatch("vec2")),
        }
    }

    pub fn entity(&self) -> Result<Option<Entity>> {
        match self.value {
            FieldValue::Entity(v) => Ok(v.map(Entity)),
            _ => Err(self.mismatch("entity")),
        }
    }

    pub fn list(&self) -> Result<Vec<u32>> {
        match self.value {
            FieldValue::List(v) => Ok(v.clone()),
            _ => Err(self.mismatch("list")),
        }
    }
}

/// A component kind declared at compile time.
///
/// The field list is fixed: `field(i)` and `set_field(i, _)` must agree on
/// `FIELDS[i]`, and every field must round-trip exactly through
/// [`FieldValue`]. Snapshots and delta packets carry nothing else.
pub trait Component: Clone + Default + 'static {
    const NAME: &'static str;
    const FIELDS: &'static [&'static str];

    /// Component names that must already be present when this one is added
    /// from a template.
    fn dependencies() -> &'static [&'static str] {
        &[]
    }

    fn field(&self, index: usize) -> FieldValue;

    fn set_field(&mut self, index: usize, value: &FieldValue) -> Result<()>;

    fn field_index(name: &str) -> Option<usize> {
        Self::FIELDS.iter().position(|f| *f == name)
    }

    fn full_mask() -> u32 {
        full_mask(Self::FIELDS.len())
    }

    fn fields(&self) -> Vec<FieldValue> {
        (0..Self::FIELDS.len()).map(|i| self.field(i)).collect()
    }
}

pub fn full_mask(width: usize) -> u32 {
    if width >= MAX_FIELDS {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

/// Registration record for one component kind.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub name: &'static str,
    pub category: Category,
    pub priority: i32,
    pub fields: &'static [&'static str],
    pub dependencies: &'static [&'static str],
}
