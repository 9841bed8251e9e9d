//! In-memory configuration tree the declarative builder consumes.
//!
//! A [`ConfigGroup`] is an ordered list of string-keyed values plus ordered,
//! named sub-groups (`feature`, `primitive`, `material`, `child`, ...). Groups
//! are shared through [`ConfigRef`] so the scene graph can keep a live link to
//! the record a node or feature was built from: edits through either side are
//! visible to the other.
//!
//! Defaulting never writes while reading. Resolvers collect missing fields into
//! a [`ConfigPatch`] which the builder applies in one place.

use std::{cell::RefCell, rc::Rc};

use cgmath::{Matrix4, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub type ConfigRef = Rc<RefCell<ConfigGroup>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConfigValue {
    String(String),
    Float(f32),
    Int(i64),
    UInt(u32),
    Bool(bool),
    Vector2([f32; 2]),
    Vector3([f32; 3]),
    Color3([f32; 3]),
    Color4([f32; 4]),
    Matrix4([[f32; 4]; 4]),
}

/// Rust types that map onto exactly one [`ConfigValue`] variant.
pub trait ConfigType: Sized {
    fn from_value(value: &ConfigValue) -> Option<Self>;
    fn into_value(self) -> ConfigValue;
}

macro_rules! config_type {
    ($ty:ty, $variant:ident) => {
        impl ConfigType for $ty {
            fn from_value(value: &ConfigValue) -> Option<Self> {
                match value {
                    ConfigValue::$variant(v) => Some(v.clone().into()),
                    _ => None,
                }
            }

            fn into_value(self) -> ConfigValue {
                ConfigValue::$variant(self.into())
            }
        }
    };
}

config_type!(String, String);
config_type!(f32, Float);
config_type!(i64, Int);
config_type!(u32, UInt);
config_type!(bool, Bool);
config_type!(Vector2<f32>, Vector2);
config_type!(Vector3<f32>, Vector3);
config_type!([f32; 3], Color3);
config_type!([f32; 4], Color4);
config_type!(Matrix4<f32>, Matrix4);

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigGroup {
    name: String,
    values: Vec<(String, ConfigValue)>,
    groups: Vec<ConfigRef>,
}

impl ConfigGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// A new group behind a shared handle.
    pub fn shared(name: &str) -> ConfigRef {
        Rc::new(RefCell::new(Self::new(name)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.values.iter().any(|(k, _)| k == key)
    }

    pub fn raw_value(&self, key: &str) -> Option<&ConfigValue> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Typed read. `None` if the key is missing or holds another type.
    pub fn value<T: ConfigType>(&self, key: &str) -> Option<T> {
        self.raw_value(key).and_then(T::from_value)
    }

    /// Overwrite (keeping its position) or append a value.
    pub fn set_value<T: ConfigType>(&mut self, key: &str, value: T) {
        self.set_raw(key, value.into_value());
    }

    pub fn set_raw(&mut self, key: &str, value: ConfigValue) {
        match self.values.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((key.to_string(), value)),
        }
    }

    pub fn remove_value(&mut self, key: &str) -> bool {
        let before = self.values.len();
        self.values.retain(|(k, _)| k != key);
        before != self.values.len()
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Append a new sub-group and return it.
    pub fn add_group(&mut self, name: &str) -> ConfigRef {
        let group = Self::shared(name);
        self.groups.push(Rc::clone(&group));
        group
    }

    /// Remove a specific sub-group. Returns false if it isn't a direct child.
    pub fn remove_group(&mut self, group: &ConfigRef) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| !Rc::ptr_eq(g, group));
        before != self.groups.len()
    }

    /// All sub-groups called `name`, in order.
    pub fn groups(&self, name: &str) -> Vec<ConfigRef> {
        self.groups
            .iter()
            .filter(|g| g.borrow().name == name)
            .cloned()
            .collect()
    }

    /// The first sub-group called `name`.
    pub fn group(&self, name: &str) -> Option<ConfigRef> {
        self.groups.iter().find(|g| g.borrow().name == name).cloned()
    }

    pub fn group_count(&self, name: &str) -> usize {
        self.groups.iter().filter(|g| g.borrow().name == name).count()
    }
}

/// Writes collected while resolving defaults, applied later in one step.
#[derive(Debug, Default, PartialEq)]
pub struct ConfigPatch {
    writes: Vec<(String, ConfigValue)>,
    groups: Vec<(String, ConfigPatch)>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: ConfigType>(&mut self, key: &str, value: T) {
        self.writes.push((key.to_string(), value.into_value()));
    }

    /// Patch for the first sub-group called `name`, created on apply if missing.
    pub fn group(&mut self, name: &str) -> &mut ConfigPatch {
        let index = match self.groups.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.groups.push((name.to_string(), ConfigPatch::default()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[index].1
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.groups.iter().all(|(_, patch)| patch.is_empty())
    }

    /// Keys written at this level.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.writes.iter().map(|(k, _)| k.as_str())
    }

    pub fn apply(self, group: &mut ConfigGroup) {
        for (key, value) in self.writes {
            group.set_raw(&key, value);
        }
        for (name, patch) in self.groups {
            if patch.is_empty() {
                continue;
            }
            let sub = match group.group(&name) {
                Some(sub) => sub,
                None => group.add_group(&name),
            };
            patch.apply(&mut sub.borrow_mut());
        }
    }
}

/// Read `key` from `record`, or fall back to `default` and queue it in `patch`.
///
/// A present value of the right type is never replaced. A value of the wrong
/// type is treated as missing.
pub fn read_or_default<T: ConfigType + Clone>(
    record: Option<&ConfigGroup>,
    key: &str,
    default: T,
    patch: &mut ConfigPatch,
) -> T {
    if let Some(record) = record {
        if let Some(value) = record.value::<T>(key) {
            return value;
        }
        if record.has_value(key) {
            log::warn!(
                "{}/{} holds a value of the wrong type, resetting it to the default",
                record.name(),
                key
            );
        }
    }
    patch.set(key, default.clone());
    default
}

#[cfg(test)]
mod tests {
    use cgmath::SquareMatrix;

    use super::*;

    #[test]
    fn set_value_keeps_insertion_order() {
        let mut group = ConfigGroup::new("object");
        group.set_value("b", 1.0f32);
        group.set_value("a", String::from("x"));
        group.set_value("b", 2.0f32);
        let keys: Vec<_> = group.values().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(group.value::<f32>("b"), Some(2.0));
        assert_eq!(group.value::<String>("b"), None);
    }

    #[test]
    fn groups_are_shared_and_ordered() {
        let root = ConfigGroup::shared("scene");
        let first = root.borrow_mut().add_group("child");
        root.borrow_mut().add_group("feature");
        let second = root.borrow_mut().add_group("child");
        first.borrow_mut().set_value("name", String::from("first"));
        second.borrow_mut().set_value("name", String::from("second"));

        let names: Vec<String> = root
            .borrow()
            .groups("child")
            .iter()
            .map(|g| g.borrow().value::<String>("name").unwrap())
            .collect();
        assert_eq!(names, ["first", "second"]);

        assert!(root.borrow_mut().remove_group(&first));
        assert_eq!(root.borrow().group_count("child"), 1);
    }

    #[test]
    fn patches_create_missing_groups() {
        let mut record = ConfigGroup::new("feature");
        let mut patch = ConfigPatch::new();
        let kind = read_or_default(None, "type", String::from("cube"), patch.group("primitive"));
        assert_eq!(kind, "cube");
        patch.set("size", Vector3::new(1.0f32, 1.0, 1.0));
        patch.apply(&mut record);

        let primitive = record.group("primitive").unwrap();
        assert_eq!(primitive.borrow().value::<String>("type").as_deref(), Some("cube"));
        assert!(record.has_value("size"));
    }

    #[test]
    fn present_values_are_not_patched() {
        let mut record = ConfigGroup::new("object");
        record.set_value("transformation", Matrix4::<f32>::from_scale(2.0));
        let mut patch = ConfigPatch::new();
        let m = read_or_default(
            Some(&record),
            "transformation",
            Matrix4::<f32>::identity(),
            &mut patch,
        );
        assert_eq!(m, Matrix4::from_scale(2.0));
        assert!(patch.is_empty());
    }

    #[test]
    fn trees_serialize_with_ron() {
        let root = ConfigGroup::shared("scene");
        root.borrow_mut()
            .add_group("child")
            .borrow_mut()
            .set_value("name", String::from("cube"));
        let text = ron::to_string(&*root.borrow()).unwrap();
        let back: ConfigGroup = ron::from_str(&text).unwrap();
        let child = back.group("child").unwrap();
        assert_eq!(child.borrow().value::<String>("name").as_deref(), Some("cube"));
    }
}
