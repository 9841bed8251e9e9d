//! Content-keyed store for compiled GPU objects.
//!
//! Every mesh, shader program and texture that features share lives here exactly
//! once, addressed by a string key derived from its content (a primitive kind, a
//! shader variant, `"<asset path>#mesh<index>"`, ...). Features hold [`Handle`]s into
//! the cache; the number of outstanding handles decides whether an entry is still
//! alive.
//!
//! The canonical pattern is "get; if absent, build and set":
//!
//! ```ignore
//! let mesh = match cache.get::<GpuMesh>(&key) {
//!     Some(mesh) => mesh,
//!     None => cache.set(&key, backend.upload_mesh(&data)?, ResourcePolicy::ReferenceCounted),
//! };
//! ```
//!
//! Misuse (asking for a mesh under a shader key, registering over a key that is
//! still referenced, destroying a referenced entry) is a bug in the caller and
//! panics.

use std::{
    cell::{Ref, RefCell},
    collections::HashMap,
    fmt,
    rc::Rc,
};

use crate::{
    data_structures::{mesh::GpuMesh, texture::GpuTexture},
    pipelines::shader::ShaderProgram,
};

/// Who decides when an entry is destroyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourcePolicy {
    /// Dropped by [`ResourceCache::free`] once no handle references it anymore.
    ReferenceCounted,
    /// Lives until explicitly removed (e.g. the editor grid).
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Mesh,
    Shader,
    Texture,
}

/// A shared, non-owning reference into the cache.
///
/// Cloning a handle increments the entry's reference count. Contents may be
/// swapped in place by [`ResourceCache::replace`], which every holder observes.
pub struct Handle<T>(Rc<RefCell<T>>);

impl<T> Handle<T> {
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Whether both handles point at the same cache slot.
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.0.borrow()).finish()
    }
}

enum Slot {
    Mesh(Rc<RefCell<GpuMesh>>),
    Shader(Rc<RefCell<ShaderProgram>>),
    Texture(Rc<RefCell<GpuTexture>>),
}

impl Slot {
    fn kind(&self) -> ResourceKind {
        match self {
            Slot::Mesh(_) => ResourceKind::Mesh,
            Slot::Shader(_) => ResourceKind::Shader,
            Slot::Texture(_) => ResourceKind::Texture,
        }
    }

    /// Handles held outside the cache.
    fn references(&self) -> usize {
        let strong = match self {
            Slot::Mesh(rc) => Rc::strong_count(rc),
            Slot::Shader(rc) => Rc::strong_count(rc),
            Slot::Texture(rc) => Rc::strong_count(rc),
        };
        strong - 1
    }
}

/// Types that can be stored in the [`ResourceCache`].
pub trait CachedResource: Sized {
    const KIND: ResourceKind;

    #[doc(hidden)]
    fn wrap(value: Rc<RefCell<Self>>) -> Slot;

    #[doc(hidden)]
    fn unwrap(slot: &Slot) -> Option<&Rc<RefCell<Self>>>;
}

impl CachedResource for GpuMesh {
    const KIND: ResourceKind = ResourceKind::Mesh;

    fn wrap(value: Rc<RefCell<Self>>) -> Slot {
        Slot::Mesh(value)
    }

    fn unwrap(slot: &Slot) -> Option<&Rc<RefCell<Self>>> {
        match slot {
            Slot::Mesh(rc) => Some(rc),
            _ => None,
        }
    }
}

impl CachedResource for ShaderProgram {
    const KIND: ResourceKind = ResourceKind::Shader;

    fn wrap(value: Rc<RefCell<Self>>) -> Slot {
        Slot::Shader(value)
    }

    fn unwrap(slot: &Slot) -> Option<&Rc<RefCell<Self>>> {
        match slot {
            Slot::Shader(rc) => Some(rc),
            _ => None,
        }
    }
}

impl CachedResource for GpuTexture {
    const KIND: ResourceKind = ResourceKind::Texture;

    fn wrap(value: Rc<RefCell<Self>>) -> Slot {
        Slot::Texture(value)
    }

    fn unwrap(slot: &Slot) -> Option<&Rc<RefCell<Self>>> {
        match slot {
            Slot::Texture(rc) => Some(rc),
            _ => None,
        }
    }
}

struct Entry {
    slot: Slot,
    policy: ResourcePolicy,
}

#[derive(Default)]
pub struct ResourceCache {
    entries: HashMap<String, Entry>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn typed<T: CachedResource>(key: &str, entry: &Entry) -> Rc<RefCell<T>> {
        match T::unwrap(&entry.slot) {
            Some(rc) => Rc::clone(rc),
            None => panic!(
                "resource {} holds a {:?}, not a {:?}",
                key,
                entry.slot.kind(),
                T::KIND
            ),
        }
    }

    /// Look up an entry. `None` means nothing is registered under `key`.
    ///
    /// # Panics
    ///
    /// If `key` holds a resource of a different kind.
    pub fn get<T: CachedResource>(&self, key: &str) -> Option<Handle<T>> {
        self.entries
            .get(key)
            .map(|entry| Handle(Self::typed::<T>(key, entry)))
    }

    /// Register `value` under `key` and return the first handle to it.
    ///
    /// An entry that is no longer referenced is replaced.
    ///
    /// # Panics
    ///
    /// If `key` is still referenced by a handle. Use [`ResourceCache::get`]
    /// first, or [`ResourceCache::replace`] to swap contents in place.
    pub fn set<T: CachedResource>(
        &mut self,
        key: &str,
        value: T,
        policy: ResourcePolicy,
    ) -> Handle<T> {
        if let Some(previous) = self.entries.get(key) {
            assert!(
                previous.slot.references() == 0,
                "resource {} is still referenced {} time(s) and cannot be registered again",
                key,
                previous.slot.references()
            );
            log::debug!("replacing unreferenced resource {}", key);
        }
        let rc = Rc::new(RefCell::new(value));
        self.entries.insert(
            key.to_string(),
            Entry {
                slot: T::wrap(Rc::clone(&rc)),
                policy,
            },
        );
        Handle(rc)
    }

    /// Swap the contents of a live entry. Every existing handle sees the new value.
    ///
    /// # Panics
    ///
    /// If nothing is registered under `key`, the kind differs, or the entry is
    /// currently borrowed.
    pub fn replace<T: CachedResource>(&mut self, key: &str, value: T) {
        let entry = self
            .entries
            .get(key)
            .unwrap_or_else(|| panic!("cannot replace missing resource {}", key));
        *Self::typed::<T>(key, entry).borrow_mut() = value;
    }

    /// Move an entry to a different key, keeping its slot (and handles) intact.
    pub fn rekey(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        assert!(
            !self.entries.contains_key(to),
            "cannot move resource {} onto existing key {}",
            from,
            to
        );
        let entry = self
            .entries
            .remove(from)
            .unwrap_or_else(|| panic!("cannot move missing resource {}", from));
        self.entries.insert(to.to_string(), entry);
    }

    /// Destroy an entry.
    ///
    /// # Panics
    ///
    /// If the entry is still referenced.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.get(key) {
            None => false,
            Some(entry) => {
                assert!(
                    entry.slot.references() == 0,
                    "resource {} destroyed while still referenced",
                    key
                );
                self.entries.remove(key);
                true
            }
        }
    }

    /// Drop every reference-counted entry nobody references anymore.
    ///
    /// Returns how many entries were destroyed.
    pub fn free(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.policy == ResourcePolicy::Manual || entry.slot.references() > 0
        });
        let freed = before - self.entries.len();
        if freed > 0 {
            log::debug!("freed {} unreferenced resources", freed);
        }
        freed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn kind(&self, key: &str) -> Option<ResourceKind> {
        self.entries.get(key).map(|entry| entry.slot.kind())
    }

    pub fn policy(&self, key: &str) -> Option<ResourcePolicy> {
        self.entries.get(key).map(|entry| entry.policy)
    }

    /// Number of handles held outside the cache.
    pub fn references(&self, key: &str) -> Option<usize> {
        self.entries.get(key).map(|entry| entry.slot.references())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
