//! Object Cache
//!
//! Name-keyed local copy of one cluster-scoped resource kind. Reads fail with
//! `CacheNotSynced` until the first full list has been stored, so a cold cache
//! is never mistaken for an empty one.

use crate::domain::ports::Lister;
use crate::error::{Error, Result};
use kube::{Resource, ResourceExt};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of replacing the cache contents with a fresh list
#[derive(Debug)]
pub struct Replaced<K> {
    /// Objects in the new list, paired with the state they replaced
    pub applied: Vec<(Arc<K>, Option<Arc<K>>)>,
    /// Objects that were cached but are missing from the new list
    pub removed: Vec<Arc<K>>,
}

/// Local cache of one resource kind
#[derive(Debug)]
pub struct ObjectCache<K> {
    kind: String,
    objects: RwLock<BTreeMap<String, Arc<K>>>,
    synced: AtomicBool,
}

impl<K> ObjectCache<K>
where
    K: Resource<DynamicType = ()>,
{
    /// Create an empty, unsynced cache
    pub fn new() -> Self {
        Self {
            kind: K::kind(&()).into_owned(),
            objects: RwLock::new(BTreeMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    /// Create a synced cache holding `objects`
    pub fn with_objects(objects: impl IntoIterator<Item = K>) -> Self {
        let cache = Self::new();
        cache.replace(objects.into_iter().collect());
        cache
    }

    /// Resource kind held by this cache
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Insert or replace an object, returning the stored value and the previous one
    pub fn apply(&self, obj: K) -> (Arc<K>, Option<Arc<K>>) {
        let name = obj.name_any();
        let obj = Arc::new(obj);
        let previous = self.objects.write().insert(name, obj.clone());
        (obj, previous)
    }

    /// Remove an object by name
    pub fn remove(&self, name: &str) -> Option<Arc<K>> {
        self.objects.write().remove(name)
    }

    /// Replace the whole contents with a fresh list and mark the cache synced
    pub fn replace(&self, objects: Vec<K>) -> Replaced<K> {
        let mut fresh = BTreeMap::new();
        for obj in objects {
            fresh.insert(obj.name_any(), Arc::new(obj));
        }

        let mut guard = self.objects.write();
        let mut previous = std::mem::take(&mut *guard);

        let applied = fresh
            .iter()
            .map(|(name, obj)| (obj.clone(), previous.remove(name)))
            .collect();
        let removed = previous.into_values().collect();

        *guard = fresh;
        drop(guard);

        self.mark_synced();
        Replaced { applied, removed }
    }

    /// Look up an object by name, synced or not
    pub fn peek(&self, name: &str) -> Option<Arc<K>> {
        self.objects.read().get(name).cloned()
    }

    /// Every cached object, synced or not
    pub fn snapshot(&self) -> Vec<Arc<K>> {
        self.objects.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Whether the first full list has been stored
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    fn ensure_synced(&self) -> Result<()> {
        if self.is_synced() {
            Ok(())
        } else {
            Err(Error::CacheNotSynced {
                kind: self.kind.clone(),
            })
        }
    }
}

impl<K> Default for ObjectCache<K>
where
    K: Resource<DynamicType = ()>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Lister<K> for ObjectCache<K>
where
    K: Resource<DynamicType = ()> + Send + Sync,
{
    fn get(&self, name: &str) -> Result<Option<Arc<K>>> {
        self.ensure_synced()?;
        Ok(self.objects.read().get(name).cloned())
    }

    fn list(&self) -> Result<Vec<Arc<K>>> {
        self.ensure_synced()?;
        Ok(self.snapshot())
    }

    fn has_synced(&self) -> bool {
        self.is_synced()
    }
}
