//! Concurrent mapping from type key to ordered subscription entries
//!
//! Lock order is always shard, then bucket. No lock of either kind is held
//! while sink or listener code runs; callers complete removed entries after
//! these methods return.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::entry::{Entry, EntryKey};

/// Live entries for one type, in dispatch order.
pub(crate) struct Bucket {
    type_name: &'static str,
    entries: RwLock<BTreeMap<EntryKey, Arc<Entry>>>,
}

impl Bucket {
    fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// First entry ordered strictly after `cursor`, or the first entry overall.
    ///
    /// Walking with this never revisits a key and picks up whatever is live
    /// at each step, so the bucket may change freely between calls.
    pub fn next_after(&self, cursor: Option<&EntryKey>) -> Option<Arc<Entry>> {
        let entries = self.entries.read();
        let next = match cursor {
            None => entries.values().next(),
            Some(key) => entries
                .range((Bound::Excluded(*key), Bound::Unbounded))
                .next()
                .map(|(_, entry)| entry),
        };
        next.cloned()
    }

    /// Remove entries matching `stale` and insert `entry` in one critical section.
    fn replace(&self, entry: Entry, stale: impl Fn(&Entry) -> bool) -> Vec<Arc<Entry>> {
        let mut entries = self.entries.write();
        let removed = extract(&mut entries, stale);
        entries.insert(entry.key(), Arc::new(entry));
        removed
    }

    fn remove_where(&self, predicate: impl Fn(&Entry) -> bool) -> Vec<Arc<Entry>> {
        extract(&mut self.entries.write(), predicate)
    }

    fn drain(&self) -> Vec<Arc<Entry>> {
        std::mem::take(&mut *self.entries.write())
            .into_values()
            .collect()
    }
}

fn extract(
    entries: &mut BTreeMap<EntryKey, Arc<Entry>>,
    predicate: impl Fn(&Entry) -> bool,
) -> Vec<Arc<Entry>> {
    let mut removed = Vec::new();
    entries.retain(|_, entry| {
        if predicate(entry) {
            removed.push(Arc::clone(entry));
            false
        } else {
            true
        }
    });
    removed
}

/// Outcome of a removal pass over one type.
#[derive(Debug)]
pub(crate) struct Removal {
    pub type_name: &'static str,
    pub entries: Vec<Arc<Entry>>,
    /// The type key was dropped from the registry by this pass
    pub reclaimed: bool,
}

/// Type key to bucket mapping.
///
/// A key is present only while its bucket holds at least one entry.
#[derive(Default)]
pub(crate) struct TypeRegistry {
    buckets: DashMap<TypeId, Arc<Bucket>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry`, replacing whatever `stale` selects in the same bucket.
    ///
    /// The bucket is created if absent. Insertion happens while the map entry
    /// is held, so it cannot race with the bucket being reclaimed.
    pub fn insert(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        entry: Entry,
        stale: impl Fn(&Entry) -> bool,
    ) -> Vec<Arc<Entry>> {
        let bucket = self
            .buckets
            .entry(type_id)
            .or_insert_with(|| Arc::new(Bucket::new(type_name)));
        bucket.replace(entry, stale)
    }

    /// Shared handle to a type's bucket; no registry lock outlives this call.
    pub fn bucket(&self, type_id: TypeId) -> Option<Arc<Bucket>> {
        self.buckets
            .get(&type_id)
            .map(|bucket| Arc::clone(bucket.value()))
    }

    /// Remove entries of one type matching `predicate`, reclaiming the bucket
    /// if that left it empty.
    pub fn remove_where(
        &self,
        type_id: TypeId,
        predicate: impl Fn(&Entry) -> bool,
    ) -> Option<Removal> {
        let bucket = self.bucket(type_id)?;
        let entries = bucket.remove_where(predicate);
        let reclaimed = self.reclaim(type_id);
        Some(Removal {
            type_name: bucket.type_name(),
            entries,
            reclaimed,
        })
    }

    /// Drop a type key together with all of its entries.
    pub fn remove_type(&self, type_id: TypeId) -> Option<Removal> {
        let (_, bucket) = self.buckets.remove(&type_id)?;
        Some(Removal {
            type_name: bucket.type_name(),
            entries: bucket.drain(),
            reclaimed: true,
        })
    }

    /// Drop every remaining key, returning the entries that were still live.
    pub fn clear(&self) -> Vec<Arc<Entry>> {
        let mut removed = Vec::new();
        self.buckets.retain(|_, bucket| {
            removed.extend(bucket.drain());
            false
        });
        removed
    }

    fn reclaim(&self, type_id: TypeId) -> bool {
        self.buckets
            .remove_if(&type_id, |_, bucket| bucket.is_empty())
            .is_some()
    }

    /// Snapshot of the type keys currently present.
    pub fn type_ids(&self) -> Vec<TypeId> {
        self.buckets.iter().map(|bucket| *bucket.key()).collect()
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.buckets.contains_key(&type_id)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn type_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn entry_count(&self, type_id: TypeId) -> usize {
        self.bucket(type_id).map_or(0, |bucket| bucket.len())
    }
}
