//! One registration: owner, priority, registration index and sink

use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::ContextRef;
use crate::sink::ErasedSink;

/// Process-wide registration counter; never reused
static NEXT_INDEX: AtomicU64 = AtomicU64::new(1);

/// Position of an entry within its type's bucket.
///
/// Orders by descending priority, then ascending registration index. Indices
/// are unique, so no two keys compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryKey {
    pub priority: i32,
    pub index: u64,
}

impl Ord for EntryKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for EntryKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

pub(crate) struct Entry {
    key: EntryKey,
    context: ContextRef,
    sink: Box<dyn ErasedSink>,
}

impl Entry {
    pub fn new(context: ContextRef, priority: i32, sink: Box<dyn ErasedSink>) -> Self {
        Self {
            key: EntryKey {
                priority,
                index: NEXT_INDEX.fetch_add(1, Ordering::Relaxed),
            },
            context,
            sink,
        }
    }

    pub fn key(&self) -> EntryKey {
        self.key
    }

    pub fn context(&self) -> &ContextRef {
        &self.context
    }

    pub fn push(&self, value: &dyn Any) {
        self.sink.push_any(value);
    }

    pub fn complete(&self) {
        self.sink.complete();
    }

    pub fn is_completed(&self) -> bool {
        self.sink.is_completed()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("priority", &self.key.priority)
            .field("index", &self.key.index)
            .field("context", &self.context)
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::Event;
    use crate::relay::Relay;
    use crate::sink::erase;
    use std::sync::Arc;

    pub(crate) struct Probe;
    impl Event for Probe {}

    pub(crate) fn entry_for<C: Any + Send + Sync>(context: &Arc<C>, priority: i32) -> Entry {
        Entry::new(
            ContextRef::new(context),
            priority,
            erase::<Probe, _>(Relay::<Probe>::new()),
        )
    }

    fn key(priority: i32, index: u64) -> EntryKey {
        EntryKey { priority, index }
    }

    #[test]
    fn test_higher_priority_sorts_first() {
        assert!(key(5, 10) < key(0, 1));
        assert!(key(0, 1) < key(-5, 0));
    }

    #[test]
    fn test_equal_priority_sorts_by_index() {
        assert!(key(1, 3) < key(1, 4));
        assert_eq!(key(1, 3).cmp(&key(1, 3)), CmpOrdering::Equal);
    }

    #[test]
    fn test_indices_increase() {
        let owner = Arc::new(());
        let first = entry_for(&owner, 0);
        let second = entry_for(&owner, 0);

        assert!(second.key().index > first.key().index);
        assert!(first.key() < second.key());
    }

    #[test]
    fn test_complete_reaches_sink() {
        let owner = Arc::new(());
        let entry = entry_for(&owner, 0);

        assert!(!entry.is_completed());
        entry.complete();
        assert!(entry.is_completed());
    }
}
