//! Event bus: subscription, dispatch and teardown

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::BusConfig;
use crate::context::ContextRef;
use crate::entry::{Entry, EntryKey};
use crate::event::Event;
use crate::registry::{Removal, TypeRegistry};
use crate::relay::RelayFactory;
use crate::sink::{self, SinkFactory};

struct Inner<F> {
    registry: TypeRegistry,
    factory: F,
    config: BusConfig,
    /// Number of values posted (for monitoring)
    event_count: AtomicUsize,
}

/// Type-keyed publish/subscribe bus.
///
/// Cloning is cheap and every clone shares the same subscriptions.
pub struct EventBus<F: SinkFactory = RelayFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: SinkFactory> Clone for EventBus<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl EventBus {
    /// Create a bus backed by [`RelayFactory`] with default configuration
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self::with_factory(config, RelayFactory)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: SinkFactory> EventBus<F> {
    /// Create a bus whose subscriptions are backed by sinks from `factory`
    pub fn with_factory(config: BusConfig, factory: F) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: TypeRegistry::new(),
                factory,
                config,
                event_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Subscribe `context` to values of type `T` at the default priority.
    pub fn subscribe<T, C>(&self, context: &Arc<C>) -> F::Stream<T>
    where
        T: Event,
        C: Any + Send + Sync,
    {
        self.subscribe_with_priority(context, self.inner.config.default_priority)
    }

    /// Subscribe `context` to values of type `T`.
    ///
    /// Higher priorities are delivered first; equal priorities in
    /// registration order. A context holds at most one subscription per type:
    /// subscribing again replaces the previous one, whose stream is completed
    /// before this returns. Reclaimed contexts found in the same bucket are
    /// pruned as well.
    ///
    /// The bus keeps only a weak reference to `context`.
    pub fn subscribe_with_priority<T, C>(&self, context: &Arc<C>, priority: i32) -> F::Stream<T>
    where
        T: Event,
        C: Any + Send + Sync,
    {
        let (producer, stream) = self.inner.factory.create::<T>();
        let entry = Entry::new(ContextRef::new(context), priority, sink::erase::<T, _>(producer));
        let key = entry.key();

        let replaced = self.inner.registry.insert(
            TypeId::of::<T>(),
            type_name::<T>(),
            entry,
            |existing| existing.context().is_stale_or(context),
        );

        debug!(
            event = type_name::<T>(),
            priority,
            index = key.index,
            replaced = replaced.len(),
            "Subscribed"
        );

        // Replacement always completes, independent of complete_on_unsubscribe
        for entry in &replaced {
            entry.complete();
        }

        stream
    }

    /// Post `value` to every subscriber of its exact type.
    ///
    /// Returns the number of subscriptions the value was pushed into.
    pub fn post<T: Event>(&self, value: T) -> usize {
        self.dispatch(&value)
    }

    /// Post a borrowed value, leaving it with the caller afterwards, e.g. to
    /// check whether a listener cancelled it.
    ///
    /// Delivery is synchronous on this thread in priority order. Before each
    /// subscription the value's cancellation state is checked; once cancelled
    /// the remaining subscriptions are skipped. Listeners may subscribe,
    /// unsubscribe or post re-entrantly: removed subscriptions that were not
    /// reached yet are not delivered to, and nothing is delivered twice.
    pub fn dispatch<T: Event>(&self, value: &T) -> usize {
        self.inner.event_count.fetch_add(1, Ordering::Relaxed);

        let Some(bucket) = self.inner.registry.bucket(TypeId::of::<T>()) else {
            return 0;
        };

        let mut cursor: Option<EntryKey> = None;
        let mut delivered = 0;
        while let Some(entry) = bucket.next_after(cursor.as_ref()) {
            if value.is_cancelled() {
                trace!(event = type_name::<T>(), delivered, "Dispatch cancelled");
                break;
            }
            cursor = Some(entry.key());
            entry.push(value);
            delivered += 1;
        }
        delivered
    }

    /// Remove every subscription for every type.
    pub fn unsubscribe_all(&self) {
        for type_id in self.inner.registry.type_ids() {
            self.unsubscribe_type_id(type_id);
        }

        let leftover = self.inner.registry.clear();
        if !leftover.is_empty() {
            debug!(removed = leftover.len(), "Cleared late subscriptions");
        }
        self.release(&leftover);
    }

    /// Remove every subscription for `T`.
    pub fn unsubscribe_type<T: Event>(&self) {
        self.unsubscribe_type_id(TypeId::of::<T>());
    }

    /// Remove every subscription for the type identified by `type_id`.
    pub fn unsubscribe_type_id(&self, type_id: TypeId) {
        if let Some(removal) = self.inner.registry.remove_type(type_id) {
            self.finish_removal(removal);
        }
    }

    /// Remove the subscription of `context` for `T`.
    ///
    /// Subscriptions of `T` whose context has been dropped are removed in the
    /// same pass.
    pub fn unsubscribe<T: Event, C: ?Sized>(&self, context: &Arc<C>) {
        self.unsubscribe_from(TypeId::of::<T>(), context);
    }

    /// Remove every subscription owned by `context`, across all types.
    pub fn unsubscribe_context<C: ?Sized>(&self, context: &Arc<C>) {
        for type_id in self.inner.registry.type_ids() {
            self.unsubscribe_from(type_id, context);
        }
    }

    fn unsubscribe_from<C: ?Sized>(&self, type_id: TypeId, context: &Arc<C>) {
        let removal = self
            .inner
            .registry
            .remove_where(type_id, |entry| entry.context().is_stale_or(context));
        if let Some(removal) = removal {
            self.finish_removal(removal);
        }
    }

    fn finish_removal(&self, removal: Removal) {
        if !removal.entries.is_empty() {
            debug!(
                event = removal.type_name,
                removed = removal.entries.len(),
                "Unsubscribed"
            );
        }
        if removal.reclaimed {
            trace!(event = removal.type_name, "Reclaimed empty type");
        }
        self.release(&removal.entries);
    }

    fn release(&self, entries: &[Arc<Entry>]) {
        if !self.inner.config.complete_on_unsubscribe {
            return;
        }
        for entry in entries {
            entry.complete();
        }
    }

    /// True if any type has at least one subscription.
    pub fn has_subscribers(&self) -> bool {
        !self.inner.registry.is_empty()
    }

    /// True if `T` has at least one subscription.
    pub fn has_subscribers_for<T: Event>(&self) -> bool {
        self.has_subscribers_of(TypeId::of::<T>())
    }

    pub fn has_subscribers_of(&self, type_id: TypeId) -> bool {
        self.inner.registry.contains(type_id)
    }

    /// Number of live subscriptions for `T`.
    ///
    /// Subscriptions whose context was dropped count until a removal pass
    /// prunes them.
    pub fn subscriber_count<T: Event>(&self) -> usize {
        self.inner.registry.entry_count(TypeId::of::<T>())
    }

    /// Number of types with at least one subscription
    pub fn type_count(&self) -> usize {
        self.inner.registry.type_count()
    }

    /// Total number of values posted
    pub fn event_count(&self) -> usize {
        self.inner.event_count.load(Ordering::Relaxed)
    }
}

impl<F: SinkFactory> fmt::Debug for EventBus<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("type_count", &self.type_count())
            .field("event_count", &self.event_count())
            .field("config", &self.inner.config)
            .finish()
    }
}
