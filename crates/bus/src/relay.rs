//! Default sink: a synchronous, non-buffering broadcast relay
//!
//! A pushed value is handed to every observer attached at that moment, on
//! the pushing thread. Nothing is replayed to late observers. Completion
//! notifies current observers once and turns later pushes into no-ops.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::error::{RecvError, Result};
use crate::event::Event;
use crate::sink::{Sink, SinkFactory};

/// Receives values pushed into a [`Relay`].
///
/// Calls are not serialised across threads. A push racing with completion on
/// another thread may still reach `on_next` while, or just after,
/// `on_complete` runs; on a single thread `on_next` never follows
/// `on_complete`.
pub trait Observer<T>: Send + Sync + 'static {
    fn on_next(&self, value: &T);

    /// Called once when the relay completes while this observer is attached.
    fn on_complete(&self) {}
}

struct FnObserver<F>(F);

impl<T, F> Observer<T> for FnObserver<F>
where
    F: Fn(&T) + Send + Sync + 'static,
{
    fn on_next(&self, value: &T) {
        (self.0)(value)
    }
}

struct Slot<T> {
    id: u64,
    active: Arc<AtomicBool>,
    observer: Box<dyn Observer<T>>,
}

struct Shared<T> {
    /// Copy-on-write so a push only clones the `Arc`, never the list
    observers: RwLock<Arc<Vec<Arc<Slot<T>>>>>,
    completed: AtomicBool,
    next_id: AtomicU64,
}

impl<T> Shared<T> {
    fn detach(&self, id: u64) {
        let mut observers = self.observers.write();
        if observers.iter().any(|slot| slot.id == id) {
            Arc::make_mut(&mut *observers).retain(|slot| slot.id != id);
        }
    }
}

/// Broadcast relay handle; clones share the same observers.
pub struct Relay<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Relay<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Relay<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Relay<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                observers: RwLock::new(Arc::new(Vec::new())),
                completed: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Attach a callback invoked for every value pushed from now on.
    pub fn subscribe<F>(&self, on_next: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_observer(FnObserver(on_next))
    }

    /// Attach an observer that also wants to hear about completion.
    ///
    /// On an already completed relay the observer is told so immediately and
    /// the returned subscription is already disposed.
    pub fn subscribe_observer<O: Observer<T>>(&self, observer: O) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        let slot = Arc::new(Slot {
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
            active: Arc::clone(&active),
            observer: Box::new(observer),
        });

        {
            let mut observers = self.shared.observers.write();
            if !self.shared.completed.load(Ordering::Acquire) {
                Arc::make_mut(&mut *observers).push(Arc::clone(&slot));
                let id = slot.id;
                let shared = Arc::downgrade(&self.shared);
                return Subscription::new(active, detach_from(shared, id));
            }
        }

        active.store(false, Ordering::Release);
        slot.observer.on_complete();
        Subscription::disposed()
    }

    /// Number of observers currently attached.
    pub fn observer_count(&self) -> usize {
        self.shared.observers.read().len()
    }

    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }

    fn emit(&self, value: &T) {
        if self.is_completed() {
            return;
        }

        // `active` is only a fast-path filter, see `Observer`
        let snapshot = Arc::clone(&*self.shared.observers.read());
        for slot in snapshot.iter() {
            if slot.active.load(Ordering::Acquire) {
                slot.observer.on_next(value);
            }
        }
    }

    fn finish(&self) {
        let drained = {
            let mut observers = self.shared.observers.write();
            if self.shared.completed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *observers)
        };

        for slot in drained.iter() {
            if slot.active.swap(false, Ordering::AcqRel) {
                slot.observer.on_complete();
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Relay<T> {
    /// Bridge into async code.
    ///
    /// Values are buffered without bound in the returned receiver, which
    /// stays attached until dropped.
    pub fn receiver(&self) -> Receiver<T> {
        let (sender, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe_observer(ChannelObserver {
            sender: Mutex::new(Some(sender)),
        });
        Receiver {
            rx,
            subscription,
        }
    }
}

impl<T: Send + Sync + 'static> Sink<T> for Relay<T> {
    fn push(&self, value: &T) {
        self.emit(value);
    }

    fn complete(&self) {
        self.finish();
    }

    fn is_completed(&self) -> bool {
        Relay::is_completed(self)
    }
}

impl<T> fmt::Debug for Relay<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("observer_count", &self.shared.observers.read().len())
            .field("completed", &self.shared.completed.load(Ordering::Acquire))
            .finish()
    }
}

fn detach_from<T: Send + Sync + 'static>(
    shared: Weak<Shared<T>>,
    id: u64,
) -> Box<dyn FnOnce() + Send> {
    Box::new(move || {
        if let Some(shared) = shared.upgrade() {
            shared.detach(id);
        }
    })
}

/// Creates a fresh [`Relay`] per subscription; the default for `EventBus`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayFactory;

impl SinkFactory for RelayFactory {
    type Sink<T: Event> = Relay<T>;
    type Stream<T: Event> = Relay<T>;

    fn create<T: Event>(&self) -> (Relay<T>, Relay<T>) {
        let relay = Relay::new();
        (relay.clone(), relay)
    }
}

/// Handle to an attached observer.
///
/// Dropping it detaches the observer, as does an explicit [`dispose`].
///
/// [`dispose`]: Subscription::dispose
#[must_use = "dropping a Subscription detaches its observer"]
pub struct Subscription {
    active: Arc<AtomicBool>,
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(active: Arc<AtomicBool>, detach: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            active,
            detach: Mutex::new(Some(detach)),
        }
    }

    fn disposed() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            detach: Mutex::new(None),
        }
    }

    /// Stop receiving values. Idempotent.
    pub fn dispose(&self) {
        self.active.store(false, Ordering::Release);
        let detach = self.detach.lock().take();
        if let Some(detach) = detach {
            detach();
        }
    }

    /// True once disposed by the caller or released by completion.
    pub fn is_disposed(&self) -> bool {
        !self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct ChannelObserver<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Observer<T> for ChannelObserver<T> {
    fn on_next(&self, value: &T) {
        if let Some(sender) = self.sender.lock().as_ref() {
            // Receiver gone means the subscription is being dropped
            let _ = sender.send(value.clone());
        }
    }

    fn on_complete(&self) {
        self.sender.lock().take();
    }
}

/// Async view of a relay, created by [`Relay::receiver`].
pub struct Receiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    subscription: Subscription,
}

impl<T> Receiver<T> {
    /// Next value, or `None` once the relay completed and the backlog is empty.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<T> {
        self.rx.try_recv().map_err(|err| match err {
            mpsc::error::TryRecvError::Empty => RecvError::Empty,
            mpsc::error::TryRecvError::Disconnected => RecvError::Completed,
        })
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("subscription", &self.subscription)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn collector() -> (Arc<Mutex<Vec<u32>>>, impl Fn(&u32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value: &u32| sink.lock().push(*value))
    }

    #[test]
    fn test_push_reaches_all_observers() {
        let relay = Relay::<u32>::new();
        let (first, on_first) = collector();
        let (second, on_second) = collector();
        let _a = relay.subscribe(on_first);
        let _b = relay.subscribe(on_second);

        relay.push(&1);
        relay.push(&2);

        assert_eq!(*first.lock(), vec![1, 2]);
        assert_eq!(*second.lock(), vec![1, 2]);
        assert_eq!(relay.observer_count(), 2);
    }

    #[test]
    fn test_push_without_observers_is_noop() {
        let relay = Relay::<u32>::new();
        relay.push(&1);
        assert_eq!(relay.observer_count(), 0);
    }

    #[test]
    fn test_no_replay_for_late_observers() {
        let relay = Relay::<u32>::new();
        relay.push(&1);

        let (seen, on_next) = collector();
        let _sub = relay.subscribe(on_next);
        relay.push(&2);

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_dispose_stops_delivery() {
        let relay = Relay::<u32>::new();
        let (seen, on_next) = collector();
        let sub = relay.subscribe(on_next);

        relay.push(&1);
        sub.dispose();
        relay.push(&2);

        assert!(sub.is_disposed());
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(relay.observer_count(), 0);
    }

    #[test]
    fn test_drop_detaches() {
        let relay = Relay::<u32>::new();
        let (seen, on_next) = collector();
        drop(relay.subscribe(on_next));

        relay.push(&1);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_complete_notifies_once_and_blocks_pushes() {
        struct Counting {
            values: Arc<AtomicUsize>,
            completions: Arc<AtomicUsize>,
        }

        impl Observer<u32> for Counting {
            fn on_next(&self, _value: &u32) {
                self.values.fetch_add(1, Ordering::SeqCst);
            }

            fn on_complete(&self) {
                self.completions.fetch_add(1, Ordering::SeqCst);
            }
        }

        let values = Arc::new(AtomicUsize::new(0));
        let completions = Arc::new(AtomicUsize::new(0));
        let relay = Relay::<u32>::new();
        let sub = relay.subscribe_observer(Counting {
            values: Arc::clone(&values),
            completions: Arc::clone(&completions),
        });

        relay.push(&1);
        relay.complete();
        relay.complete();
        relay.push(&2);

        assert!(relay.is_completed());
        assert!(sub.is_disposed());
        assert_eq!(values.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_after_complete_is_disposed() {
        struct Done(Arc<AtomicBool>);

        impl Observer<u32> for Done {
            fn on_next(&self, _value: &u32) {}

            fn on_complete(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let relay = Relay::<u32>::new();
        relay.complete();

        let done = Arc::new(AtomicBool::new(false));
        let sub = relay.subscribe_observer(Done(Arc::clone(&done)));

        assert!(sub.is_disposed());
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(relay.observer_count(), 0);
    }

    #[test]
    fn test_observer_can_dispose_itself_mid_push() {
        let relay = Relay::<u32>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let sub = {
            let slot = Arc::clone(&slot);
            let count = Arc::clone(&count);
            relay.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = slot.lock().take() {
                    sub.dispose();
                }
            })
        };
        *slot.lock() = Some(sub);

        relay.push(&1);
        relay.push(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(relay.observer_count(), 0);
    }

    #[test]
    fn test_subscription_outlives_relay() {
        let relay = Relay::<u32>::new();
        let (_seen, on_next) = collector();
        let sub = relay.subscribe(on_next);
        drop(relay);

        sub.dispose();
        assert!(sub.is_disposed());
    }

    #[tokio::test]
    async fn test_receiver_gets_values_then_none() {
        let relay = Relay::<u32>::new();
        let mut rx = relay.receiver();

        relay.push(&1);
        relay.push(&2);
        relay.complete();

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_receiver_try_recv() {
        let relay = Relay::<u32>::new();
        let mut rx = relay.receiver();

        assert_eq!(rx.try_recv(), Err(RecvError::Empty));
        relay.push(&3);
        assert_eq!(rx.try_recv(), Ok(3));

        relay.complete();
        assert_eq!(rx.try_recv(), Err(RecvError::Completed));
    }

    #[tokio::test]
    async fn test_dropping_receiver_detaches() {
        let relay = Relay::<u32>::new();
        let rx = relay.receiver();
        assert_eq!(relay.observer_count(), 1);

        drop(rx);
        assert_eq!(relay.observer_count(), 0);
        relay.push(&1);
    }

    #[test]
    fn test_factory_pairs_share_observers() {
        #[derive(Clone)]
        struct Tick;
        impl Event for Tick {}

        let (sink, stream) = RelayFactory.create::<Tick>();
        let count = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let count = Arc::clone(&count);
            stream.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        sink.push(&Tick);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        Sink::complete(&sink);
        assert!(stream.is_completed());
    }
}
