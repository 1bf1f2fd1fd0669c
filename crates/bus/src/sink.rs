//! Pluggable broadcast sink capability
//!
//! The bus does not care how values reach listeners. It needs a way to
//! create a sink per subscription, push values into it, and complete it.
//! What the caller receives to attach listeners is the factory's `Stream`.

use std::any::Any;
use std::marker::PhantomData;

use crate::event::Event;

/// Producer side of a per-subscription broadcast channel.
pub trait Sink<T>: Send + Sync + 'static {
    /// Hand `value` to every currently attached observer.
    ///
    /// Must be a no-op once completed or when nothing is attached.
    fn push(&self, value: &T);

    /// Signal that no further values will follow and release observers.
    fn complete(&self);

    fn is_completed(&self) -> bool;
}

/// Creates the sink/stream pair backing one subscription.
pub trait SinkFactory: Send + Sync + 'static {
    type Sink<T: Event>: Sink<T>;

    /// Observable surface handed back to the subscriber.
    type Stream<T: Event>;

    fn create<T: Event>(&self) -> (Self::Sink<T>, Self::Stream<T>);
}

/// Sink with its value type erased, as stored in the registry.
pub(crate) trait ErasedSink: Send + Sync {
    fn push_any(&self, value: &dyn Any);
    fn complete(&self);
    fn is_completed(&self) -> bool;
}

struct TypedSink<T, S> {
    sink: S,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Event, S: Sink<T>> ErasedSink for TypedSink<T, S> {
    fn push_any(&self, value: &dyn Any) {
        if let Some(value) = value.downcast_ref::<T>() {
            self.sink.push(value);
        }
    }

    fn complete(&self) {
        self.sink.complete();
    }

    fn is_completed(&self) -> bool {
        self.sink.is_completed()
    }
}

pub(crate) fn erase<T: Event, S: Sink<T>>(sink: S) -> Box<dyn ErasedSink> {
    Box::new(TypedSink {
        sink,
        _marker: PhantomData,
    })
}
