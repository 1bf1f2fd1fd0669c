//! Type-keyed publish/subscribe event bus
//!
//! Producers post typed values; listeners register interest in a value's
//! runtime type, scoped to an owning context, with an explicit priority.
//! Delivery is synchronous on the posting thread, ordered by priority and
//! then by registration order, and may be cut short by a cancellable value.

mod bus;
mod config;
mod context;
mod entry;
mod error;
mod event;
mod registry;
mod relay;
mod sink;

pub use bus::EventBus;
pub use config::{BusConfig, DEFAULT_PRIORITY};
pub use error::{RecvError, Result};
pub use event::{Cancellation, Event};
pub use relay::{Observer, Receiver, Relay, RelayFactory, Subscription};
pub use sink::{Sink, SinkFactory};
