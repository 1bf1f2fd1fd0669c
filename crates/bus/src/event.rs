//! Postable values and cooperative cancellation

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};

/// A value that can be posted on the bus.
///
/// Routing uses the exact runtime type of the value. A type opts into
/// cancellation by overriding [`Event::is_cancelled`]; the dispatcher checks
/// it before each entry and stops delivering once it reports `true`.
pub trait Event: Any + Send + Sync {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Cancellation flag for event types.
///
/// Listeners only see `&T`, so the flag is interior-mutable.
#[derive(Debug, Default)]
pub struct Cancellation {
    cancelled: AtomicBool,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the owning value as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Clone for Cancellation {
    fn clone(&self) -> Self {
        Self {
            cancelled: AtomicBool::new(self.is_cancelled()),
        }
    }
}
