//! Weak, identity-comparable reference to a subscription's owner

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Identity of the context that owns a subscription.
///
/// Never keeps the owner alive. Equality is by address of the `Arc`
/// allocation captured at creation, so clones of one `Arc` match each other
/// and two separately allocated contexts never do.
#[derive(Clone)]
pub(crate) struct ContextRef {
    target: Weak<dyn Any + Send + Sync>,
    addr: usize,
}

impl ContextRef {
    pub fn new<C: Any + Send + Sync>(context: &Arc<C>) -> Self {
        let weak: Weak<C> = Arc::downgrade(context);
        let target: Weak<dyn Any + Send + Sync> = weak;
        Self {
            target,
            addr: address_of(context),
        }
    }

    /// Whether `context` is the owner this reference was created from.
    pub fn matches<C: ?Sized>(&self, context: &Arc<C>) -> bool {
        self.addr == address_of(context)
    }

    /// Whether the owner has been dropped.
    pub fn is_reclaimed(&self) -> bool {
        self.target.strong_count() == 0
    }

    /// Removal predicate: an identity match, or an owner that is already gone.
    ///
    /// Folding reclaimed owners into every removal pass is intentional; stale
    /// entries are pruned lazily by whichever pass finds them first.
    pub fn is_stale_or<C: ?Sized>(&self, context: &Arc<C>) -> bool {
        self.is_reclaimed() || self.matches(context)
    }
}

impl fmt::Debug for ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRef")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("reclaimed", &self.is_reclaimed())
            .finish()
    }
}

fn address_of<C: ?Sized>(context: &Arc<C>) -> usize {
    Arc::as_ptr(context) as *const () as usize
}
