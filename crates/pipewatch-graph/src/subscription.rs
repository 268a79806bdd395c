//! Cancel-on-drop notification subscriptions.
//!
//! A [`Subscription`] owns the right to stay connected. Dropping it (or
//! calling [`Subscription::cancel`]) removes the handler from the
//! [`HandlerList`] it was registered on.
//!
//! Dispatch takes a snapshot of the handlers and invokes them outside the
//! list lock, so a handler cancelled concurrently with a dispatch may still
//! be invoked once. Handlers that must not run after teardown check their
//! own cancellation token first.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Identity of one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle keeping a handler connected. Disconnects on drop.
#[must_use = "dropping a Subscription disconnects the handler immediately"]
pub struct Subscription {
    id: SubscriptionId,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when released.
    pub fn new(id: SubscriptionId, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// The id of the connected handler.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Disconnects now.
    pub fn cancel(mut self) {
        self.disconnect();
    }

    fn disconnect(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("connected", &self.cancel.is_some())
            .finish()
    }
}

/// Registry of handlers for one notification channel.
pub struct HandlerList<H> {
    handlers: Arc<Mutex<Vec<(SubscriptionId, H)>>>,
}

impl<H: Clone + Send + 'static> HandlerList<H> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers a handler; the returned subscription removes it on drop.
    pub fn connect(&self, handler: H) -> Subscription {
        let id = SubscriptionId::next();
        self.handlers.lock().push((id, handler));

        let list: Weak<Mutex<Vec<(SubscriptionId, H)>>> = Arc::downgrade(&self.handlers);
        Subscription::new(id, move || {
            if let Some(list) = list.upgrade() {
                list.lock().retain(|(sid, _)| *sid != id);
            }
        })
    }

    /// Copies the currently connected handlers.
    pub fn snapshot(&self) -> Vec<H> {
        self.handlers.lock().iter().map(|(_, h)| h.clone()).collect()
    }

    /// Number of connected handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// True if nothing is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: Clone + Send + 'static> Default for HandlerList<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for HandlerList<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerList")
            .field("connected", &self.handlers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_disconnects() {
        let list: HandlerList<u32> = HandlerList::new();
        let a = list.connect(1);
        let _b = list.connect(2);
        assert_eq!(list.snapshot(), vec![1, 2]);

        drop(a);
        assert_eq!(list.snapshot(), vec![2]);
    }

    #[test]
    fn test_cancel_after_list_dropped() {
        let list: HandlerList<u32> = HandlerList::new();
        let sub = list.connect(7);
        drop(list);
        sub.cancel();
    }
}
