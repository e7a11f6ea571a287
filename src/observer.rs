//! Subscriber lists — fan-out of engine events to any number of listeners.
//!
//! Everything runs on one thread, so listeners are plain `FnMut` closures held
//! behind `Rc<RefCell<..>>`. `subscribe` hands back a [`Subscription`] that
//! removes the listener again. Emission snapshots the list first, so a
//! listener may unsubscribe itself (or others) while being notified.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

type Listener<E> = Rc<RefCell<dyn FnMut(&E)>>;

struct Entry<E> {
    id: u64,
    listener: Listener<E>,
}

struct Registry<E> {
    next_id: u64,
    entries: Vec<Entry<E>>,
}

/// An ordered list of listeners for events of type `E`.
pub struct Observers<E> {
    registry: Rc<RefCell<Registry<E>>>,
}

impl<E: 'static> Observers<E> {
    pub fn new() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener. Listeners are notified in subscription order.
    pub fn subscribe(&self, listener: impl FnMut(&E) + 'static) -> Subscription {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push(Entry {
            id,
            listener: Rc::new(RefCell::new(listener)),
        });

        let weak: Weak<RefCell<Registry<E>>> = Rc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.borrow_mut().entries.retain(|e| e.id != id);
                }
            })),
        }
    }

    /// Deliver `event` to every current listener.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .registry
            .borrow()
            .entries
            .iter()
            .map(|e| Rc::clone(&e.listener))
            .collect();
        for listener in snapshot {
            // A listener that re-enters its own emission is skipped rather than
            // double-borrowed.
            if let Ok(mut f) = listener.try_borrow_mut() {
                (&mut *f)(event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.registry.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Observers::subscribe`].
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Remove the listener. Safe to call after the observed engine is gone.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
