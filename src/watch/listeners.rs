//! Ordered listener lists with panic isolation

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

/// A status listener. Registration returns the same `Arc`, which is the
/// identity used for removal.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct ListenerSet<T> {
    listeners: RwLock<Vec<Listener<T>>>,
}

impl<T> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Append a listener; the same `Arc` may be added more than once
    pub fn add(&self, listener: Listener<T>) -> Listener<T> {
        self.listeners.write().push(Arc::clone(&listener));
        listener
    }

    /// Remove the first registration of `listener`
    pub fn remove(&self, listener: &Listener<T>) -> bool {
        let mut listeners = self.listeners.write();
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Call every listener in registration order. A panicking listener is
    /// logged and skipped. Returns how many listeners panicked.
    ///
    /// Listeners run on a snapshot, so they may add or remove listeners.
    pub fn emit(&self, value: &T) -> usize {
        let snapshot: Vec<Listener<T>> = self.listeners.read().clone();
        let mut panicked = 0;

        for (index, listener) in snapshot.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
                error!(listener = index, "Status listener panicked");
                panicked += 1;
            }
        }
        panicked
    }
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
