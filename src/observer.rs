//! A small, generic multicast sink with copy-on-write semantics: adds are
//! rare, deliveries are frequent, and a listener may deregister itself
//! mid-delivery without upsetting the in-flight iteration (spec.md §4.5,
//! §9).

use std::sync::Arc;

use parking_lot::RwLock;

/// Holds a list of `Arc<T>` listeners. Registration copies the backing
/// `Vec` and swaps it in; delivery clones the `Arc<Vec<_>>` once and
/// iterates the snapshot, so adds/removes observed mid-delivery take
/// effect on the next call, never the current one.
pub struct ListenerRegistry<T: ?Sized> {
    listeners: RwLock<Arc<Vec<Arc<T>>>>,
}

impl<T: ?Sized> ListenerRegistry<T> {
    pub fn new() -> Self {
        ListenerRegistry {
            listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn add(&self, listener: Arc<T>) {
        let mut guard = self.listeners.write();
        let mut next = (**guard).clone();
        next.push(listener);
        *guard = Arc::new(next);
    }

    /// Removes a listener by pointer identity.
    pub fn remove(&self, listener: &Arc<T>) {
        let mut guard = self.listeners.write();
        let next: Vec<Arc<T>> = guard
            .iter()
            .filter(|l| !Arc::ptr_eq(l, listener))
            .cloned()
            .collect();
        *guard = Arc::new(next);
    }

    /// Takes a snapshot of the current listener list for iteration. The
    /// snapshot is a consistent point-in-time view, isolated from
    /// concurrent `add`/`remove` calls.
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> { self.listeners.read().clone() }

    pub fn len(&self) -> usize { self.listeners.read().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<T: ?Sized> Default for ListenerRegistry<T> {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Ping: Send + Sync {
        fn ping(&self, registry: &ListenerRegistry<dyn Ping>, remove_self: Option<Arc<dyn Ping>>);
    }

    struct Counter(AtomicUsize);
    impl Ping for Counter {
        fn ping(&self, _registry: &ListenerRegistry<dyn Ping>, _remove_self: Option<Arc<dyn Ping>>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn delivers_in_registration_order() {
        let registry: ListenerRegistry<dyn Ping> = ListenerRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct Recorder(usize, Arc<std::sync::Mutex<Vec<usize>>>);
        impl Ping for Recorder {
            fn ping(&self, _r: &ListenerRegistry<dyn Ping>, _s: Option<Arc<dyn Ping>>) {
                self.1.lock().unwrap().push(self.0);
            }
        }

        for i in 0..5 {
            registry.add(Arc::new(Recorder(i, order.clone())));
        }
        for l in registry.snapshot().iter() {
            l.ping(&registry, None);
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn remove_mid_delivery_does_not_affect_current_pass() {
        let registry: ListenerRegistry<dyn Ping> = ListenerRegistry::new();
        let a = Arc::new(Counter(AtomicUsize::new(0)));
        let b = Arc::new(Counter(AtomicUsize::new(0)));
        registry.add(a.clone() as Arc<dyn Ping>);
        registry.add(b.clone() as Arc<dyn Ping>);

        let snapshot = registry.snapshot();
        registry.remove(&(a.clone() as Arc<dyn Ping>));
        for l in snapshot.iter() {
            l.ping(&registry, None);
        }

        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }
}
