//! Tracks two liveness edges the rest of the node cares about (spec.md
//! §4.4): losing every open connection (and regaining one), and waking up
//! from an apparent host standby/suspend.

use std::sync::{atomic::{AtomicBool, Ordering}, Arc};

use crate::{clock::ClockListener, observer::ListenerRegistry};

pub trait LivenessListener: Send + Sync {
    fn on_all_connections_lost(&self) {}
    fn on_new_connection_after_all_connections_lost(&self) {}
    fn on_awake_from_standby(&self) {}
}

pub struct LivenessObserver {
    listeners: ListenerRegistry<dyn LivenessListener>,
    lost_all_connections: AtomicBool,
}

impl LivenessObserver {
    pub fn new() -> Self {
        LivenessObserver {
            listeners: ListenerRegistry::new(),
            lost_all_connections: AtomicBool::new(false),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn LivenessListener>) { self.listeners.add(listener); }

    pub fn remove_listener(&self, listener: &Arc<dyn LivenessListener>) { self.listeners.remove(listener); }

    /// Call after a connection is accepted, with the total connection
    /// count as it stands right after. Clears the lost-all-connections
    /// edge if this is the first connection after it was tripped.
    pub fn note_connect(&self, total_connections_now: u32) {
        if total_connections_now > 0 && self.lost_all_connections.swap(false, Ordering::AcqRel) {
            info!("Regained connectivity after previously losing all connections");
            for listener in self.listeners.snapshot().iter() {
                listener.on_new_connection_after_all_connections_lost();
            }
        }
    }

    /// Call after a connection is dropped, with the total connection
    /// count as it stands right after. Trips the lost-all-connections
    /// edge exactly once, on the transition into zero.
    pub fn note_disconnect(&self, total_connections_now: u32) {
        if total_connections_now == 0 && !self.lost_all_connections.swap(true, Ordering::AcqRel) {
            warn!("Lost all connections");
            for listener in self.listeners.snapshot().iter() {
                listener.on_all_connections_lost();
            }
        }
    }

    pub fn has_lost_all_connections(&self) -> bool { self.lost_all_connections.load(Ordering::Acquire) }
}

impl Default for LivenessObserver {
    fn default() -> Self { Self::new() }
}

impl ClockListener for LivenessObserver {
    /// A missed clock tick is this crate's only signal that the host may
    /// have been suspended; there is no OS-level suspend/resume event
    /// available through the collaborator traits in spec.md §6.
    fn on_missed_tick(&self, gap_millis: u64) {
        info!("Waking from apparent standby after a {} ms gap", gap_millis);
        for listener in self.listeners.snapshot().iter() {
            listener.on_awake_from_standby();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingListener {
        lost: AtomicUsize,
        regained: AtomicUsize,
        awoken: AtomicUsize,
    }

    impl LivenessListener for CountingListener {
        fn on_all_connections_lost(&self) { self.lost.fetch_add(1, Ordering::SeqCst); }
        fn on_new_connection_after_all_connections_lost(&self) { self.regained.fetch_add(1, Ordering::SeqCst); }
        fn on_awake_from_standby(&self) { self.awoken.fetch_add(1, Ordering::SeqCst); }
    }

    #[test]
    fn fires_lost_exactly_once_on_transition_to_zero() {
        let observer = LivenessObserver::new();
        let listener = Arc::new(CountingListener::default());
        observer.add_listener(listener.clone());

        observer.note_disconnect(1);
        assert_eq!(listener.lost.load(Ordering::SeqCst), 0);

        observer.note_disconnect(0);
        observer.note_disconnect(0);
        assert_eq!(listener.lost.load(Ordering::SeqCst), 1);
        assert!(observer.has_lost_all_connections());
    }

    #[test]
    fn fires_regained_only_after_a_loss() {
        let observer = LivenessObserver::new();
        let listener = Arc::new(CountingListener::default());
        observer.add_listener(listener.clone());

        observer.note_connect(1);
        assert_eq!(listener.regained.load(Ordering::SeqCst), 0);

        observer.note_disconnect(0);
        observer.note_connect(1);
        assert_eq!(listener.regained.load(Ordering::SeqCst), 1);
        assert!(!observer.has_lost_all_connections());
    }

    #[test]
    fn missed_tick_notifies_awake_listeners() {
        let observer = LivenessObserver::new();
        let listener = Arc::new(CountingListener::default());
        observer.add_listener(listener.clone());

        observer.on_missed_tick(5_000);
        assert_eq!(listener.awoken.load(Ordering::SeqCst), 1);
    }
}
