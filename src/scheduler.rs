//! A single-shot, coalescing timer (spec.md §4.3). `PeerManager` uses two
//! instances of this: one for the 5 s housekeeping sweep delay, and one
//! for the 2 s persistence debounce — both are "arm once, ignore further
//! arms until expiry, run on expiry unless cancelled" in exactly the same
//! way, so one type serves both.
//!
//! Intended to be armed and stopped only from the core's single executor
//! (spec.md §5) — the timer's own background thread is the only other
//! party racing to flip the armed flag and fire the callback.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

pub struct HousekeepingScheduler {
    delay: Duration,
    armed: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl HousekeepingScheduler {
    pub fn new(delay: Duration) -> Self {
        HousekeepingScheduler {
            delay,
            armed: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Arms the timer if it is not already counting down; otherwise a
    /// no-op. The timer is not self-rearming — whatever triggers `arm`
    /// again after expiry is the caller's responsibility.
    pub fn arm<F>(&self, on_expiry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.armed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancelled.store(false, Ordering::Release);

        let armed = Arc::clone(&self.armed);
        let cancelled = Arc::clone(&self.cancelled);
        let delay = self.delay;
        thread::Builder::new()
            .name("peer-manager-timer".into())
            .spawn(move || {
                thread::sleep(delay);
                armed.store(false, Ordering::Release);
                if !cancelled.swap(false, Ordering::AcqRel) {
                    on_expiry();
                }
            })
            .expect("failed to spawn coalescing timer thread");
    }

    /// Cancels a pending expiry and clears the handle.
    pub fn stop(&self) { self.cancelled.store(true, Ordering::Release); }

    pub fn is_armed(&self) -> bool { self.armed.load(Ordering::Acquire) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn fires_once_after_delay() {
        let scheduler = HousekeepingScheduler::new(Duration::from_millis(20));
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        scheduler.arm(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_armed());

        thread::sleep(Duration::from_millis(60));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed());
    }

    #[test]
    fn repeated_arm_while_counting_down_is_a_no_op() {
        let scheduler = HousekeepingScheduler::new(Duration::from_millis(40));
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let f = fired.clone();
            scheduler.arm(move || {
                f.fetch_add(1, Ordering::SeqCst);
            });
        }

        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_cancels_pending_expiry() {
        let scheduler = HousekeepingScheduler::new(Duration::from_millis(20));
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        scheduler.arm(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.stop();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn can_rearm_after_expiry() {
        let scheduler = HousekeepingScheduler::new(Duration::from_millis(20));
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        scheduler.arm(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(60));

        let f = fired.clone();
        scheduler.arm(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(60));

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
