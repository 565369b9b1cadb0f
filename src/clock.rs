//! The clock source collaborator (spec.md §2, §6): monotonic ticks plus a
//! missed-tick signal used as a proxy for "host was suspended / came back
//! from standby".

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crate::observer::ListenerRegistry;

/// Notified with the gap length, in milliseconds, whenever the clock
/// source observes an interval between ticks larger than its idle
/// tolerance.
pub trait ClockListener: Send + Sync {
    fn on_missed_tick(&self, gap_millis: u64);
}

pub trait ClockSource: Send + Sync {
    fn now_millis(&self) -> u64;
    fn add_listener(&self, listener: Arc<dyn ClockListener>);
    fn remove_listener(&self, listener: &Arc<dyn ClockListener>);
}

/// The default `ClockSource`: a background thread ticking at a fixed
/// period, reporting any gap beyond `tick_period + idle_tolerance` as a
/// missed tick. A laptop suspend/resume, or a paused VM, shows up as one
/// large gap on the next tick after resume.
pub struct SystemClockSource {
    listeners: ListenerRegistry<dyn ClockListener>,
    tick_period: Duration,
    idle_tolerance: Duration,
    running: Arc<AtomicBool>,
    handle: parking_lot::Mutex<Option<thread::JoinHandle<()>>>,
}

impl SystemClockSource {
    pub fn new(tick_period: Duration, idle_tolerance: Duration) -> Arc<Self> {
        let this = Arc::new(SystemClockSource {
            listeners: ListenerRegistry::new(),
            tick_period,
            idle_tolerance,
            running: Arc::new(AtomicBool::new(true)),
            handle: parking_lot::Mutex::new(None),
        });
        this.clone().spawn();
        this
    }

    fn spawn(self: Arc<Self>) {
        let running = Arc::clone(&self.running);
        let tick_period = self.tick_period;
        let idle_tolerance = self.idle_tolerance;
        let this = Arc::clone(&self);
        let handle = thread::Builder::new()
            .name("peer-manager-clock".into())
            .spawn(move || {
                let mut last = Instant::now();
                while running.load(Ordering::Acquire) {
                    thread::sleep(tick_period);
                    let now = Instant::now();
                    let elapsed = now.duration_since(last);
                    if elapsed > tick_period + idle_tolerance {
                        let gap_millis = elapsed.as_millis() as u64;
                        debug!("Clock source observed a missed tick of {} ms", gap_millis);
                        for listener in this.listeners.snapshot().iter() {
                            listener.on_missed_tick(gap_millis);
                        }
                    }
                    last = now;
                }
            })
            .expect("failed to spawn clock source thread");
        *self.handle.lock() = Some(handle);
    }

    pub fn stop(&self) { self.running.store(false, Ordering::Release); }
}

impl Drop for SystemClockSource {
    fn drop(&mut self) { self.stop(); }
}

impl ClockSource for SystemClockSource {
    fn now_millis(&self) -> u64 { crate::common::current_timestamp_millis() }

    fn add_listener(&self, listener: Arc<dyn ClockListener>) { self.listeners.add(listener); }

    fn remove_listener(&self, listener: &Arc<dyn ClockListener>) { self.listeners.remove(listener); }
}
