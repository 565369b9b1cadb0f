//! Wires the catalog, policy engine, scheduler and liveness observer onto
//! a single dedicated executor thread (spec.md §5), and is the only public
//! entry point a host node constructs and talks to.
//!
//! State owned by `Core` is touched from exactly one thread: the executor.
//! Everything else (transport callbacks, the public API, clock ticks)
//! marshals work onto it by sending a boxed closure through a
//! `crossbeam_channel` mailbox, rather than taking a lock.

use std::{
    collections::HashSet,
    path::Path,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;

use crate::{
    clock::ClockSource,
    common::NodeAddress,
    liveness::{LivenessListener, LivenessObserver},
    peer::{PeerCatalog, PeerRecord},
    policy::{PolicyEngine, PolicySnapshot},
    scheduler::HousekeepingScheduler,
    store::{PeerStore, RkvPeerStore},
    transport::{ConnectionEventListener, ConnectionHandle, RuleViolation, Transport},
};

const HOUSEKEEPING_DELAY: Duration = Duration::from_secs(5);
const PERSIST_DEBOUNCE_DELAY: Duration = Duration::from_secs(2);

enum Task {
    Run(Box<dyn FnOnce(&mut Core) + Send>),
    Stop,
}

/// Everything the executor thread owns exclusively.
struct Core {
    transport: Arc<dyn Transport>,
    catalog: PeerCatalog,
    policy: PolicyEngine,
    store: Arc<dyn PeerStore>,
    liveness: Arc<LivenessObserver>,
    housekeeping: HousekeepingScheduler,
    persist_debounce: HousekeepingScheduler,
    stopped: bool,
    sender: Sender<Task>,
}

impl Core {
    fn post<F>(&self, f: F)
    where
        F: FnOnce(&mut Core) + Send + 'static,
    {
        let _ = self.sender.send(Task::Run(Box::new(f)));
    }

    fn arm_housekeeping(&self) {
        let sender = self.sender.clone();
        self.housekeeping.arm(move || {
            let _ = sender.send(Task::Run(Box::new(|core: &mut Core| core.run_housekeeping_sweep())));
        });
    }

    fn arm_persist_debounce(&self) {
        let sender = self.sender.clone();
        self.persist_debounce.arm(move || {
            let _ = sender.send(Task::Run(Box::new(|core: &mut Core| core.persist_now())));
        });
    }

    fn handle_connect(&mut self, conn: Arc<dyn ConnectionHandle>) {
        self.policy.classify_on_connect(&conn);
        self.arm_housekeeping();
        let total = self.transport.get_all_connections().len() as u32;
        self.liveness.note_connect(total);
    }

    fn handle_disconnect(&mut self, conn: Arc<dyn ConnectionHandle>) {
        self.policy.forget_connection(conn.id());
        let total = self.transport.get_all_connections().len() as u32;
        self.liveness.note_disconnect(total);
    }

    fn handle_add_reported(&mut self, batch: Vec<NodeAddress>, origin: Arc<dyn ConnectionHandle>) {
        let absolute_limit = self.policy.limits().absolute_limit() as usize;
        let self_address = self.transport.local_address();

        if self.catalog.add_reported(batch, self_address, absolute_limit) {
            self.arm_persist_debounce();
        } else {
            warn!("Rejecting oversized reported-peer batch from connection {}", origin.id());
            origin.report_rule_violation(RuleViolation::TooManyReportedPeersSent);
        }
    }

    fn handle_register_fault(&mut self, address: NodeAddress, had_rule_violation: bool) {
        self.catalog.register_fault(&address, had_rule_violation);
        self.arm_persist_debounce();
    }

    fn handle_set_max_connections(&mut self, max_connections: u32) {
        self.policy.set_max_connections(max_connections);
        self.arm_housekeeping();
    }

    /// Runs the coalesced maintenance pass, in the fixed order spec.md
    /// §4.3 gives: reap anonymous connections, reap superfluous seeds,
    /// age out both catalogs, then enforce the tiered connection caps.
    /// A no-op entirely while the node is latched `stopped`.
    fn run_housekeeping_sweep(&mut self) {
        if self.stopped {
            return;
        }
        self.policy.remove_anonymous();
        self.policy.remove_superfluous_seeds();
        self.catalog.purge_old_reported();
        self.catalog.purge_old_persisted();
        self.policy.enforce_max_connections();
    }

    fn persist_now(&mut self) {
        let snapshot = self.catalog.persisted_snapshot();
        if let Err(err) = self.store.save(&snapshot) {
            warn!("Failed to persist peer catalog, will retry on next debounce: {}", err);
        }
    }
}

/// The Peer Manager. Construct one per node with `PeerManager::new`; the
/// returned handle is cheap to clone and safe to call from any thread.
pub struct PeerManager {
    sender: Sender<Task>,
    clock: Arc<dyn ClockSource>,
    liveness: Arc<LivenessObserver>,
    executor: Mutex<Option<JoinHandle<()>>>,
}

impl PeerManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        max_connections: u32,
        seed_addresses: HashSet<NodeAddress>,
        storage_dir: &Path,
        clock: Arc<dyn ClockSource>,
    ) -> anyhow::Result<Arc<Self>> {
        let store: Arc<dyn PeerStore> = Arc::new(RkvPeerStore::open(storage_dir)?);
        let mut catalog = PeerCatalog::new();
        if let Some(persisted) = store.load()? {
            info!("Loaded {} persisted peers from storage", persisted.len());
            catalog.load_persisted(persisted);
        }

        let policy = PolicyEngine::new(transport.clone(), max_connections, seed_addresses);
        let liveness = Arc::new(LivenessObserver::new());

        let (sender, receiver) = unbounded();
        let core = Core {
            transport: transport.clone(),
            catalog,
            policy,
            store,
            liveness: liveness.clone(),
            housekeeping: HousekeepingScheduler::new(HOUSEKEEPING_DELAY),
            persist_debounce: HousekeepingScheduler::new(PERSIST_DEBOUNCE_DELAY),
            stopped: false,
            sender: sender.clone(),
        };

        let join_handle = thread::Builder::new()
            .name("peer-manager-core".into())
            .spawn(move || run_executor(core, receiver))
            .expect("failed to spawn peer manager executor thread");

        let manager = Arc::new(PeerManager {
            sender,
            clock: clock.clone(),
            liveness: liveness.clone(),
            executor: Mutex::new(Some(join_handle)),
        });

        transport.add_connection_listener(manager.clone() as Arc<dyn ConnectionEventListener>);
        clock.add_listener(liveness.clone() as Arc<dyn crate::clock::ClockListener>);
        liveness.add_listener(manager.clone() as Arc<dyn LivenessListener>);

        Ok(manager)
    }

    fn post<F>(&self, f: F)
    where
        F: FnOnce(&mut Core) + Send + 'static,
    {
        let _ = self.sender.send(Task::Run(Box::new(f)));
    }

    /// Submits a gossip-reported batch of peer addresses. Rejected batches
    /// cause a `TooManyReportedPeersSent` rule violation against `origin`
    /// instead of any mutation.
    pub fn add_reported(&self, batch: Vec<NodeAddress>, origin: Arc<dyn ConnectionHandle>) {
        self.post(move |core| core.handle_add_reported(batch, origin));
    }

    /// Records a fault against a persisted peer, evicting it once the
    /// fault threshold is exceeded or immediately on a rule violation.
    pub fn register_fault(&self, address: NodeAddress, had_rule_violation: bool) {
        self.post(move |core| core.handle_register_fault(address, had_rule_violation));
    }

    /// Reconfigures `max_connections` at runtime; all derived limits are
    /// recomputed atomically and a fresh housekeeping pass is armed.
    pub fn set_max_connections(&self, max_connections: u32) {
        self.post(move |core| core.handle_set_max_connections(max_connections));
    }

    pub fn add_liveness_listener(&self, listener: Arc<dyn LivenessListener>) { self.liveness.add_listener(listener); }

    pub fn remove_liveness_listener(&self, listener: &Arc<dyn LivenessListener>) {
        self.liveness.remove_listener(listener);
    }

    /// A read-only view of the current connection count against the
    /// derived limits, for observability (SPEC_FULL.md §4).
    pub fn snapshot(&self) -> PolicySnapshot {
        let (reply_tx, reply_rx) = bounded(1);
        self.post(move |core| {
            let _ = reply_tx.send(core.policy.snapshot());
        });
        reply_rx.recv().expect("executor thread dropped the reply channel")
    }

    /// A read-only snapshot of the in-memory persisted peer catalog, for
    /// observability and tests — not the on-disk copy, which may lag by
    /// up to the persistence debounce (SPEC_FULL.md §4).
    pub fn persisted_peers(&self) -> Vec<PeerRecord> {
        let (reply_tx, reply_rx) = bounded(1);
        self.post(move |core| {
            let _ = reply_tx.send(core.catalog.persisted_snapshot());
        });
        reply_rx.recv().expect("executor thread dropped the reply channel")
    }

    /// Cancels pending timers, detaches the clock listener, and stops the
    /// executor thread (spec.md §5). Safe to call at most once. The
    /// transport-side connection listener is left registered — further
    /// callbacks through it are harmless no-ops once the executor's
    /// mailbox has no receiver left to deliver to.
    pub fn shutdown(&self) {
        self.clock.remove_listener(&(self.liveness.clone() as Arc<dyn crate::clock::ClockListener>));

        self.post(|core| {
            core.housekeeping.stop();
            core.persist_debounce.stop();
        });
        let _ = self.sender.send(Task::Stop);

        if let Some(handle) = self.executor.lock().take() {
            let _ = handle.join();
        }
    }
}

impl ConnectionEventListener for PeerManager {
    fn on_connect(&self, connection: Arc<dyn ConnectionHandle>) {
        self.post(move |core| core.handle_connect(connection));
    }

    fn on_disconnect(&self, connection: Arc<dyn ConnectionHandle>) {
        self.post(move |core| core.handle_disconnect(connection));
    }

    fn on_error(&self, _connection: Arc<dyn ConnectionHandle>) {
        // Transient transport errors are ignored by the core (spec.md §7).
    }
}

impl LivenessListener for PeerManager {
    fn on_all_connections_lost(&self) { self.post(|core| core.stopped = true); }

    fn on_new_connection_after_all_connections_lost(&self) { self.post(|core| core.stopped = false); }

    fn on_awake_from_standby(&self) { self.post(|core| core.stopped = false); }
}

fn run_executor(mut core: Core, receiver: crossbeam_channel::Receiver<Task>) {
    for task in receiver.iter() {
        match task {
            Task::Run(f) => f(&mut core),
            Task::Stop => break,
        }
    }
}
