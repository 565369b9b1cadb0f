//! Deterministic mock transport and connection used by unit and
//! integration tests. Not part of the public API.

use std::sync::{
    atomic::{AtomicBool, AtomicU64},
    Arc,
};

use parking_lot::{Mutex, RwLock};

use crate::{
    common::NodeAddress,
    peer::{Direction, PeerType},
    transport::{ConnectionEventListener, ConnectionHandle, ConnectionId, RuleViolation, ShutdownReason, Transport},
};

pub struct MockConnection {
    id: ConnectionId,
    peer_address: RwLock<Option<NodeAddress>>,
    peer_type: Mutex<PeerType>,
    direction: Direction,
    last_activity: AtomicU64,
    closed: AtomicBool,
    shutdown_reason: Mutex<Option<ShutdownReason>>,
    violations: Mutex<Vec<RuleViolation>>,
}

impl MockConnection {
    pub fn new(
        id: ConnectionId,
        peer_address: Option<NodeAddress>,
        peer_type: PeerType,
        direction: Direction,
        last_activity: u64,
    ) -> Arc<Self> {
        Arc::new(MockConnection {
            id,
            peer_address: RwLock::new(peer_address),
            peer_type: Mutex::new(peer_type),
            direction,
            last_activity: AtomicU64::new(last_activity),
            closed: AtomicBool::new(false),
            shutdown_reason: Mutex::new(None),
            violations: Mutex::new(Vec::new()),
        })
    }

    pub fn set_peer_address(&self, addr: Option<NodeAddress>) { *self.peer_address.write() = addr; }

    /// Simulates the remote end closing the connection, independently of
    /// `ConnectionHandle::shutdown` (which the core itself only calls to
    /// initiate a close, not to react to one).
    pub fn mark_closed(&self) { self.closed.store(true, std::sync::atomic::Ordering::SeqCst); }

    pub fn set_last_activity(&self, ts: u64) { self.last_activity.store(ts, std::sync::atomic::Ordering::SeqCst); }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> { *self.shutdown_reason.lock() }

    pub fn violations(&self) -> Vec<RuleViolation> { self.violations.lock().clone() }
}

impl ConnectionHandle for MockConnection {
    fn id(&self) -> ConnectionId { self.id }

    fn peer_address_if_known(&self) -> Option<NodeAddress> { *self.peer_address.read() }

    fn peer_type(&self) -> PeerType { *self.peer_type.lock() }

    fn set_peer_type(&self, peer_type: PeerType) { *self.peer_type.lock() = peer_type; }

    fn direction(&self) -> Direction { self.direction }

    fn last_activity_timestamp(&self) -> u64 { self.last_activity.load(std::sync::atomic::Ordering::SeqCst) }

    fn is_closed(&self) -> bool { self.closed.load(std::sync::atomic::Ordering::SeqCst) }

    fn shutdown(&self, reason: ShutdownReason, completion: Option<Box<dyn FnOnce() + Send>>) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        *self.shutdown_reason.lock() = Some(reason);
        if let Some(f) = completion {
            f();
        }
    }

    fn report_rule_violation(&self, violation: RuleViolation) { self.violations.lock().push(violation); }
}

pub struct MockTransport {
    local_address: NodeAddress,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    listeners: Mutex<Vec<Arc<dyn ConnectionEventListener>>>,
}

impl MockTransport {
    pub fn new(local_address: NodeAddress) -> Self {
        MockTransport {
            local_address,
            connections: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, conn: Arc<MockConnection>) { self.connections.lock().push(conn); }

    /// Number of connections not (yet) shut down.
    pub fn open_count(&self) -> usize { self.connections.lock().iter().filter(|c| !c.is_closed()).count() }

    pub fn is_shut_down(&self, id: ConnectionId) -> bool {
        self.connections
            .lock()
            .iter()
            .find(|c| c.id() == id)
            .map(|c| c.is_closed())
            .unwrap_or(false)
    }

    pub fn shutdown_reason(&self, id: ConnectionId) -> Option<ShutdownReason> {
        self.connections.lock().iter().find(|c| c.id() == id).and_then(|c| c.shutdown_reason())
    }
}

impl Transport for MockTransport {
    fn get_all_connections(&self) -> Vec<Arc<dyn ConnectionHandle>> {
        self.connections
            .lock()
            .iter()
            .filter(|c| !c.is_closed())
            .map(|c| c.clone() as Arc<dyn ConnectionHandle>)
            .collect()
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.listeners.lock().push(listener);
    }

    fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn local_address(&self) -> NodeAddress { self.local_address }
}
