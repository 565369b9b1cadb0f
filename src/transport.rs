//! The contract this crate consumes from the transport layer, and the
//! contract it produces back. The transport itself — socket open/close,
//! handshake, address discovery — is out of scope (spec.md §1); this
//! module only types the boundary.

use std::{collections::HashSet, sync::Arc};

use crate::{
    common::NodeAddress,
    peer::{Direction, PeerType},
};

/// Opaque per-connection identifier, stable for the lifetime of a
/// connection. Analogous to the `mio::Token` a transport would hand out.
pub type ConnectionId = u64;

/// Reason codes the core attaches to a shutdown it initiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    TooManyConnectionsOpen,
    TooManySeedNodesConnected,
    UnknownPeerAddress,
}

/// A protocol rule violation reported against a connection. Two rule
/// violations from the same peer are expected to cause the transport to
/// shut the connection down; that escalation is out of scope here (spec.md
/// §7) — the core only raises the signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    TooManyReportedPeersSent,
    Other(String),
}

/// The observable attributes of a live connection the core consumes, plus
/// the shutdown/violation operations it may invoke on one.
pub trait ConnectionHandle: Send + Sync {
    fn id(&self) -> ConnectionId;
    fn peer_address_if_known(&self) -> Option<NodeAddress>;
    fn peer_type(&self) -> PeerType;
    fn set_peer_type(&self, peer_type: PeerType);
    fn direction(&self) -> Direction;
    fn last_activity_timestamp(&self) -> u64;
    fn is_closed(&self) -> bool;

    /// Shuts the connection down for `reason`. `completion` is invoked by
    /// the transport once the shutdown has actually happened; the core
    /// uses it to re-invoke the eviction check (spec.md §9, "cyclic
    /// references") rather than recursing directly.
    fn shutdown(&self, reason: ShutdownReason, completion: Option<Box<dyn FnOnce() + Send>>);

    fn report_rule_violation(&self, violation: RuleViolation);
}

/// Registered with the transport via `add_connection_listener`; delivers
/// the three raw transport callbacks the core reacts to.
pub trait ConnectionEventListener: Send + Sync {
    fn on_connect(&self, connection: Arc<dyn ConnectionHandle>);
    fn on_disconnect(&self, connection: Arc<dyn ConnectionHandle>);
    /// Transient transport errors are ignored by the core (spec.md §7) —
    /// implementors need not do anything with this, it exists so the
    /// transport has somewhere to route them without silently dropping
    /// them on the floor.
    fn on_error(&self, connection: Arc<dyn ConnectionHandle>);
}

/// The transport-facing contract the core consumes (spec.md §6).
pub trait Transport: Send + Sync {
    fn get_all_connections(&self) -> Vec<Arc<dyn ConnectionHandle>>;

    /// Subset of `get_all_connections` with a known peer address.
    fn get_confirmed_connections(&self) -> Vec<Arc<dyn ConnectionHandle>> {
        self.get_all_connections()
            .into_iter()
            .filter(|c| c.peer_address_if_known().is_some())
            .collect()
    }

    fn get_confirmed_addresses(&self) -> HashSet<NodeAddress> {
        self.get_confirmed_connections()
            .into_iter()
            .filter_map(|c| c.peer_address_if_known())
            .collect()
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionEventListener>);
    fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionEventListener>);

    fn local_address(&self) -> NodeAddress;
}
