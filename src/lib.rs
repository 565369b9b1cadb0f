//! Peer admission, eviction and catalog policy for an overlay P2P network.
//!
//! `PeerManager` is the crate's entry point: it owns the peer catalog, the
//! connection policy engine, the housekeeping scheduler and the liveness
//! observer, and wires them to a transport, a clock source and a
//! persistent store supplied by the host node.

#[macro_use]
extern crate log;

pub mod clock;
pub mod common;
pub mod config;
pub mod limits;
pub mod liveness;
pub mod manager;
pub mod observer;
pub mod peer;
pub mod policy;
pub mod scheduler;
pub mod store;
pub mod transport;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_support;

pub use clock::{ClockListener, ClockSource, SystemClockSource};
pub use common::NodeAddress;
pub use config::Config;
pub use limits::Limits;
pub use liveness::LivenessListener;
pub use manager::PeerManager;
pub use peer::{Direction, PeerRecord, PeerType};
pub use policy::PolicySnapshot;
pub use store::{PeerStore, RkvPeerStore, StoreError};
pub use transport::{ConnectionEventListener, ConnectionHandle, ConnectionId, RuleViolation, ShutdownReason, Transport};
