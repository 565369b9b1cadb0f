//! Small shared types used across the peer manager: the node's address
//! identity and the wall-clock timestamp helper used for aging and
//! activity comparisons.

use std::{fmt, net::SocketAddr, str::FromStr};

use serde::{Deserialize, Serialize};

/// An opaque network identity. Equality and hashing are by the wrapped
/// socket address alone, matching the data model's requirement that two
/// peer records with the same address collide in any set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress(pub SocketAddr);

impl NodeAddress {
    pub fn new(addr: SocketAddr) -> Self { NodeAddress(addr) }

    pub fn as_socket_addr(&self) -> SocketAddr { self.0 }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}

impl FromStr for NodeAddress {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Ok(NodeAddress(s.parse()?)) }
}

impl From<SocketAddr> for NodeAddress {
    fn from(addr: SocketAddr) -> Self { NodeAddress(addr) }
}

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// This is the stamp used for `PeerRecord::first_seen` and
/// `last_activity_timestamp` comparisons; it is independent of the
/// injected `ClockSource`, which drives scheduling and standby detection
/// rather than aging.
pub fn current_timestamp_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
