//! Classifies connections, enforces the tiered connection caps, and
//! reaps anonymous and superfluous-seed connections (spec.md §4.2).

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};

use crate::{
    common::{current_timestamp_millis, NodeAddress},
    limits::Limits,
    peer::{Direction, PeerType},
    transport::{ConnectionHandle, ConnectionId, ShutdownReason, Transport},
};

/// Anonymous connections are reaped 120 s after first being observed
/// without a known peer address (spec.md §4.2). The delay is long because
/// a newly bootstrapping peer may not know its own externally visible
/// address yet.
const REMOVE_ANONYMOUS_PEER_MILLIS: u64 = 120_000;

pub struct PolicyEngine {
    transport: Arc<dyn Transport>,
    limits: RwLock<Limits>,
    seed_addresses: HashSet<NodeAddress>,
    anonymous_since: Mutex<HashMap<ConnectionId, u64>>,
}

impl PolicyEngine {
    pub fn new(transport: Arc<dyn Transport>, max_connections: u32, seed_addresses: HashSet<NodeAddress>) -> Self {
        PolicyEngine {
            transport,
            limits: RwLock::new(Limits::new(max_connections)),
            seed_addresses,
            anonymous_since: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> Limits { *self.limits.read() }

    /// Recomputes all derived limits atomically from a new `max_connections`.
    pub fn set_max_connections(&self, max_connections: u32) {
        *self.limits.write() = Limits::new(max_connections);
    }

    pub fn is_seed_address(&self, addr: &NodeAddress) -> bool { self.seed_addresses.contains(addr) }

    /// Classification on connect: if the remote address is in the seed
    /// set, tags the connection `SeedNode`. Other peer types are set by
    /// neighboring subsystems and are respected here. Connections without
    /// a known address yet are handed to the anonymous reaper instead.
    pub fn classify_on_connect(&self, conn: &Arc<dyn ConnectionHandle>) {
        match conn.peer_address_if_known() {
            Some(addr) => {
                if self.seed_addresses.contains(&addr) {
                    conn.set_peer_type(PeerType::SeedNode);
                }
            }
            None => {
                self.anonymous_since
                    .lock()
                    .entry(conn.id())
                    .or_insert_with(current_timestamp_millis);
            }
        }
    }

    /// Called on disconnect so a closed connection's anonymous-tracking
    /// entry does not linger forever.
    pub fn forget_connection(&self, id: ConnectionId) {
        self.anonymous_since.lock().remove(&id);
    }

    /// Shuts down any connection whose peer address is still unknown 120 s
    /// after it was first observed.
    pub fn remove_anonymous(&self) {
        let now = current_timestamp_millis();
        let mut anon = self.anonymous_since.lock();

        for conn in self.transport.get_all_connections() {
            if conn.peer_address_if_known().is_some() {
                anon.remove(&conn.id());
                continue;
            }
            let first_seen = *anon.entry(conn.id()).or_insert(now);
            if now.saturating_sub(first_seen) > REMOVE_ANONYMOUS_PEER_MILLIS {
                info!(
                    "Reaping anonymous connection {} (unknown for {} ms)",
                    conn.id(),
                    now - first_seen
                );
                conn.shutdown(ShutdownReason::UnknownPeerAddress, None);
            }
        }
    }

    /// If more confirmed connections than `max_connections` exist and the
    /// node is sufficiently connected, sheds the oldest seed-node
    /// connection, repeating until only one seed remains or the condition
    /// clears. Seed nodes are scarce shared infrastructure.
    pub fn remove_superfluous_seeds(&self) {
        loop {
            let confirmed = self.transport.get_confirmed_connections();
            let limits = self.limits();

            if confirmed.len() as u32 <= limits.max_connections()
                || (confirmed.len() as u32) < limits.min_connections()
            {
                return;
            }

            let seeds: Vec<_> = confirmed
                .iter()
                .filter(|c| c.peer_type() == PeerType::SeedNode)
                .collect();
            if seeds.len() <= 1 {
                return;
            }

            let victim = seeds
                .into_iter()
                .min_by_key(|c| c.last_activity_timestamp())
                .expect("checked non-empty above");
            info!("Shutting down superfluous seed connection {}", victim.id());
            victim.shutdown(ShutdownReason::TooManySeedNodesConnected, None);
        }
    }

    /// Tiered eviction: repeatedly picks the oldest-activity connection
    /// from the first non-empty tier and shuts it down, re-checking after
    /// each shutdown, until the connection count is within every
    /// threshold or no candidates remain.
    pub fn enforce_max_connections(&self) {
        loop {
            let all = self.transport.get_all_connections();
            let n = all.len() as u32;
            let limits = self.limits();

            let candidates = select_candidates(n, &limits, &all);
            let Some(victim) = candidates.into_iter().min_by_key(|c| c.last_activity_timestamp()) else {
                if n > limits.absolute_limit() {
                    warn!(
                        "No eviction candidate found with {} connections open against an absolute limit of {}",
                        n,
                        limits.absolute_limit()
                    );
                }
                return;
            };

            debug!("Evicting connection {} (overload, n={})", victim.id(), n);
            victim.shutdown(ShutdownReason::TooManyConnectionsOpen, None);
        }
    }

    /// Shuts down `conn` for `reason`, unless it is a privileged
    /// direct-message peer.
    pub fn shutdown(&self, conn: &Arc<dyn ConnectionHandle>, reason: ShutdownReason) {
        if conn.peer_type() == PeerType::DirectMsgPeer {
            return;
        }
        conn.shutdown(reason, None);
    }

    /// Shuts down the first matching non-direct connection to `address`.
    pub fn shutdown_by_address(&self, address: &NodeAddress, reason: ShutdownReason) {
        if let Some(conn) = self
            .transport
            .get_all_connections()
            .into_iter()
            .find(|c| c.peer_type() != PeerType::DirectMsgPeer && c.peer_address_if_known().as_ref() == Some(address))
        {
            conn.shutdown(reason, None);
        }
    }

    /// A read-only view of the current tier the node is in, for
    /// observability (not separately specified, but a natural addition —
    /// see SPEC_FULL.md §4).
    pub fn snapshot(&self) -> PolicySnapshot {
        let all = self.transport.get_all_connections();
        PolicySnapshot {
            connection_count: all.len() as u32,
            limits: self.limits(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PolicySnapshot {
    pub connection_count: u32,
    pub limits: Limits,
}

fn select_candidates<'a>(
    n: u32,
    limits: &Limits,
    all: &'a [Arc<dyn ConnectionHandle>],
) -> Vec<&'a Arc<dyn ConnectionHandle>> {
    if n > limits.max_connections() {
        let tier1: Vec<_> = all
            .iter()
            .filter(|c| c.direction() == Direction::Inbound && c.peer_type() == PeerType::Peer)
            .collect();
        if !tier1.is_empty() {
            return tier1;
        }
    }

    if n > limits.peer_limit() {
        let tier2: Vec<_> = all.iter().filter(|c| c.peer_type() == PeerType::Peer).collect();
        if !tier2.is_empty() {
            return tier2;
        }
    }

    if n > limits.non_direct_limit() {
        let tier3: Vec<_> = all
            .iter()
            .filter(|c| c.peer_type() != PeerType::DirectMsgPeer)
            .collect();
        if !tier3.is_empty() {
            return tier3;
        }
    }

    if n > limits.absolute_limit() {
        return all.iter().collect();
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockConnection, MockTransport};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn addr(n: u8) -> NodeAddress {
        NodeAddress(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)), 9000))
    }

    #[test]
    fn tier1_evicts_oldest_inbound_peer() {
        let transport = Arc::new(MockTransport::new(addr(0)));
        for i in 0..10u8 {
            transport.push(MockConnection::new(
                i as u64,
                Some(addr(i + 1)),
                PeerType::Peer,
                Direction::Outbound,
                100 + i as u64,
            ));
        }
        // one extra inbound peer, oldest activity timestamp
        transport.push(MockConnection::new(10, Some(addr(200)), PeerType::Peer, Direction::Inbound, 50));

        let engine = PolicyEngine::new(transport.clone(), 10, HashSet::new());
        engine.enforce_max_connections();

        assert_eq!(transport.open_count(), 10);
        assert!(transport.is_shut_down(10));
    }

    #[test]
    fn tier4_falls_back_to_direct_msg_peers() {
        let transport = Arc::new(MockTransport::new(addr(0)));
        for i in 0..29u8 {
            transport.push(MockConnection::new(
                i as u64,
                Some(addr(i + 1)),
                PeerType::DirectMsgPeer,
                Direction::Outbound,
                1 + i as u64,
            ));
        }

        let engine = PolicyEngine::new(transport.clone(), 10, HashSet::new());
        engine.enforce_max_connections();

        // absolute_limit = 28; 29 > 28, exactly one is evicted and 28 stays
        assert_eq!(transport.open_count(), 28);
        assert!(transport.is_shut_down(0));
    }

    #[test]
    fn direct_msg_peer_is_never_a_tier_1_3_victim() {
        let transport = Arc::new(MockTransport::new(addr(0)));
        for i in 0..20u8 {
            transport.push(MockConnection::new(
                i as u64,
                Some(addr(i + 1)),
                PeerType::DirectMsgPeer,
                Direction::Inbound,
                i as u64,
            ));
        }
        let engine = PolicyEngine::new(transport.clone(), 10, HashSet::new());
        engine.enforce_max_connections();
        // n=20 <= absolute_limit=28, nothing evicted at all
        assert_eq!(transport.open_count(), 20);
    }

    #[test]
    fn anonymous_reaper_waits_120_seconds() {
        let transport = Arc::new(MockTransport::new(addr(0)));
        transport.push(MockConnection::new(1, None, PeerType::Peer, Direction::Inbound, 0));
        let engine = PolicyEngine::new(transport.clone(), 10, HashSet::new());

        engine.remove_anonymous();
        assert!(!transport.is_shut_down(1));

        // simulate the passage of time by back-dating the tracked first-seen
        engine.anonymous_since.lock().insert(1, current_timestamp_millis() - 120_001);
        engine.remove_anonymous();
        assert!(transport.is_shut_down(1));
    }

    #[test]
    fn classify_tags_seed_connections() {
        let transport = Arc::new(MockTransport::new(addr(0)));
        let conn = MockConnection::new(1, Some(addr(5)), PeerType::Peer, Direction::Outbound, 0);
        transport.push(conn.clone());

        let mut seeds = HashSet::new();
        seeds.insert(addr(5));
        let engine = PolicyEngine::new(transport, 10, seeds);
        engine.classify_on_connect(&(conn.clone() as Arc<dyn ConnectionHandle>));

        assert_eq!(conn.peer_type(), PeerType::SeedNode);
    }
}
