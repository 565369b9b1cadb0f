//! Derives the tiered connection-count limits from a single configured
//! `max_connections`, per spec.md §4.6.

/// The derived connection limits for a given `max_connections`. Cheap to
/// recompute, so `PolicyLimits::set_max_connections` simply rebuilds one
/// of these rather than mutating fields in place — that keeps the
/// "recomputes all derived limits atomically" guarantee trivially true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    max_connections: u32,
    min_connections: u32,
    peer_limit: u32,
    non_direct_limit: u32,
    absolute_limit: u32,
}

impl Limits {
    pub fn new(max_connections: u32) -> Self {
        Limits {
            max_connections,
            min_connections: max_connections.saturating_sub(4).max(1),
            peer_limit: max_connections + 4,
            non_direct_limit: max_connections + 8,
            absolute_limit: max_connections + 18,
        }
    }

    pub fn max_connections(&self) -> u32 { self.max_connections }

    pub fn min_connections(&self) -> u32 { self.min_connections }

    pub fn peer_limit(&self) -> u32 { self.peer_limit }

    pub fn non_direct_limit(&self) -> u32 { self.non_direct_limit }

    pub fn absolute_limit(&self) -> u32 { self.absolute_limit }

    /// Alias for `absolute_limit`, exposed under the name spec.md §4.6
    /// uses for it.
    pub fn effective_max(&self) -> u32 { self.absolute_limit }
}
