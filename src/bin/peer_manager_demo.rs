#[macro_use]
extern crate log;

use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    thread,
    time::Duration,
};

use peer_manager::{
    clock::SystemClockSource,
    common::NodeAddress,
    manager::PeerManager,
    peer::{Direction, PeerType},
    test_support::{MockConnection, MockTransport},
    Config, ConnectionEventListener, ConnectionHandle,
};
use structopt::StructOpt;

/// Exercises the library end-to-end against an in-memory mock transport,
/// so the crate is runnable without any external infrastructure.
fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_args();

    let local_address = NodeAddress(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9000));
    let transport = Arc::new(MockTransport::new(local_address));
    let clock = SystemClockSource::new(Duration::from_secs(1), Duration::from_secs(5));

    let storage_dir = tempfile::tempdir()?;
    let manager = PeerManager::new(
        transport.clone(),
        config.max_connections,
        config.seed_address_set(),
        storage_dir.path(),
        clock.clone(),
    )?;

    info!("Peer manager demo started with max_connections={}", config.max_connections);

    for i in 0..(config.max_connections + 2) {
        let addr = NodeAddress(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, i as u8)), 9000));
        let conn = MockConnection::new(i as u64, Some(addr), PeerType::Peer, Direction::Inbound, i as u64);
        transport.push(conn.clone());
        manager.on_connect(conn as Arc<dyn ConnectionHandle>);
    }

    // Give the executor thread a moment to process the synthesized
    // connects and run at least one housekeeping sweep.
    thread::sleep(Duration::from_millis(200));

    let snapshot = manager.snapshot();
    info!(
        "Connections open: {}, max_connections: {}, absolute_limit: {}",
        snapshot.connection_count,
        snapshot.limits.max_connections(),
        snapshot.limits.absolute_limit()
    );

    manager.shutdown();
    clock.stop();
    Ok(())
}
