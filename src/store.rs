//! The persistent store collaborator (spec.md §2, §6): an opaque
//! key/value store holding the single `PersistedPeers` blob. The store's
//! own serialization format and write scheduling are its business; this
//! crate only hands it bytes and asks for them back.

use std::path::Path;
use std::sync::{Arc, RwLock};

use rkv::{Manager, Rkv, StoreOptions, Value};
use thiserror::Error;

use crate::peer::PeerRecord;

const PEER_MANAGER_DB: &str = "peer_manager";
const PERSISTED_PEERS_KEY: &str = "PersistedPeers";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key/value store error: {0}")]
    Rkv(#[from] rkv::StoreError),
    #[error("failed to encode/decode persisted peers: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// The persistence contract this crate consumes. The core never blocks on
/// I/O on its own executor thread (spec.md §5) — implementations are
/// expected to perform the actual write on a background writer, as the
/// debounce in `PeerManager` only decides *when* to call `save`, not how
/// it gets to disk.
pub trait PeerStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<Vec<PeerRecord>>>;
    fn save(&self, records: &[PeerRecord]) -> anyhow::Result<()>;
}

/// Backs the `PersistedPeers` blob with an `rkv` single-value database,
/// the same way the teacher's ban list is backed (spec.md's persistence
/// is deliberately just as opaque: one key, one blob, delegated codec).
pub struct RkvPeerStore {
    env: Arc<RwLock<Rkv>>,
}

impl RkvPeerStore {
    pub fn open(storage_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(storage_dir)?;
        let env = Manager::singleton()
            .write()
            .map_err(|_| anyhow::anyhow!("rkv manager lock was poisoned"))?
            .get_or_create(storage_dir, Rkv::new)?;
        Ok(RkvPeerStore { env })
    }
}

impl PeerStore for RkvPeerStore {
    fn load(&self) -> anyhow::Result<Option<Vec<PeerRecord>>> {
        let env = self
            .env
            .read()
            .map_err(|_| anyhow::anyhow!("rkv env lock was poisoned"))?;
        let store = env.open_single(PEER_MANAGER_DB, StoreOptions::create())?;
        let reader = env.read()?;

        match store.get(&reader, PERSISTED_PEERS_KEY)? {
            Some(Value::Blob(bytes)) => {
                let records: Vec<PeerRecord> =
                    serde_json::from_slice(bytes).map_err(StoreError::from)?;
                Ok(Some(records))
            }
            Some(_) => Err(StoreError::Other("unexpected value type for PersistedPeers".into()).into()),
            None => Ok(None),
        }
    }

    fn save(&self, records: &[PeerRecord]) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(records).map_err(StoreError::from)?;
        let env = self
            .env
            .read()
            .map_err(|_| anyhow::anyhow!("rkv env lock was poisoned"))?;
        let store = env.open_single(PEER_MANAGER_DB, StoreOptions::create())?;
        let mut writer = env.write()?;
        store.put(&mut writer, PERSISTED_PEERS_KEY, &Value::Blob(&bytes))?;
        writer.commit()?;
        Ok(())
    }
}

/// An in-memory stand-in for `PeerStore`, used by tests that exercise the
/// debounce/persist round-trip without touching disk.
#[cfg(any(test, feature = "test_utils"))]
pub struct InMemoryPeerStore {
    records: parking_lot::Mutex<Option<Vec<PeerRecord>>>,
}

#[cfg(any(test, feature = "test_utils"))]
impl InMemoryPeerStore {
    pub fn new() -> Self { InMemoryPeerStore { records: parking_lot::Mutex::new(None) } }
}

#[cfg(any(test, feature = "test_utils"))]
impl Default for InMemoryPeerStore {
    fn default() -> Self { Self::new() }
}

#[cfg(any(test, feature = "test_utils"))]
impl PeerStore for InMemoryPeerStore {
    fn load(&self) -> anyhow::Result<Option<Vec<PeerRecord>>> { Ok(self.records.lock().clone()) }

    fn save(&self, records: &[PeerRecord]) -> anyhow::Result<()> {
        *self.records.lock() = Some(records.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeAddress;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn addr(n: u8) -> NodeAddress {
        NodeAddress(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)), 9000))
    }

    #[test]
    fn rkv_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = RkvPeerStore::open(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());

        let records = vec![PeerRecord::new(addr(1)), PeerRecord::new(addr(2))];
        store.save(&records).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|r| r.node_address == addr(1)));
        assert!(loaded.iter().any(|r| r.node_address == addr(2)));
    }

    #[test]
    fn in_memory_store_round_trips() {
        let store = InMemoryPeerStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&[PeerRecord::new(addr(1))]).unwrap();
        assert_eq!(store.load().unwrap().unwrap().len(), 1);
    }
}
