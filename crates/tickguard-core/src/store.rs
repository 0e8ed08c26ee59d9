use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{InstrumentId, PriceSnapshot};

/// Latest-known snapshot per instrument.
///
/// Writes are single-key upserts (last write wins). Entries are never
/// purged; a snapshot stays until the next update replaces it.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    inner: Arc<RwLock<HashMap<InstrumentId, Arc<PriceSnapshot>>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot for the snapshot's instrument and returns the
    /// shared handle now stored.
    pub fn upsert(&self, snapshot: PriceSnapshot) -> Arc<PriceSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.inner
            .write()
            .insert(snapshot.instrument.clone(), Arc::clone(&snapshot));
        snapshot
    }

    pub fn get(&self, instrument: &InstrumentId) -> Option<Arc<PriceSnapshot>> {
        self.inner.read().get(instrument).cloned()
    }

    /// Snapshots for the requested instruments that have one.
    pub fn get_many<'a, I>(&self, instruments: I) -> HashMap<InstrumentId, Arc<PriceSnapshot>>
    where
        I: IntoIterator<Item = &'a InstrumentId>,
    {
        let map = self.inner.read();
        instruments
            .into_iter()
            .filter_map(|id| map.get(id).map(|snap| (id.clone(), Arc::clone(snap))))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
