//! Brick sample storage behind a retrieve/release contract.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use brickstream_core::{BrickAddress, Error, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

/// Backing store for brick samples.
///
/// `retrieve` may block on I/O. The returned samples stay valid until the
/// matching `release`; implementations may unpin or evict them afterwards.
pub trait BrickStore: Send + Sync {
    /// Fetch the interleaved `u16` samples of a brick.
    fn retrieve(&self, address: BrickAddress) -> Result<Arc<[u16]>>;

    /// Signal that the samples from a successful `retrieve` are no longer needed.
    fn release(&self, address: BrickAddress);
}

/// Brick store keeping every brick in memory.
#[derive(Default)]
pub struct RamBrickStore {
    bricks: HashMap<BrickAddress, Arc<[u16]>>,
    outstanding: Mutex<HashMap<BrickAddress, usize>>,
}

impl RamBrickStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a brick.
    pub fn insert(&mut self, address: BrickAddress, samples: Vec<u16>) {
        self.bricks.insert(address, samples.into());
    }

    /// Number of stored bricks.
    pub fn len(&self) -> usize {
        self.bricks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }

    /// Retrievals that have not been released yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().values().sum()
    }

    /// Write all bricks to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut entries: Vec<(u64, &[u16])> = self
            .bricks
            .iter()
            .map(|(address, samples)| (address.0, &samples[..]))
            .collect();
        entries.sort_unstable_by_key(|(address, _)| *address);

        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &entries)?;
        Ok(())
    }

    /// Read bricks written by [`RamBrickStore::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let entries: Vec<(u64, Vec<u16>)> = bincode::deserialize_from(reader)?;

        let mut store = Self::new();
        for (address, samples) in entries {
            store.insert(BrickAddress(address), samples);
        }
        Ok(store)
    }
}

impl BrickStore for RamBrickStore {
    fn retrieve(&self, address: BrickAddress) -> Result<Arc<[u16]>> {
        let samples = self
            .bricks
            .get(&address)
            .cloned()
            .ok_or(Error::BrickNotFound(address))?;
        *self.outstanding.lock().entry(address).or_insert(0) += 1;
        Ok(samples)
    }

    fn release(&self, address: BrickAddress) {
        let mut outstanding = self.outstanding.lock();
        if let Some(count) = outstanding.get_mut(&address) {
            *count -= 1;
            if *count == 0 {
                outstanding.remove(&address);
            }
        } else {
            tracing::warn!(%address, "Release of a brick that was not retrieved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieve_and_release_balance() {
        let mut store = RamBrickStore::new();
        store.insert(BrickAddress(3), vec![1, 2, 3]);

        let samples = store.retrieve(BrickAddress(3)).unwrap();
        assert_eq!(&samples[..], &[1, 2, 3]);
        assert_eq!(store.outstanding(), 1);

        store.release(BrickAddress(3));
        assert_eq!(store.outstanding(), 0);
    }

    #[test]
    fn missing_brick_is_an_error() {
        let store = RamBrickStore::new();
        assert!(matches!(
            store.retrieve(BrickAddress(9)),
            Err(Error::BrickNotFound(BrickAddress(9)))
        ));
        assert_eq!(store.outstanding(), 0);
    }

    #[test]
    fn save_and_load() {
        let mut store = RamBrickStore::new();
        store.insert(BrickAddress(1), vec![5; 8]);
        store.insert(BrickAddress(2), vec![6; 8]);

        let path = std::env::temp_dir().join(format!("brickstream-store-{}.bin", std::process::id()));
        store.save(&path).unwrap();
        let loaded = RamBrickStore::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 2);
        assert_eq!(&loaded.retrieve(BrickAddress(2)).unwrap()[..], &[6; 8]);
    }
}
