//! Brick stores that misbehave on purpose.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use brickstream_core::{BrickAddress, Error, Result};
use brickstream_octree::BrickStore;
use hashbrown::HashSet;

type Predicate = Box<dyn Fn(BrickAddress) -> bool + Send + Sync>;

/// Fails retrievals of selected bricks with an I/O error.
pub struct FailingStore<S> {
    inner: S,
    fails: Predicate,
    failures: AtomicUsize,
}

impl<S: BrickStore> FailingStore<S> {
    pub fn new(inner: S, fails: impl Fn(BrickAddress) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner,
            fails: Box::new(fails),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fails every retrieval.
    pub fn always(inner: S) -> Self {
        Self::new(inner, |_| true)
    }

    /// Retrievals that were failed so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: BrickStore> BrickStore for FailingStore<S> {
    fn retrieve(&self, address: BrickAddress) -> Result<Arc<[u16]>> {
        if (self.fails)(address) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Io(std::io::Error::other(format!(
                "injected read failure for {address}"
            ))));
        }
        self.inner.retrieve(address)
    }

    fn release(&self, address: BrickAddress) {
        self.inner.release(address);
    }
}

/// Delays every retrieval, like a slow disk.
pub struct SlowStore<S> {
    inner: S,
    delay: Duration,
}

impl<S: BrickStore> SlowStore<S> {
    pub const fn new(inner: S, delay: Duration) -> Self {
        Self { inner, delay }
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: BrickStore> BrickStore for SlowStore<S> {
    fn retrieve(&self, address: BrickAddress) -> Result<Arc<[u16]>> {
        std::thread::sleep(self.delay);
        self.inner.retrieve(address)
    }

    fn release(&self, address: BrickAddress) {
        self.inner.release(address);
    }
}

/// Returns truncated samples for selected bricks.
pub struct CorruptStore<S> {
    inner: S,
    corrupt: HashSet<BrickAddress>,
}

impl<S: BrickStore> CorruptStore<S> {
    pub fn new(inner: S, corrupt: impl IntoIterator<Item = BrickAddress>) -> Self {
        Self {
            inner,
            corrupt: corrupt.into_iter().collect(),
        }
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: BrickStore> BrickStore for CorruptStore<S> {
    fn retrieve(&self, address: BrickAddress) -> Result<Arc<[u16]>> {
        let samples = self.inner.retrieve(address)?;
        if self.corrupt.contains(&address) {
            return Ok(samples[..samples.len() / 2].into());
        }
        Ok(samples)
    }

    fn release(&self, address: BrickAddress) {
        self.inner.release(address);
    }
}
