use crate::{Chunk, ChunkCache};

use cumulus_core::{ChunkKey, Xyz};

use fnv::FnvHashMap;
use std::sync::Arc;

/// A thread's private map of pinned chunks, one map per depth touched.
///
/// Every entry corresponds to one ref this thread holds in the cache, added
/// by the cache itself on first touch. Lookups here are the hot path of
/// insertion: no cache lock, no hashing beyond this thread's own small maps.
///
/// A pruner belongs to one thread for one batch of work. [`clip`] hands all
/// of its refs back (and the pruner can then be reused for the next batch);
/// dropping the pruner clips implicitly.
///
/// [`clip`]: Pruner::clip
pub struct Pruner {
    cache: Arc<ChunkCache>,
    slices: Vec<FnvHashMap<Xyz, Arc<Chunk>>>,
}

impl Pruner {
    pub fn new(cache: Arc<ChunkCache>) -> Self {
        Self {
            cache,
            slices: Vec::new(),
        }
    }

    /// The resident this thread pinned at `ck`, if any.
    pub(crate) fn get(&self, ck: &ChunkKey) -> Option<Arc<Chunk>> {
        self.slices
            .get(ck.depth() as usize)?
            .get(&ck.position())
            .map(Arc::clone)
    }

    /// Record the resident for `ck`. Called by the cache with the ref
    /// already added; one entry per ref.
    pub(crate) fn set(&mut self, ck: &ChunkKey, chunk: Arc<Chunk>) {
        let depth = ck.depth() as usize;
        if self.slices.len() <= depth {
            self.slices.resize_with(depth + 1, FnvHashMap::default);
        }

        let prev = self.slices[depth].insert(ck.position(), chunk);
        debug_assert!(prev.is_none());
    }

    /// Release every ref this pruner holds, depth by depth.
    pub fn clip(&mut self) {
        for (depth, stale) in self.slices.iter_mut().enumerate() {
            if stale.is_empty() {
                continue;
            }
            self.cache.prune(depth as u64, stale);
            stale.clear();
        }
    }
}

impl Drop for Pruner {
    fn drop(&mut self) {
        self.clip();
    }
}
