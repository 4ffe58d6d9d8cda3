use crate::{Chunk, Endpoint, Hierarchy, IoPool, Pruner, Result, Voxel};

use cumulus_core::{ChunkKey, Dir, Dxyz, Key, Xyz};

use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// The deepest slice the cache will ever hold. Descent halves cell widths
/// each level, so f64 point coordinates are exhausted long before this.
pub const MAX_DEPTH: usize = 64;

/// Cache counters. `alive` is a level: the reffed chunks currently resident
/// in some slice. `read` and `written` are per-epoch rates, zeroed by
/// [`ChunkCache::latch_info`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Info {
    pub alive: u64,
    pub read: u64,
    pub written: u64,
}

/// Everything a reffed chunk guards: the live-holder count and the resident
/// payload, if it is materialized.
struct ChunkState {
    ref_count: u64,
    resident: Option<Arc<Chunk>>,
}

impl ChunkState {
    fn add(&mut self) {
        self.ref_count += 1;
    }

    /// Drop one ref; true iff holders remain.
    fn del(&mut self) -> bool {
        assert!(self.ref_count > 0);
        self.ref_count -= 1;
        self.ref_count > 0
    }

    fn count(&self) -> u64 {
        self.ref_count
    }

    fn exists(&self) -> bool {
        self.resident.is_some()
    }

    /// Materialize an empty resident for reanimation.
    fn assign(&mut self, ck: &ChunkKey) -> Arc<Chunk> {
        assert!(!self.exists());
        let chunk = Arc::new(Chunk::new(*ck));
        self.resident = Some(Arc::clone(&chunk));

        chunk
    }

    /// Drop the resident after serialization.
    fn reset(&mut self) {
        assert_eq!(self.ref_count, 0);
        assert!(self.exists());
        self.resident = None;
    }

    fn chunk(&self) -> &Arc<Chunk> {
        self.resident.as_ref().expect("chunk is resident")
    }
}

/// The atomic unit of the cache: a lock around the holder count and the
/// optional resident. A reffed chunk with no resident is either serialized
/// and awaiting erase, or mid-reanimation.
struct ReffedChunk {
    state: Mutex<ChunkState>,
}

impl ReffedChunk {
    fn new(ck: &ChunkKey) -> Self {
        Self {
            state: Mutex::new(ChunkState {
                ref_count: 0,
                resident: Some(Arc::new(Chunk::new(*ck))),
            }),
        }
    }
}

/// All reffed chunks at one depth, keyed by position.
type Slice = FnvHashMap<Xyz, Arc<ReffedChunk>>;

/// The concurrent, write-behind cache of octree chunks.
///
/// Ingest threads descend the tree through [`ChunkCache::insert`], pinning
/// chunks through their thread-local [`Pruner`]s. When a pruner releases its
/// refs, zero-count chunks are not destroyed: the owned set takes them over,
/// resident and all, so a prompt re-touch costs nothing. [`maybe_purge`]
/// trims the owned set to a cap by dispatching chunk saves onto the I/O
/// pool, deepest chunks first since they are the smallest and coldest to
/// bring back.
///
/// Lock order is slice, then chunk, then owned, then info, innermost last.
/// The two documented departures are the reclaim step of first-touch (owned
/// then chunk, legal because no slice or chunk lock is held when the owned
/// lock is requested) and the purge loop (owned held across slice and chunk,
/// legal for the same reason: no thread waits on the owned lock while
/// holding either).
///
/// [`maybe_purge`]: ChunkCache::maybe_purge
pub struct ChunkCache {
    me: Weak<ChunkCache>,
    hierarchy: Arc<Hierarchy>,
    pool: Arc<IoPool>,
    out: Arc<dyn Endpoint>,
    tmp: Arc<dyn Endpoint>,
    cache_size: u64,
    slices: Vec<Mutex<Slice>>,
    owned: Mutex<BTreeSet<Dxyz>>,
    info: Mutex<Info>,
    failed: Mutex<Option<crate::Error>>,
    shut_down: AtomicBool,
}

impl ChunkCache {
    /// `cache_size` caps the owned set: the number of unreffed chunks kept
    /// resident as eviction candidates, not a byte budget.
    pub fn new(
        hierarchy: Arc<Hierarchy>,
        pool: Arc<IoPool>,
        out: Arc<dyn Endpoint>,
        tmp: Arc<dyn Endpoint>,
        cache_size: u64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            hierarchy,
            pool,
            out,
            tmp,
            cache_size,
            slices: (0..MAX_DEPTH).map(|_| Mutex::new(Slice::default())).collect(),
            owned: Mutex::new(BTreeSet::new()),
            info: Mutex::new(Info::default()),
            failed: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn cache_size(&self) -> u64 {
        self.cache_size
    }

    /// Snapshot the counters and zero the per-epoch fields. `alive` is a
    /// level, not a rate, and is left alone.
    pub fn latch_info(&self) -> Info {
        let mut info = self.info.lock();
        let latched = *info;
        info.read = 0;
        info.written = 0;

        latched
    }

    /// Place `voxel` in the subtree rooted at `ck`, descending until a chunk
    /// accepts it. `key` tracks the voxel's own descent and must start at
    /// `ck`'s depth. Safe for concurrent callers with independent pruners.
    pub fn insert(
        &self,
        voxel: &Voxel,
        key: &mut Key,
        ck: &ChunkKey,
        pruner: &mut Pruner,
    ) -> Result<()> {
        // The single-threaded fast path: this thread already pinned it.
        let chunk = match pruner.get(ck) {
            Some(chunk) => chunk,
            None => self.add_ref(ck, pruner)?,
        };

        if chunk.insert(voxel, key) {
            return Ok(());
        }

        // Full at this depth. Step toward the point and recurse on the child.
        key.step(voxel.point());
        let dir = Dir::toward(ck.bounds().mid(), voxel.point());
        self.insert(voxel, key, &ck.child(dir), pruner)
    }

    /// A thread's first touch of `ck`: find or create the reffed chunk, add
    /// one ref, register the resident in `pruner`, and hand the resident
    /// back. Reanimates from the output endpoint when the resident was
    /// serialized away.
    fn add_ref(&self, ck: &ChunkKey, pruner: &mut Pruner) -> Result<Arc<Chunk>> {
        let slice = &self.slices[ck.depth() as usize];
        let mut slice_guard = slice.lock();

        if let Some(reffed) = slice_guard.get(&ck.position()).map(Arc::clone) {
            // A reffed chunk exists here. The resident may not: serialization
            // and erasure run asynchronously, and we may have caught the slot
            // between them.
            let mut state = reffed.state.lock();
            state.add();

            drop(slice_guard);

            let chunk = if !state.exists() {
                assert_eq!(state.count(), 1);

                // Serialized but not yet erased. Our ref blocks the erase;
                // rebuild the resident from its remote source.
                let chunk = state.assign(ck);
                self.info.lock().read += 1;

                // The pruner pointer must exist before the blocking load, so
                // a concurrent insert finds it instead of trying to re-add.
                pruner.set(ck, Arc::clone(&chunk));

                let np = self.hierarchy.get(&ck.dxyz());
                assert!(np > 0, "a serialized chunk has remote content");
                debug!(dxyz = %ck.dxyz(), np, "reanimating chunk");
                chunk.load(&*self.out, &*self.tmp, np)?;

                chunk
            } else {
                let chunk = Arc::clone(state.chunk());
                pruner.set(ck, Arc::clone(&chunk));

                chunk
            };

            drop(state);

            // If we reclaimed a chunk sitting in the ownership pool, pull it
            // out: it is communally owned again.
            let mut owned = self.owned.lock();
            if owned.contains(&ck.dxyz()) {
                let mut state = reffed.state.lock();
                // Ours from above, plus the owned set's.
                assert!(state.count() > 1);
                state.del();
                owned.remove(&ck.dxyz());
            }

            return Ok(chunk);
        }

        // No reffed chunk here: create it. The slice lock stays held until
        // our ref and pruner pointer exist, so no other thread can observe
        // the slot in between.
        let reffed = Arc::new(ReffedChunk::new(ck));
        let mut state = reffed.state.lock();
        slice_guard.insert(ck.position(), Arc::clone(&reffed));
        self.info.lock().alive += 1;

        assert_eq!(state.count(), 0);
        assert!(state.exists());
        state.add();
        let chunk = Arc::clone(state.chunk());
        pruner.set(ck, Arc::clone(&chunk));

        drop(slice_guard);

        // A resumed build may have serialized this chunk in an earlier
        // process, so the hierarchy still gets the last word on remote
        // content. Concurrent inserters are fine: they wait on the chunk
        // state we still hold.
        let np = self.hierarchy.get(&ck.dxyz());
        if np > 0 {
            self.info.lock().read += 1;
            debug!(dxyz = %ck.dxyz(), np, "loading chunk from an earlier build");
            chunk.load(&*self.out, &*self.tmp, np)?;
        }

        drop(state);

        Ok(chunk)
    }

    /// Release a pruner's refs for one depth. Chunks whose count reaches
    /// zero move to the owned set with a ref of their own rather than being
    /// freed, so a prompt reclaim costs no I/O.
    pub(crate) fn prune(&self, depth: u64, stale: &FnvHashMap<Xyz, Arc<Chunk>>) {
        if stale.is_empty() {
            return;
        }

        let slice = &self.slices[depth as usize];
        let mut slice_guard = slice.lock();

        for position in stale.keys() {
            let reffed = Arc::clone(
                slice_guard
                    .get(position)
                    .expect("a pruned chunk still has its slot"),
            );
            let mut state = reffed.state.lock();

            if !state.del() {
                // Last holder. Defer the erase: the owned set takes over.
                state.add();

                drop(state);
                drop(slice_guard);

                {
                    let mut owned = self.owned.lock();
                    let inserted = owned.insert(Dxyz::new(depth, *position));
                    assert!(inserted);
                }

                slice_guard = slice.lock();
            }
        }
    }

    /// Trim the owned set to at most `max_cache_size` chunks, dispatching
    /// the overflow onto the I/O pool for serialization. Deepest first: leaf
    /// chunks are smaller and colder, so they are the cheapest to reload.
    ///
    /// Advisory only. The owned set may overshoot the cap between calls.
    pub fn maybe_purge(&self, max_cache_size: u64) {
        let mut owned = self.owned.lock();

        while owned.len() as u64 > max_cache_size {
            let dxyz = *owned.iter().next_back().expect("the owned set is nonempty");

            let slice = &self.slices[dxyz.depth as usize];
            let slice_guard = slice.lock();
            let reffed = Arc::clone(
                slice_guard
                    .get(&dxyz.position)
                    .expect("an owned chunk still has its slot"),
            );
            let mut state = reffed.state.lock();

            owned.remove(&dxyz);

            // Dropping the owned set's ref may not zero the count: a toucher
            // can be mid-reclaim, stuck behind the owned lock we hold. Its
            // ref keeps the chunk alive and this becomes its slot again.
            if !state.del() {
                // Unreffed. The slot's fate is now anyone's guess: an insert
                // thread may recapture it, or the serialization may erase it.
                drop(state);
                drop(slice_guard);
                drop(owned);

                // Serialization blocks on I/O. Dispatch with no locks held,
                // so it only ever blocks the pool, never ingestion.
                let cache = self.me.upgrade().expect("the cache is alive");
                self.pool.add(move || cache.run_serialize(dxyz));

                owned = self.owned.lock();
            }
        }
    }

    fn run_serialize(&self, dxyz: Dxyz) {
        if let Err(e) = self.maybe_serialize(dxyz) {
            error!(%dxyz, error = %e, "chunk serialization failed");
            let mut failed = self.failed.lock();
            if failed.is_none() {
                *failed = Some(e);
            }
        }
    }

    /// Perform the blocking write of one chunk, then hand it to
    /// `maybe_erase`. Runs on the I/O pool only.
    fn maybe_serialize(&self, dxyz: Dxyz) -> Result<()> {
        let slice = &self.slices[dxyz.depth as usize];
        let slice_guard = slice.lock();

        // No slot: the chunk was queued, reclaimed, re-queued, and the first
        // queued job already serialized and erased it. Checking here spares
        // every reclaim from scrubbing the I/O queue for duplicates.
        let Some(reffed) = slice_guard.get(&dxyz.position).map(Arc::clone) else {
            return Ok(());
        };
        let mut state = reffed.state.lock();

        // Reclaimed before we ran. No-op.
        if state.count() > 0 {
            return Ok(());
        }

        // The double-queue case again, caught later: the first job has
        // serialized and reset the chunk and is reacquiring locks to erase
        // it. Our slot will be gone the moment we unlock.
        if !state.exists() {
            return Ok(());
        }

        // Both locks held, no refs, resident present: this write is ours.
        // The I/O is the expensive part, so keep only the chunk lock. Once
        // the slice lock drops, a toucher can find this slot and wait on the
        // chunk lock, which means the slot cannot be erased here.
        drop(slice_guard);

        self.info.lock().written += 1;

        let chunk = Arc::clone(state.chunk());
        let np = chunk.save(&*self.out, &*self.tmp)?;
        assert!(np > 0, "saved chunks are non-empty");
        // Only after a successful save, so the hierarchy never points at
        // bytes that were not written.
        self.hierarchy.set(dxyz, np);
        debug!(%dxyz, np, "serialized chunk");

        state.reset();
        drop(state);

        self.maybe_erase(dxyz);

        Ok(())
    }

    /// Erase the slot if nothing came back for it: no refs, no resident,
    /// both locks held.
    fn maybe_erase(&self, dxyz: Dxyz) {
        let slice = &self.slices[dxyz.depth as usize];
        let mut slice_guard = slice.lock();

        let Some(reffed) = slice_guard.get(&dxyz.position).map(Arc::clone) else {
            return;
        };
        let state = reffed.state.lock();

        if state.count() > 0 {
            return;
        }
        if state.exists() {
            return;
        }

        // With both locks held, no one is waiting on this chunk. The local
        // `reffed` clone keeps the lock storage alive until `state` drops,
        // so the slot can be removed out from under the guard.
        slice_guard.remove(&dxyz.position);
        self.info.lock().alive -= 1;
        debug!(%dxyz, "erased chunk");
    }

    /// Flush everything and wait for it: purge to zero, join the pool, and
    /// surface any serialization failure. Afterward every slice is empty and
    /// `alive` is zero.
    pub fn shutdown(&self) -> Result<()> {
        self.maybe_purge(0);
        self.pool.join();
        self.shut_down.store(true, Ordering::Release);

        if let Some(e) = self.failed.lock().take() {
            return Err(e);
        }

        assert!(self.slices.iter().all(|slice| slice.lock().is_empty()));
        assert_eq!(self.info.lock().alive, 0);

        Ok(())
    }
}

impl Drop for ChunkCache {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::Acquire) {
            warn!("chunk cache dropped without shutdown; unsaved chunks may remain");
        }
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryEndpoint;

    use cumulus_core::{Bounds, Point3};

    use std::sync::Barrier;
    use std::thread;

    /// PCG-style generator so tests are deterministic without a rand dep.
    struct Lcg(u64);

    impl Lcg {
        fn new(seed: u64) -> Self {
            Self(seed)
        }

        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0
        }

        fn unit(&mut self) -> f64 {
            (self.next() >> 11) as f64 / (1u64 << 53) as f64
        }

        fn point(&mut self, width: f64) -> Point3 {
            Point3::new(
                self.unit() * width,
                self.unit() * width,
                self.unit() * width,
            )
        }
    }

    type Rig = (
        Arc<Hierarchy>,
        Arc<MemoryEndpoint>,
        Arc<MemoryEndpoint>,
        Arc<ChunkCache>,
    );

    fn rig(cache_size: u64) -> Rig {
        let hierarchy = Arc::new(Hierarchy::new());
        let out = Arc::new(MemoryEndpoint::new());
        let tmp = Arc::new(MemoryEndpoint::new());
        let cache = ChunkCache::new(
            Arc::clone(&hierarchy),
            Arc::new(IoPool::new(2)),
            Arc::clone(&out) as Arc<dyn Endpoint>,
            Arc::clone(&tmp) as Arc<dyn Endpoint>,
            cache_size,
        );

        (hierarchy, out, tmp, cache)
    }

    fn root_key(span: u64) -> ChunkKey {
        ChunkKey::root(Bounds::cube(Point3::ZERO, Point3::fill(16.0)), span)
    }

    fn insert_one(cache: &ChunkCache, root: &ChunkKey, pruner: &mut Pruner, p: Point3) {
        let mut key = Key::new(root.bounds());
        cache
            .insert(&Voxel::new(p), &mut key, root, pruner)
            .unwrap();
    }

    #[test]
    fn ref_count_tracks_holders_and_owned_set() {
        let (hierarchy, out, _tmp, cache) = rig(2);
        let root = root_key(4);
        let mut pruner = Pruner::new(Arc::clone(&cache));

        insert_one(&cache, &root, &mut pruner, Point3::fill(2.0));
        {
            let slice = cache.slices[0].lock();
            let reffed = slice.get(&root.position()).unwrap();
            assert_eq!(reffed.state.lock().count(), 1);
        }
        assert!(cache.owned.lock().is_empty());

        // Releasing the only holder hands the chunk to the owned set, which
        // keeps a ref of its own.
        pruner.clip();
        {
            let slice = cache.slices[0].lock();
            let reffed = slice.get(&root.position()).unwrap();
            assert_eq!(reffed.state.lock().count(), 1);
        }
        assert!(cache.owned.lock().contains(&root.dxyz()));

        // Reclaiming swaps the owned set's ref for ours, resident intact and
        // with no I/O.
        let chunk = cache.add_ref(&root, &mut pruner).unwrap();
        assert_eq!(chunk.np(), 1);
        {
            let slice = cache.slices[0].lock();
            let reffed = slice.get(&root.position()).unwrap();
            assert_eq!(reffed.state.lock().count(), 1);
        }
        assert!(cache.owned.lock().is_empty());
        assert_eq!(cache.info.lock().read, 0);

        drop(pruner);
        cache.shutdown().unwrap();
        assert_eq!(hierarchy.get(&root.dxyz()), 1);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn purge_evicts_deepest_first() {
        let (hierarchy, _out, _tmp, cache) = rig(1);
        let root = root_key(2);
        let mut pruner = Pruner::new(Arc::clone(&cache));

        // Two points in the same root cell: the second descends, leaving one
        // chunk at depth 0 and one at depth 1.
        insert_one(&cache, &root, &mut pruner, Point3::new(1.0, 1.0, 1.0));
        insert_one(&cache, &root, &mut pruner, Point3::new(2.0, 2.0, 2.0));
        pruner.clip();
        assert_eq!(cache.owned.lock().len(), 2);

        cache.maybe_purge(1);
        cache.pool.join();

        // The deeper chunk went first; the root is still the cached one.
        assert_eq!(hierarchy.len(), 1);
        assert_eq!(hierarchy.entries()[0].0.depth, 1);
        assert!(cache.owned.lock().contains(&root.dxyz()));

        drop(pruner);
        cache.shutdown().unwrap();
        assert_eq!(hierarchy.len(), 2);
    }

    #[test]
    fn single_thread_build_then_shutdown() {
        let (hierarchy, out, tmp, cache) = rig(2);
        let root = root_key(2);
        let mut pruner = Pruner::new(Arc::clone(&cache));

        let mut rng = Lcg::new(7);
        for _ in 0..1000 {
            insert_one(&cache, &root, &mut pruner, rng.point(16.0));
        }

        pruner.clip();
        cache.maybe_purge(cache.cache_size());
        assert!(cache.owned.lock().len() <= 2);

        drop(pruner);
        cache.shutdown().unwrap();

        let info = cache.latch_info();
        assert_eq!(info.alive, 0);
        assert_eq!(info.read, 0);

        // Nothing was ever touched twice, so each chunk saved exactly once.
        let distinct = hierarchy.len() as u64;
        assert_eq!(info.written, distinct);
        assert!(distinct > 8);
        assert!(hierarchy.entries().iter().any(|(d, _)| d.depth >= 3));

        // Every point persisted in exactly one chunk.
        let total: u64 = hierarchy.entries().iter().map(|(_, np)| *np).sum();
        assert_eq!(total, 1000);

        assert_eq!(out.len() as u64, distinct);
        assert!(tmp.is_empty());

        // A latch with no intervening activity reports no rates.
        let relatched = cache.latch_info();
        assert_eq!(relatched, Info::default());
    }

    #[test]
    fn reanimate_for_a_resumed_build() {
        let hierarchy = Arc::new(Hierarchy::new());
        let out = Arc::new(MemoryEndpoint::new());
        let tmp = Arc::new(MemoryEndpoint::new());
        let pool = Arc::new(IoPool::new(2));
        let root = root_key(4);

        {
            let cache = ChunkCache::new(
                Arc::clone(&hierarchy),
                Arc::clone(&pool),
                Arc::clone(&out) as Arc<dyn Endpoint>,
                Arc::clone(&tmp) as Arc<dyn Endpoint>,
                2,
            );
            let mut pruner = Pruner::new(Arc::clone(&cache));
            for i in 0..4 {
                // Distinct x cells of the 4-span root grid.
                insert_one(
                    &cache,
                    &root,
                    &mut pruner,
                    Point3::new(4.0 * i as f64 + 2.0, 2.0, 2.0),
                );
            }
            drop(pruner);
            cache.shutdown().unwrap();
        }
        assert_eq!(hierarchy.get(&root.dxyz()), 4);

        // Reopen against the same hierarchy and store. The first touch reads
        // the saved chunk back, and the new point joins the old ones.
        let cache = ChunkCache::new(
            Arc::clone(&hierarchy),
            pool,
            Arc::clone(&out) as Arc<dyn Endpoint>,
            Arc::clone(&tmp) as Arc<dyn Endpoint>,
            2,
        );
        let mut pruner = Pruner::new(Arc::clone(&cache));
        insert_one(&cache, &root, &mut pruner, Point3::new(2.0, 6.0, 2.0));
        assert_eq!(cache.latch_info().read, 1);

        drop(pruner);
        cache.shutdown().unwrap();
        assert_eq!(hierarchy.get(&root.dxyz()), 5);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn duplicate_serialize_requests_are_no_ops() {
        let (hierarchy, out, _tmp, cache) = rig(2);
        let root = root_key(4);

        let mut pruner = Pruner::new(Arc::clone(&cache));
        insert_one(&cache, &root, &mut pruner, Point3::fill(2.0));
        insert_one(&cache, &root, &mut pruner, Point3::fill(6.0));
        pruner.clip();

        cache.maybe_purge(0);
        cache.pool.join();
        assert_eq!(cache.info.lock().written, 1);
        assert!(cache.slices[0].lock().is_empty());

        // The slot is erased, so a stale queued request does nothing.
        cache.maybe_serialize(root.dxyz()).unwrap();
        assert_eq!(cache.info.lock().written, 1);
        assert_eq!(out.len(), 1);

        // A reclaimed chunk is off limits too.
        insert_one(&cache, &root, &mut pruner, Point3::fill(10.0));
        cache.maybe_serialize(root.dxyz()).unwrap();
        assert_eq!(cache.info.lock().written, 1);

        drop(pruner);
        cache.shutdown().unwrap();
        assert_eq!(hierarchy.get(&root.dxyz()), 3);
    }

    #[test]
    fn concurrent_first_touch_loads_once() {
        let (hierarchy, out, tmp, cache) = rig(4);
        let root = root_key(4);

        // Seed remote content as if from an earlier build.
        let seed = Chunk::new(root);
        let key = Key::new(root.bounds());
        for i in 0..3 {
            assert!(seed.insert(
                &Voxel::new(Point3::new(4.0 * i as f64 + 2.0, 2.0, 2.0)),
                &key
            ));
        }
        seed.save(&*out, &*tmp).unwrap();
        hierarchy.set(root.dxyz(), 3);

        const THREADS: usize = 8;
        let ready = Barrier::new(THREADS + 1);
        let done = Barrier::new(THREADS + 1);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    let mut pruner = Pruner::new(Arc::clone(&cache));
                    let chunk = cache.add_ref(&root, &mut pruner).unwrap();
                    assert_eq!(chunk.np(), 3);
                    ready.wait();
                    done.wait();
                });
            }

            ready.wait();
            // All threads hold their refs: one emplace, one load, N refs.
            {
                let slice = cache.slices[0].lock();
                assert_eq!(slice.len(), 1);
                let reffed = slice.get(&root.position()).unwrap();
                assert_eq!(reffed.state.lock().count(), THREADS as u64);
            }
            assert_eq!(cache.info.lock().read, 1);
            done.wait();
        });

        cache.shutdown().unwrap();
        assert_eq!(hierarchy.get(&root.dxyz()), 3);
    }

    #[test]
    fn insert_races_a_zero_cap_purger_without_losing_points() {
        let (hierarchy, _out, _tmp, cache) = rig(0);
        let root = root_key(2);

        thread::scope(|s| {
            s.spawn(|| {
                let mut pruner = Pruner::new(Arc::clone(&cache));
                let mut rng = Lcg::new(11);
                for i in 0..400 {
                    insert_one(&cache, &root, &mut pruner, rng.point(16.0));
                    if i % 50 == 49 {
                        pruner.clip();
                    }
                }
            });
            s.spawn(|| {
                for _ in 0..200 {
                    cache.maybe_purge(0);
                    thread::yield_now();
                }
            });
        });

        cache.shutdown().unwrap();
        let total: u64 = hierarchy.entries().iter().map(|(_, np)| *np).sum();
        assert_eq!(total, 400);
        assert_eq!(cache.latch_info().alive, 0);
    }

    #[test]
    fn purge_under_contention_respects_the_cap() {
        let (hierarchy, _out, _tmp, cache) = rig(3);
        let root = root_key(2);

        thread::scope(|s| {
            for seed in [3u64, 17] {
                let cache = &cache;
                s.spawn(move || {
                    let mut pruner = Pruner::new(Arc::clone(cache));
                    let mut rng = Lcg::new(seed);
                    for i in 0..300 {
                        insert_one(cache, &root, &mut pruner, rng.point(16.0));
                        if i % 64 == 63 {
                            pruner.clip();
                        }
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..100 {
                    cache.maybe_purge(3);
                    thread::yield_now();
                }
            });
        });

        cache.maybe_purge(3);
        assert!(cache.owned.lock().len() <= 3);

        cache.shutdown().unwrap();
        let total: u64 = hierarchy.entries().iter().map(|(_, np)| *np).sum();
        assert_eq!(total, 600);
    }
}
