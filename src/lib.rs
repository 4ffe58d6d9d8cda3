//! Concurrent point cloud indexing into an octree of remotely persisted
//! chunks.
//!
//! The member crates:
//! - `cumulus_core`: the geometry of descent (points, bounds, node keys)
//! - `cumulus_builder`: the reference-counted, write-behind chunk cache and
//!   its collaborators (chunks, hierarchy, endpoints, the I/O pool)
//!
//! The shape of an ingest loop:
//!
//! ```
//! use cumulus::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> cumulus::Result<()> {
//! let out = Arc::new(MemoryEndpoint::new());
//! let tmp = Arc::new(MemoryEndpoint::new());
//! let hierarchy = Arc::new(Hierarchy::load(&*out)?);
//! let pool = Arc::new(IoPool::new(2));
//!
//! let cache = ChunkCache::new(
//!     Arc::clone(&hierarchy),
//!     pool,
//!     Arc::clone(&out) as Arc<dyn Endpoint>,
//!     Arc::clone(&tmp) as Arc<dyn Endpoint>,
//!     64,
//! );
//!
//! let root = ChunkKey::root(Bounds::cube(Point3::ZERO, Point3::fill(16.0)), 128);
//! let mut pruner = Pruner::new(Arc::clone(&cache));
//! for p in [Point3::new(1.0, 2.0, 3.0), Point3::new(9.0, 4.0, 1.0)] {
//!     let mut key = Key::new(root.bounds());
//!     cache.insert(&Voxel::new(p), &mut key, &root, &mut pruner)?;
//! }
//!
//! drop(pruner);
//! cache.maybe_purge(cache.cache_size());
//! cache.shutdown()?;
//! hierarchy.save(&*out)?;
//! # Ok(())
//! # }
//! ```

pub use cumulus_builder;
pub use cumulus_core;

pub use cumulus_builder::{
    Chunk, ChunkCache, DirectoryEndpoint, Endpoint, Error, Hierarchy, Info, IoPool,
    MemoryEndpoint, Pruner, Result, SledEndpoint, Voxel, MAX_DEPTH,
};
pub use cumulus_core::{Bounds, ChunkKey, Dir, Dxyz, Key, ParseDxyzError, Point3, Xyz};

pub mod prelude {
    pub use cumulus_builder::prelude::*;
    pub use cumulus_core::prelude::*;
}
