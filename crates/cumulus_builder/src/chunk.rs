use crate::{Endpoint, Result, Voxel};

use cumulus_core::{ChunkKey, Key, Point3};

use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::io;

/// LZ4 level for chunk blobs. Chunk payloads are float-heavy and cold, so the
/// slower, more aggressive end of the scale pays for itself.
const LZ4_LEVEL: u32 = 10;

fn compress_bytes(mut bytes: impl io::Read, compressed: impl io::Write) -> io::Result<()> {
    let mut encoder = lz4::EncoderBuilder::new().level(LZ4_LEVEL).build(compressed)?;
    io::copy(&mut bytes, &mut encoder)?;
    let (_output, result) = encoder.finish();

    result
}

fn decompress_bytes(compressed: impl io::Read, mut bytes: impl io::Write) -> io::Result<()> {
    let mut decoder = lz4::Decoder::new(compressed)?;
    io::copy(&mut decoder, &mut bytes)?;
    Ok(())
}

/// The resident payload of one octree node: a `span^3` cell grid over the
/// node's bounds, holding at most one voxel per cell.
///
/// A voxel whose cell is already occupied is rejected, and the caller sends
/// it one depth down, where cells are half the size. That rule is the entire
/// octree construction: each depth is a complete sampling of its subtree at
/// that depth's resolution.
///
/// The grid sits behind its own lock so that ingest threads sharing a chunk
/// coordinate here, not in the cache.
pub struct Chunk {
    key: ChunkKey,
    cells: Mutex<FnvHashMap<u64, Voxel>>,
}

impl Chunk {
    pub fn new(key: ChunkKey) -> Self {
        Self {
            key,
            cells: Mutex::new(FnvHashMap::default()),
        }
    }

    #[inline]
    pub fn key(&self) -> ChunkKey {
        self.key
    }

    /// The name of this chunk's blob on the output endpoint.
    pub fn blob_name(&self) -> String {
        format!("{}.bin", self.key.dxyz())
    }

    /// The number of resident points.
    pub fn np(&self) -> u64 {
        self.cells.lock().len() as u64
    }

    /// The flattened index of the grid cell containing `p`.
    fn cell_of(&self, p: Point3) -> u64 {
        let bounds = self.key.bounds();
        let span = self.key.span();
        let cell_width = bounds.width() / span as f64;

        let axis = |offset: f64| ((offset / cell_width) as u64).min(span - 1);
        let rel = p - bounds.min();
        (axis(rel.z.max(0.0)) * span + axis(rel.y.max(0.0))) * span + axis(rel.x.max(0.0))
    }

    /// Try to place `voxel` in its cell. False means the cell is taken and
    /// the point overflows to the next depth; there is no other failure mode.
    pub fn insert(&self, voxel: &Voxel, key: &Key) -> bool {
        debug_assert_eq!(key.depth(), self.key.depth());
        debug_assert!(self.key.bounds().contains(&voxel.point()));

        let mut cells = self.cells.lock();
        let cell = self.cell_of(voxel.point());
        if cells.contains_key(&cell) {
            return false;
        }
        cells.insert(cell, voxel.clone());

        true
    }

    /// Persist the resident points: bincode, then LZ4, staged on `tmp` and
    /// published to `out`. Returns the persisted point count.
    pub fn save(&self, out: &dyn Endpoint, tmp: &dyn Endpoint) -> Result<u64> {
        let voxels: Vec<Voxel> = {
            let cells = self.cells.lock();
            let mut entries: Vec<_> = cells.iter().collect();
            // Cell order, so identical contents produce identical blobs.
            entries.sort_by_key(|(cell, _)| **cell);
            entries.into_iter().map(|(_, v)| v.clone()).collect()
        };
        let np = voxels.len() as u64;

        let encoded = bincode::serialize(&voxels)?;
        let mut compressed = Vec::new();
        compress_bytes(encoded.as_slice(), &mut compressed)?;

        let name = self.blob_name();
        tmp.put(&name, &compressed)?;
        out.put(&name, &compressed)?;
        tmp.del(&name)?;

        Ok(np)
    }

    /// Restore `np` previously saved points from `out`. The chunk must be
    /// empty: this only runs on a freshly assigned resident.
    pub fn load(&self, out: &dyn Endpoint, _tmp: &dyn Endpoint, np: u64) -> Result<()> {
        let compressed = out.get(&self.blob_name())?;
        let mut encoded = Vec::new();
        decompress_bytes(compressed.as_slice(), &mut encoded)?;
        let voxels: Vec<Voxel> = bincode::deserialize(&encoded)?;

        let mut cells = self.cells.lock();
        assert!(cells.is_empty());
        for voxel in voxels {
            let cell = self.cell_of(voxel.point());
            let prev = cells.insert(cell, voxel);
            assert!(prev.is_none());
        }
        assert_eq!(cells.len() as u64, np);

        Ok(())
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
