use crate::{Endpoint, Result};

use cumulus_core::Dxyz;

use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::info;

/// The persistent record of how many points each saved chunk holds.
///
/// This is what survives between builds: a reopened cache consults it to know
/// which chunks have remote content worth reanimating, and every successful
/// chunk save updates it. Updates are atomic per key.
#[derive(Default)]
pub struct Hierarchy {
    counts: Mutex<FnvHashMap<Dxyz, u64>>,
}

impl Hierarchy {
    const BLOB: &'static str = "hierarchy.json";

    pub fn new() -> Self {
        Self::default()
    }

    /// The persisted point count for `dxyz`, or 0 if the chunk has never been
    /// saved.
    pub fn get(&self, dxyz: &Dxyz) -> u64 {
        self.counts.lock().get(dxyz).copied().unwrap_or(0)
    }

    /// Record that `dxyz` now holds `np` persisted points. Saved chunks are
    /// never empty.
    pub fn set(&self, dxyz: Dxyz, np: u64) {
        assert!(np > 0);
        self.counts.lock().insert(dxyz, np);
    }

    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.lock().is_empty()
    }

    /// A snapshot of every `(dxyz, np)` entry, in key order.
    pub fn entries(&self) -> Vec<(Dxyz, u64)> {
        let mut entries: Vec<_> = self
            .counts
            .lock()
            .iter()
            .map(|(dxyz, np)| (*dxyz, *np))
            .collect();
        entries.sort();
        entries
    }

    /// Restore the hierarchy stored on `endpoint`. A missing blob is a fresh
    /// build and loads empty.
    pub fn load(endpoint: &dyn Endpoint) -> Result<Self> {
        let bytes = match endpoint.get(Self::BLOB) {
            Ok(bytes) => bytes,
            Err(crate::Error::MissingBlob(_)) => return Ok(Self::new()),
            Err(e) => return Err(e),
        };

        let named: BTreeMap<String, u64> = serde_json::from_slice(&bytes)?;
        let mut counts = FnvHashMap::default();
        for (name, np) in named {
            counts.insert(name.parse::<Dxyz>()?, np);
        }
        info!(entries = counts.len(), "loaded hierarchy");

        Ok(Self {
            counts: Mutex::new(counts),
        })
    }

    /// Persist every entry to `endpoint`, keyed by `d-x-y-z` name.
    pub fn save(&self, endpoint: &dyn Endpoint) -> Result<()> {
        let named: BTreeMap<String, u64> = self
            .counts
            .lock()
            .iter()
            .map(|(dxyz, np)| (dxyz.to_string(), *np))
            .collect();
        let bytes = serde_json::to_vec_pretty(&named)?;
        endpoint.put(Self::BLOB, &bytes)?;
        info!(entries = named.len(), "saved hierarchy");

        Ok(())
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
