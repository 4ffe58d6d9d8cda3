pub use sled;

use crate::{Error, Result};

use fnv::FnvHashMap;
use parking_lot::Mutex;
use sled::Tree;
use std::fs;
use std::io;
use std::path::PathBuf;

/// An opaque blob target. The cache writes chunk payloads to one endpoint
/// (`out`), stages in-flight bytes on another (`tmp`), and never cares what
/// sits behind either.
///
/// Implementations must be internally thread-safe; `put` and `get` are called
/// concurrently from ingest threads and the I/O pool.
pub trait Endpoint: Send + Sync {
    /// Store `bytes` under `name`, replacing any previous blob.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch the blob named `name`. A missing blob is `Error::MissingBlob`.
    fn get(&self, name: &str) -> Result<Vec<u8>>;

    /// Remove the blob named `name`. Removing a missing blob is fine.
    fn del(&self, name: &str) -> Result<()>;
}

/// Blobs as files under a directory.
pub struct DirectoryEndpoint {
    root: PathBuf,
}

impl DirectoryEndpoint {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl Endpoint for DirectoryEndpoint {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        // Write-then-rename so a concurrent `get` never observes a torn blob.
        let staged = self.root.join(format!("{name}.partial"));
        fs::write(&staged, bytes)?;
        fs::rename(&staged, self.root.join(name))?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        match fs::read(self.root.join(name)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::MissingBlob(name.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn del(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.root.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Blobs in a [`sled::Tree`], for a crash-consistent local store.
pub struct SledEndpoint {
    tree: Tree,
}

impl SledEndpoint {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }
}

impl Endpoint for SledEndpoint {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.tree.insert(name, bytes)?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.tree
            .get(name)?
            .map(|ivec| ivec.to_vec())
            .ok_or_else(|| Error::MissingBlob(name.to_owned()))
    }

    fn del(&self, name: &str) -> Result<()> {
        self.tree.remove(name)?;
        Ok(())
    }
}

/// Blobs in a map. Keeps tests off the filesystem.
#[derive(Default)]
pub struct MemoryEndpoint {
    blobs: Mutex<FnvHashMap<String, Vec<u8>>>,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// The names of every stored blob, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.blobs.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

impl Endpoint for MemoryEndpoint {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.lock().insert(name.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingBlob(name.to_owned()))
    }

    fn del(&self, name: &str) -> Result<()> {
        self.blobs.lock().remove(name);
        Ok(())
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
