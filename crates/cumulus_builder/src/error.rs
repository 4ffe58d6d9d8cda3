use thiserror::Error;

/// Failures surfaced by the cache and its collaborators.
///
/// These are all I/O-shaped: they propagate to the driver so it can abort the
/// build. Violations of the cache's internal invariants are bugs, not errors,
/// and assert instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("endpoint I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob store: {0}")]
    Blob(#[from] sled::Error),

    #[error("chunk encoding: {0}")]
    ChunkEncoding(#[from] bincode::Error),

    #[error("hierarchy encoding: {0}")]
    HierarchyEncoding(#[from] serde_json::Error),

    #[error("corrupt hierarchy: {0}")]
    CorruptHierarchy(#[from] cumulus_core::ParseDxyzError),

    #[error("missing blob: {0}")]
    MissingBlob(String),
}

pub type Result<T> = std::result::Result<T, Error>;
