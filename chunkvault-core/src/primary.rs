use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{self, ChunkReader};
use crate::error::{Result, VaultError};
use crate::manifest::{ChunkId, ChunkManifest, OwnerId};

const CHUNK_EXT: &str = "chunk";

/// Root of the primary tier: one directory per owner below `root`.
#[derive(Clone, Debug)]
pub struct PrimaryTier {
    root: PathBuf,
}

impl PrimaryTier {
    /// Create the tier root if needed. Idempotent; call once at startup.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self { root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chunk store of `owner`. No other owner's chunks are reachable from it.
    pub fn namespace(&self, owner: &OwnerId) -> PrimaryStore {
        PrimaryStore { dir: self.root.join(owner.namespace()) }
    }
}

/// One owner's chunk directory on the primary tier.
#[derive(Clone, Debug)]
pub struct PrimaryStore {
    dir: PathBuf,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PrimaryUsage {
    pub total_bytes: u64,
    pub chunk_count: u64,
}

#[derive(Clone, Debug, Default)]
pub struct DeleteReport {
    pub removed: usize,
    pub failed: Vec<ChunkId>,
}

impl PrimaryStore {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Write a new chunk. Existing ids are never overwritten; a failed write
    /// leaves no partial file behind.
    pub fn persist(&self, id: &ChunkId, bytes: &[u8]) -> Result<()> {
        let path = self.chunk_path(id);
        let write_failed =
            |source: std::io::Error| VaultError::PrimaryWriteFailed { chunk: id.clone(), source };
        let mut f = match create_new(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(VaultError::ChunkCollision(id.clone()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&self.dir).map_err(write_failed)?;
                create_new(&path).map_err(write_failed)?
            }
            Err(e) => return Err(write_failed(e)),
        };
        if let Err(e) = f.write_all(bytes).and_then(|_| f.sync_data()) {
            drop(f);
            let _ = fs::remove_file(&path);
            return Err(write_failed(e));
        }
        Ok(())
    }

    pub fn retrieve(&self, id: &ChunkId) -> Result<Vec<u8>> {
        match fs::read(self.chunk_path(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(VaultError::ChunkNotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, id: &ChunkId) -> bool {
        self.chunk_path(id).is_file()
    }

    /// Ids of `manifest` absent from this namespace, in manifest order.
    pub fn missing(&self, manifest: &ChunkManifest) -> Vec<ChunkId> {
        codec::verify_presence(manifest, |id| self.exists(id))
    }

    /// Remove chunks. Absent ids count as removed; other failures are logged
    /// and reported, never raised.
    pub fn delete(&self, ids: &[ChunkId]) -> DeleteReport {
        let mut report = DeleteReport::default();
        for id in ids {
            match fs::remove_file(self.chunk_path(id)) {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => report.removed += 1,
                Err(e) => {
                    warn!(chunk = %id, error = %e, "failed to delete primary chunk");
                    report.failed.push(id.clone());
                }
            }
        }
        debug!(
            dir = ?self.dir,
            removed = report.removed,
            failed = report.failed.len(),
            "primary delete"
        );
        report
    }

    /// Scan the namespace. Diagnostics only: cost is linear in chunk count.
    pub fn usage(&self) -> Result<PrimaryUsage> {
        let mut usage = PrimaryUsage::default();
        if !self.dir.is_dir() {
            return Ok(usage);
        }
        for ent in walkdir::WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let ent = ent.map_err(|e| VaultError::Io(e.into()))?;
            if !ent.file_type().is_file() {
                continue;
            }
            if ent.path().extension().map(|s| s == CHUNK_EXT).unwrap_or(false) {
                usage.total_bytes += ent.metadata().map_err(|e| VaultError::Io(e.into()))?.len();
                usage.chunk_count += 1;
            }
        }
        Ok(usage)
    }
}

impl ChunkReader for PrimaryStore {
    fn read_chunk(&self, id: &ChunkId) -> Result<Vec<u8>> {
        self.retrieve(id)
    }
}

fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}
