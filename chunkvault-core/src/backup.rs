//! Secondary redundancy tier.
//!
//! Per-owner layout below the backend root:
//!
//! ```text
//! user_<owner>/
//! ├── files/<stored name>              whole-file snapshots
//! ├── metadata/<stored name>.json      snapshot sidecars
//! └── chunks/<file id>/<chunk>.chunk   chunk mirrors, grouped per file
//! ```
//!
//! Backup is advisory: every operation logs and swallows backend failures and
//! answers with an empty or negative result instead of an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::BackupBackend;
use crate::codec::ChunkReader;
use crate::error::VaultError;
use crate::manifest::{ChunkId, FileId, OwnerId};
use crate::naming;
use crate::primary::PrimaryStore;

/// Backup tier handle; cheap to clone. Built without a backend it is the
/// valid "no redundancy" mode.
#[derive(Clone, Default)]
pub struct BackupTier {
    backend: Option<Arc<dyn BackupBackend>>,
}

impl BackupTier {
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn new(backend: Arc<dyn BackupBackend>) -> Self {
        Self { backend: Some(backend) }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub fn namespace(&self, owner: &OwnerId) -> BackupStore {
        BackupStore { backend: self.backend.clone(), base: owner.namespace() }
    }
}

impl std::fmt::Debug for BackupTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupTier").field("configured", &self.is_configured()).finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BackupUsage {
    pub total_bytes: u64,
    pub file_count: u64,
    pub chunk_count: u64,
}

/// One owner's view of the backup tier.
pub struct BackupStore {
    backend: Option<Arc<dyn BackupBackend>>,
    base: String,
}

impl BackupStore {
    /// Callers check this before anything else; every other method is a
    /// no-op returning a negative result when it is false.
    pub fn is_enabled(&self) -> bool {
        self.backend.as_ref().map(|b| b.is_reachable()).unwrap_or(false)
    }

    fn live(&self) -> Option<&dyn BackupBackend> {
        match &self.backend {
            Some(b) if b.is_reachable() => Some(b.as_ref()),
            _ => None,
        }
    }

    fn file_key(&self, name: &str) -> String {
        format!("{}/files/{}", self.base, name)
    }

    fn sidecar_key(&self, name: &str) -> String {
        format!("{}/metadata/{}.json", self.base, name)
    }

    fn group_prefix(&self, group: &FileId) -> String {
        format!("{}/chunks/{}", self.base, group)
    }

    fn chunk_key(&self, group: &FileId, id: &ChunkId) -> String {
        format!("{}/{}", self.group_prefix(group), id.file_name())
    }

    /// Store a whole-file snapshot and its metadata sidecar. Returns the
    /// snapshot locator, or `None` on any failure.
    pub fn mirror_file(
        &self,
        bytes: &[u8],
        name: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Option<String> {
        let backend = self.live()?;
        let attempt = || -> Result<String, VaultError> {
            naming::validate_component(name)?;
            let key = self.file_key(name);
            backend.put(&key, bytes)?;
            backend.put(&self.sidecar_key(name), &serde_json::to_vec_pretty(metadata)?)?;
            Ok(backend.locator(&key))
        };
        match attempt() {
            Ok(locator) => {
                debug!(name, bytes = bytes.len(), "mirrored file snapshot");
                Some(locator)
            }
            Err(e) => {
                warn!(name, error = %e, "failed to mirror file snapshot");
                None
            }
        }
    }

    /// Read a snapshot back.
    pub fn fetch_file(&self, name: &str) -> Option<Vec<u8>> {
        let backend = self.live()?;
        if naming::validate_component(name).is_err() {
            return None;
        }
        match backend.get(&self.file_key(name)) {
            Ok(data) => data,
            Err(e) => {
                warn!(name, error = %e, "failed to fetch file snapshot");
                None
            }
        }
    }

    pub fn list_files(&self) -> Vec<String> {
        let Some(backend) = self.live() else {
            return Vec::new();
        };
        let prefix = format!("{}/files", self.base);
        match backend.list(&prefix) {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|(k, _)| k.strip_prefix(&format!("{prefix}/")).map(str::to_string))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list backup files");
                Vec::new()
            }
        }
    }

    /// Copy the current primary bytes of `ids` into the mirror group `group`.
    /// Re-mirroring overwrites identical bytes. Returns false if any chunk
    /// could not be read or written.
    pub fn mirror_chunks<R>(&self, ids: &[ChunkId], source: &R, group: &FileId) -> bool
    where
        R: ChunkReader + ?Sized,
    {
        let Some(backend) = self.live() else {
            return false;
        };
        let mut ok = true;
        for id in ids {
            let res = source
                .read_chunk(id)
                .and_then(|bytes| backend.put(&self.chunk_key(group, id), &bytes));
            if let Err(e) = res {
                warn!(chunk = %id, group = %group, error = %e, "failed to mirror chunk");
                ok = false;
            }
        }
        debug!(group = %group, chunks = ids.len(), ok, "mirrored chunks");
        ok
    }

    /// Ids of `ids` that have a mirror in `group`.
    pub fn mirrored(&self, ids: &[ChunkId], group: &FileId) -> Vec<ChunkId> {
        let Some(backend) = self.live() else {
            return Vec::new();
        };
        ids.iter()
            .filter(|id| backend.exists(&self.chunk_key(group, id)).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Copy mirrored chunks back into `primary`. Returns exactly the ids that
    /// are present in `primary` afterwards because of this call; ids without a
    /// mirror are skipped.
    pub fn restore_chunks(
        &self,
        ids: &[ChunkId],
        group: &FileId,
        primary: &PrimaryStore,
    ) -> Vec<ChunkId> {
        let Some(backend) = self.live() else {
            return Vec::new();
        };
        let mut restored = Vec::new();
        for id in ids {
            let bytes = match backend.get(&self.chunk_key(group, id)) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    warn!(chunk = %id, group = %group, error = %e, "failed to read chunk mirror");
                    continue;
                }
            };
            match primary.persist(id, &bytes) {
                Ok(()) | Err(VaultError::ChunkCollision(_)) => restored.push(id.clone()),
                Err(e) => warn!(chunk = %id, error = %e, "failed to restore chunk into primary"),
            }
        }
        debug!(group = %group, requested = ids.len(), restored = restored.len(), "restored chunks");
        restored
    }

    /// Remove a snapshot and its sidecar.
    pub fn delete_file(&self, name: &str) -> bool {
        let Some(backend) = self.live() else {
            return false;
        };
        if naming::validate_component(name).is_err() {
            return false;
        }
        let res = backend
            .delete(&self.file_key(name))
            .and_then(|_| backend.delete(&self.sidecar_key(name)));
        match res {
            Ok(()) => true,
            Err(e) => {
                warn!(name, error = %e, "failed to delete backup snapshot");
                false
            }
        }
    }

    /// Remove a whole mirror group.
    pub fn delete_chunks(&self, group: &FileId) -> bool {
        let Some(backend) = self.live() else {
            return false;
        };
        match backend.delete_prefix(&self.group_prefix(group)) {
            Ok(()) => true,
            Err(e) => {
                warn!(group = %group, error = %e, "failed to delete chunk mirrors");
                false
            }
        }
    }

    /// Diagnostics scan of this owner's snapshots and mirrors.
    pub fn usage(&self) -> BackupUsage {
        let mut usage = BackupUsage::default();
        let Some(backend) = self.live() else {
            return usage;
        };
        match backend.list(&format!("{}/files", self.base)) {
            Ok(files) => {
                for (_, len) in files {
                    usage.total_bytes += len;
                    usage.file_count += 1;
                }
            }
            Err(e) => warn!(error = %e, "failed to scan backup files"),
        }
        match backend.list(&format!("{}/chunks", self.base)) {
            Ok(chunks) => {
                for (_, len) in chunks {
                    usage.total_bytes += len;
                    usage.chunk_count += 1;
                }
            }
            Err(e) => warn!(error = %e, "failed to scan backup chunks"),
        }
        usage
    }
}
