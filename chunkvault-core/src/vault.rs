//! Recovery orchestration over the primary tier, the backup tier and the
//! record store.
//!
//! * upload: split and persist every chunk (all or nothing on the primary
//!   tier), save the record, then mirror snapshot and chunks to backup on a
//!   best-effort basis.
//! * download: restore whatever the primary tier lost from the backup mirror,
//!   reconstruct, and check the whole-file checksum before returning bytes.
//! * delete: release chunks on both tiers, then drop the record.
//!
//! Every operation that touches one file runs under that file's lock.

use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::LocalDirBackend;
use crate::backup::{BackupStore, BackupTier, BackupUsage};
use crate::cancel::CancelToken;
use crate::codec;
use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::locks::FileLocks;
use crate::manifest::{ChunkId, FileId, FileRecord, OwnerId};
use crate::naming;
use crate::primary::{PrimaryStore, PrimaryTier, PrimaryUsage};
use crate::records::{JsonRecordStore, RecordStore};

/// Backup outcome of an upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    Synced { locator: String },
    /// No backup tier configured.
    Disabled,
    /// Backup configured but the mirror did not complete; the upload itself
    /// succeeded.
    Unavailable { reason: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct UploadReport {
    pub file_id: FileId,
    pub original_name: String,
    pub size: u64,
    pub chunk_count: usize,
    pub checksum: String,
    pub sync: SyncStatus,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeleteOutcome {
    pub file_id: FileId,
    /// Primary chunks that could not be removed.
    pub primary_failed: Vec<ChunkId>,
    /// False when backup copies of the file may remain.
    pub backup_cleaned: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    pub file_id: FileId,
    pub chunk_count: usize,
    pub missing_primary: Vec<ChunkId>,
    /// Subset of `missing_primary` with a backup mirror.
    pub recoverable: Vec<ChunkId>,
    /// Checked only when no chunk is missing.
    pub checksum_ok: Option<bool>,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.missing_primary.is_empty() && self.checksum_ok == Some(true)
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable.len() == self.missing_primary.len()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct UsageReport {
    pub owner: OwnerId,
    pub file_count: usize,
    pub primary: PrimaryUsage,
    pub backup_enabled: bool,
    pub backup: Option<BackupUsage>,
}

pub struct Vault {
    chunk_size: usize,
    primary: PrimaryTier,
    backup: BackupTier,
    records: Box<dyn RecordStore>,
    locks: FileLocks,
}

impl Vault {
    /// Validate `cfg` and prepare both tiers and the record store. Call once
    /// at startup.
    pub fn open(cfg: &VaultConfig) -> Result<Self> {
        cfg.validate()?;
        let primary = PrimaryTier::open(&cfg.storage_path)?;
        let records = JsonRecordStore::init(&cfg.storage_path)?;
        let backup = match &cfg.backup_path {
            None => BackupTier::disabled(),
            Some(root) => {
                if let Err(e) = std::fs::create_dir_all(root) {
                    warn!(root = ?root, error = %e, "backup root not reachable; running without redundancy");
                }
                BackupTier::new(Arc::new(LocalDirBackend::new(root)))
            }
        };
        info!(
            storage = ?cfg.storage_path,
            backup = ?cfg.backup_path,
            chunk_size = cfg.chunk_size,
            "vault opened"
        );
        Self::with_parts(cfg.chunk_size, primary, backup, Box::new(records))
    }

    pub fn with_parts(
        chunk_size: usize,
        primary: PrimaryTier,
        backup: BackupTier,
        records: Box<dyn RecordStore>,
    ) -> Result<Self> {
        codec::validate_chunk_size(chunk_size)?;
        Ok(Self { chunk_size, primary, backup, records, locks: FileLocks::new() })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn primary(&self) -> &PrimaryTier {
        &self.primary
    }

    pub fn backup(&self) -> &BackupTier {
        &self.backup
    }

    /// Record `id` if it belongs to `owner`. Records of other owners are
    /// reported as absent.
    pub fn record(&self, owner: &OwnerId, id: &FileId) -> Result<FileRecord> {
        match self.records.get(id)? {
            Some(rec) if &rec.owner == owner => Ok(rec),
            _ => Err(VaultError::RecordNotFound(id.clone())),
        }
    }

    pub fn list(&self, owner: &OwnerId) -> Result<Vec<FileRecord>> {
        self.records.list(owner)
    }

    pub fn upload<R: Read>(&self, owner: &OwnerId, name: &str, reader: R) -> Result<UploadReport> {
        let file_id = FileId::generate();
        let _guard = self.locks.lock(owner, &file_id);
        let primary = self.primary.namespace(owner);

        let mut written: Vec<ChunkId> = Vec::new();
        let split = codec::split_with(reader, self.chunk_size, |id, bytes| {
            primary.persist(id, bytes)?;
            written.push(id.clone());
            Ok(())
        });
        let split = match split {
            Ok(split) => split,
            Err(e) => {
                rollback(&primary, &written);
                warn!(owner = %owner, name, error = %e, "upload failed; chunks rolled back");
                return Err(e);
            }
        };

        let mut record = FileRecord {
            stored_name: format!("{}_{}", file_id, naming::secure_file_name(name)),
            id: file_id,
            owner: owner.clone(),
            original_name: name.to_string(),
            chunk_count: split.manifest.len(),
            chunks: split.manifest,
            chunk_size: self.chunk_size,
            size: split.size,
            checksum: split.checksum,
            synced: false,
            backup_locator: None,
            created_utc: chrono::Utc::now().to_rfc3339(),
            synced_utc: None,
        };
        if let Err(e) = self.records.put(&record) {
            rollback(&primary, record.chunks.ids());
            return Err(e);
        }

        let backup = self.backup.namespace(owner);
        let sync = if !self.backup.is_configured() {
            SyncStatus::Disabled
        } else {
            // On failure the stored record still says unsynced; drop whatever
            // part of the mirror was written so nothing in backup outlives it.
            match self.mirror(&mut record, &primary, &backup) {
                Ok(locator) => match self.records.put(&record) {
                    Ok(()) => SyncStatus::Synced { locator },
                    Err(e) => {
                        discard_mirror(&backup, &record);
                        SyncStatus::Unavailable { reason: format!("record update failed: {e}") }
                    }
                },
                Err(reason) => {
                    discard_mirror(&backup, &record);
                    SyncStatus::Unavailable { reason }
                }
            }
        };
        if let SyncStatus::Unavailable { reason } = &sync {
            let warning = VaultError::BackupUnavailable(reason.clone());
            warn!(file = %record.id, "{warning}");
        }

        info!(
            owner = %owner,
            file = %record.id,
            size = record.size,
            chunks = record.chunk_count,
            synced = record.synced,
            "file uploaded"
        );
        Ok(UploadReport {
            file_id: record.id,
            original_name: record.original_name,
            size: record.size,
            chunk_count: record.chunk_count,
            checksum: record.checksum,
            sync,
        })
    }

    /// Reconstruct a file, restoring lost primary chunks from backup first.
    /// Never returns bytes that fail the recorded checksum.
    pub fn download(&self, owner: &OwnerId, id: &FileId, cancel: &CancelToken) -> Result<Vec<u8>> {
        let _guard = self.locks.lock(owner, id);
        let record = self.record(owner, id)?;
        let primary = self.primary.namespace(owner);
        let backup = self.backup.namespace(owner);
        let bytes = self.read_verified(&record, &primary, &backup, cancel)?;
        info!(owner = %owner, file = %id, size = bytes.len(), "file downloaded");
        Ok(bytes)
    }

    pub fn delete(&self, owner: &OwnerId, id: &FileId) -> Result<DeleteOutcome> {
        let _guard = self.locks.lock(owner, id);
        let record = self.record(owner, id)?;

        let report = self.primary.namespace(owner).delete(record.chunks.ids());
        if !report.failed.is_empty() {
            warn!(file = %id, failed = report.failed.len(), "some primary chunks were not removed");
        }

        // Unsynced files may still have copies from an interrupted mirror.
        let backup = self.backup.namespace(owner);
        let backup_cleaned =
            if backup.is_enabled() { discard_mirror(&backup, &record) } else { !record.synced };
        if !backup_cleaned {
            warn!(file = %id, "backup copies of deleted file were not removed");
        }

        self.records.remove(&record.id)?;
        info!(owner = %owner, file = %id, "file deleted");
        Ok(DeleteOutcome { file_id: record.id, primary_failed: report.failed, backup_cleaned })
    }

    /// Mirror an existing file to backup on request. Unlike the upload path,
    /// an unavailable backup tier is an error here.
    pub fn sync(&self, owner: &OwnerId, id: &FileId) -> Result<FileRecord> {
        let _guard = self.locks.lock(owner, id);
        let mut record = self.record(owner, id)?;
        let backup = self.backup.namespace(owner);
        if !backup.is_enabled() {
            return Err(VaultError::BackupUnavailable("backup tier is not configured or unreachable".into()));
        }
        let primary = self.primary.namespace(owner);
        self.ensure_present(&record, &primary, &backup)?;
        let was_synced = record.synced;
        let res = self
            .mirror(&mut record, &primary, &backup)
            .map_err(VaultError::BackupUnavailable)
            .and_then(|_| self.records.put(&record));
        if let Err(e) = res {
            // A previously synced file keeps its older, still valid mirror.
            if !was_synced {
                discard_mirror(&backup, &record);
            }
            return Err(e);
        }
        info!(owner = %owner, file = %id, "file synced to backup");
        Ok(record)
    }

    /// Inspect a file without repairing it.
    pub fn verify(&self, owner: &OwnerId, id: &FileId) -> Result<VerifyReport> {
        let _guard = self.locks.lock(owner, id);
        let record = self.record(owner, id)?;
        let primary = self.primary.namespace(owner);
        let backup = self.backup.namespace(owner);

        let missing_primary = primary.missing(&record.chunks);
        let recoverable = if missing_primary.is_empty() {
            Vec::new()
        } else {
            backup.mirrored(&missing_primary, &record.id)
        };
        let checksum_ok = if missing_primary.is_empty() {
            let bytes = codec::reconstruct(&record.chunks, &primary, &CancelToken::new())?;
            Some(codec::checksum(&bytes) == record.checksum)
        } else {
            None
        };
        Ok(VerifyReport {
            file_id: record.id,
            chunk_count: record.chunk_count,
            missing_primary,
            recoverable,
            checksum_ok,
        })
    }

    /// Diagnostics: scans the owner's namespaces on both tiers.
    pub fn usage(&self, owner: &OwnerId) -> Result<UsageReport> {
        let primary = self.primary.namespace(owner).usage()?;
        let backup = self.backup.namespace(owner);
        let backup_enabled = backup.is_enabled();
        Ok(UsageReport {
            owner: owner.clone(),
            file_count: self.records.list(owner)?.len(),
            primary,
            backup_enabled,
            backup: backup_enabled.then(|| backup.usage()),
        })
    }

    /// Bring every chunk of `record` back into `primary`, pulling from the
    /// backup mirror when possible.
    fn ensure_present(
        &self,
        record: &FileRecord,
        primary: &PrimaryStore,
        backup: &BackupStore,
    ) -> Result<()> {
        let missing = primary.missing(&record.chunks);
        if missing.is_empty() {
            return Ok(());
        }
        warn!(file = %record.id, missing = missing.len(), "primary chunks missing");
        let still_missing = if backup.is_enabled() {
            let restored: HashSet<ChunkId> =
                backup.restore_chunks(&missing, &record.id, primary).into_iter().collect();
            info!(file = %record.id, restored = restored.len(), "restored chunks from backup");
            missing.into_iter().filter(|id| !restored.contains(id)).collect()
        } else {
            missing
        };
        if !still_missing.is_empty() {
            return Err(VaultError::IrrecoverableDataLoss {
                file: record.id.clone(),
                missing: still_missing,
            });
        }
        Ok(())
    }

    fn read_verified(
        &self,
        record: &FileRecord,
        primary: &PrimaryStore,
        backup: &BackupStore,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        self.ensure_present(record, primary, backup)?;
        let bytes = match codec::reconstruct(&record.chunks, primary, cancel) {
            Err(VaultError::ChunkNotFound(id)) => {
                // Lost after the presence check, outside the vault's control.
                debug!(file = %record.id, chunk = %id, "chunk vanished during read; retrying recovery");
                self.ensure_present(record, primary, backup)?;
                codec::reconstruct(&record.chunks, primary, cancel)?
            }
            other => other?,
        };
        let actual = codec::checksum(&bytes);
        if actual != record.checksum {
            return Err(VaultError::ChecksumMismatch {
                file: record.id.clone(),
                expected: record.checksum.clone(),
                actual,
            });
        }
        Ok(bytes)
    }

    /// Mirror snapshot and chunks; on success the record is marked synced.
    /// Errors come back as a reason string, never as a failure of the caller.
    fn mirror(
        &self,
        record: &mut FileRecord,
        primary: &PrimaryStore,
        backup: &BackupStore,
    ) -> std::result::Result<String, String> {
        if !backup.is_enabled() {
            return Err("backup tier is not reachable".into());
        }
        let bytes = codec::reconstruct(&record.chunks, primary, &CancelToken::new())
            .map_err(|e| format!("cannot read primary chunks: {e}"))?;
        if codec::checksum(&bytes) != record.checksum {
            return Err("primary chunks do not match the recorded checksum".into());
        }
        let locator = backup
            .mirror_file(&bytes, &record.stored_name, &snapshot_metadata(record))
            .ok_or_else(|| "snapshot mirror failed".to_string())?;
        if !backup.mirror_chunks(record.chunks.ids(), primary, &record.id) {
            return Err("chunk mirror incomplete".into());
        }
        record.mark_synced(locator.clone());
        Ok(locator)
    }
}

fn rollback(primary: &PrimaryStore, ids: &[ChunkId]) {
    let report = primary.delete(ids);
    if !report.failed.is_empty() {
        warn!(failed = report.failed.len(), "rollback left orphaned primary chunks");
    }
}

/// Remove the snapshot, sidecar and chunk mirrors of `record`. True when
/// nothing of it is left in backup.
fn discard_mirror(backup: &BackupStore, record: &FileRecord) -> bool {
    let file_ok = backup.delete_file(&record.stored_name);
    let chunks_ok = backup.delete_chunks(&record.id);
    file_ok && chunks_ok
}

fn snapshot_metadata(record: &FileRecord) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    meta.insert("file_id".to_string(), record.id.to_string());
    meta.insert("owner".to_string(), record.owner.to_string());
    meta.insert("original_name".to_string(), record.original_name.clone());
    meta.insert("stored_name".to_string(), record.stored_name.clone());
    meta.insert("size".to_string(), record.size.to_string());
    meta.insert("chunk_size".to_string(), record.chunk_size.to_string());
    meta.insert("chunk_count".to_string(), record.chunk_count.to_string());
    meta.insert("checksum".to_string(), record.checksum.clone());
    meta.insert("created_utc".to_string(), record.created_utc.clone());
    meta.insert("mirrored_utc".to_string(), chrono::Utc::now().to_rfc3339());
    meta
}
