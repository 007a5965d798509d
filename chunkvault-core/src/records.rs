use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{Result, VaultError};
use crate::manifest::{FileId, FileRecord, OwnerId};

/// Key/value persistence of file records, keyed by file id. Querying and
/// indexing beyond per-owner listing belong to the caller's database.
pub trait RecordStore: Send + Sync {
    fn get(&self, id: &FileId) -> Result<Option<FileRecord>>;

    /// Insert or replace.
    fn put(&self, record: &FileRecord) -> Result<()>;

    /// Removing an absent record succeeds.
    fn remove(&self, id: &FileId) -> Result<()>;

    /// Records of `owner`, newest first.
    fn list(&self, owner: &OwnerId) -> Result<Vec<FileRecord>>;
}

fn newest_first(records: &mut [FileRecord]) {
    records.sort_by(|a, b| b.created_utc.cmp(&a.created_utc).then_with(|| a.id.cmp(&b.id)));
}

/// One pretty-printed JSON document per record under `<root>/records/`.
/// Writers take an advisory lock on `<root>/records/.lock` so separate
/// processes sharing the directory do not interleave.
pub struct JsonRecordStore {
    dir: PathBuf,
}

impl JsonRecordStore {
    /// Create the record directory. Idempotent; call once at startup.
    pub fn init(root: &Path) -> Result<Self> {
        let dir = root.join("records");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &FileId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn lock_file(&self) -> Result<File> {
        let f = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.dir.join(".lock"))?;
        Ok(f)
    }

    fn read(&self, path: &Path) -> Result<Option<FileRecord>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl RecordStore for JsonRecordStore {
    fn get(&self, id: &FileId) -> Result<Option<FileRecord>> {
        let lock = self.lock_file()?;
        lock.lock_shared()?;
        let res = self.read(&self.path(id));
        let _ = lock.unlock();
        res
    }

    fn put(&self, record: &FileRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        let lock = self.lock_file()?;
        lock.lock_exclusive()?;
        let res = (|| -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
            tmp.write_all(json.as_bytes())?;
            tmp.as_file().sync_data()?;
            tmp.persist(self.path(&record.id)).map_err(|e| VaultError::Io(e.error))?;
            Ok(())
        })();
        let _ = lock.unlock();
        res
    }

    fn remove(&self, id: &FileId) -> Result<()> {
        let lock = self.lock_file()?;
        lock.lock_exclusive()?;
        let res = match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        let _ = lock.unlock();
        res
    }

    fn list(&self, owner: &OwnerId) -> Result<Vec<FileRecord>> {
        let lock = self.lock_file()?;
        lock.lock_shared()?;
        let res = (|| -> Result<Vec<FileRecord>> {
            let mut out = Vec::new();
            for ent in walkdir::WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
                let ent = ent.map_err(|e| VaultError::Io(e.into()))?;
                let p = ent.path();
                if !ent.file_type().is_file() || p.extension().map(|s| s != "json").unwrap_or(true) {
                    continue;
                }
                match self.read(p) {
                    Ok(Some(rec)) if &rec.owner == owner => out.push(rec),
                    Ok(_) => {}
                    // one damaged record must not hide every other file
                    Err(VaultError::Json(e)) => {
                        warn!(path = ?p, error = %e, "skipping unreadable file record");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(out)
        })();
        let _ = lock.unlock();
        let mut out = res?;
        newest_first(&mut out);
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<FileId, FileRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, id: &FileId) -> Result<Option<FileRecord>> {
        Ok(self.records.lock().get(id).cloned())
    }

    fn put(&self, record: &FileRecord) -> Result<()> {
        self.records.lock().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, id: &FileId) -> Result<()> {
        self.records.lock().remove(id);
        Ok(())
    }

    fn list(&self, owner: &OwnerId) -> Result<Vec<FileRecord>> {
        let mut out: Vec<FileRecord> =
            self.records.lock().values().filter(|r| &r.owner == owner).cloned().collect();
        newest_first(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ChunkManifest;

    fn record(owner: &str, created: &str) -> FileRecord {
        let id = FileId::generate();
        FileRecord {
            stored_name: format!("{id}_a.txt"),
            id,
            owner: OwnerId::new(owner).unwrap(),
            original_name: "a.txt".into(),
            chunks: ChunkManifest::default(),
            chunk_size: 4,
            size: 0,
            chunk_count: 0,
            checksum: crate::codec::checksum(b""),
            synced: false,
            backup_locator: None,
            created_utc: created.into(),
            synced_utc: None,
        }
    }

    fn exercise(store: &dyn RecordStore) {
        let old = record("alice", "2024-01-01T00:00:00+00:00");
        let new = record("alice", "2024-06-01T00:00:00+00:00");
        let other = record("bob", "2024-03-01T00:00:00+00:00");
        for r in [&old, &new, &other] {
            store.put(r).unwrap();
        }
        assert_eq!(store.get(&old.id).unwrap().as_ref(), Some(&old));
        let listed = store.list(&old.owner).unwrap();
        assert_eq!(listed, vec![new.clone(), old.clone()]);

        let mut updated = old.clone();
        updated.synced = true;
        store.put(&updated).unwrap();
        assert!(store.get(&old.id).unwrap().unwrap().synced);

        store.remove(&old.id).unwrap();
        store.remove(&old.id).unwrap();
        assert!(store.get(&old.id).unwrap().is_none());
        assert_eq!(store.list(&other.owner).unwrap(), vec![other]);
    }

    #[test]
    fn json_store_behaves() {
        let td = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::init(td.path()).unwrap();
        // init is idempotent
        JsonRecordStore::init(td.path()).unwrap();
        exercise(&store);
    }

    #[test]
    fn memory_store_behaves() {
        exercise(&MemoryRecordStore::new());
    }

    #[test]
    fn json_store_rejects_tampered_manifest() {
        let td = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::init(td.path()).unwrap();
        let rec = record("alice", "2024-01-01T00:00:00+00:00");
        store.put(&rec).unwrap();
        let path = store.dir().join(format!("{}.json", rec.id));
        let text = std::fs::read_to_string(&path).unwrap();
        let tampered = text.replace("\"chunks\": []", "\"chunks\": [\"../../x_0\"]");
        assert_ne!(text, tampered);
        std::fs::write(&path, tampered).unwrap();
        assert!(matches!(store.get(&rec.id), Err(VaultError::Json(_))));
    }

    #[test]
    fn json_store_list_skips_unreadable_records() {
        let td = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::init(td.path()).unwrap();
        let good = record("alice", "2024-01-01T00:00:00+00:00");
        store.put(&good).unwrap();
        let broken = FileId::generate();
        std::fs::write(store.dir().join(format!("{broken}.json")), b"{ not json").unwrap();
        assert_eq!(store.list(&good.owner).unwrap(), vec![good]);
        assert!(store.get(&broken).is_err());
    }
}
