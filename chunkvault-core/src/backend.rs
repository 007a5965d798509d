use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, VaultError};

/// Key/value storage beneath the backup tier. Keys are `/`-separated
/// relative paths. Implementations may be a local directory or a remote
/// object store; the backup logic only relies on this contract.
pub trait BackupBackend: Send + Sync {
    /// True when the backend's root is configured and reachable.
    fn is_reachable(&self) -> bool;

    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// `Ok(None)` when the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key under `prefix`. Absent prefixes succeed.
    fn delete_prefix(&self, prefix: &str) -> Result<()>;

    /// Keys under `prefix` with their sizes in bytes.
    fn list(&self, prefix: &str) -> Result<Vec<(String, u64)>>;

    /// Human-readable locator of `key`, recorded on file records.
    fn locator(&self, key: &str) -> String;
}

/// Reject keys that could escape the backend root.
pub fn validate_key(key: &str) -> Result<()> {
    let reject = |reason| Err(VaultError::InvalidName { name: key.to_string(), reason });
    if key.is_empty() {
        return reject("empty storage key");
    }
    if key.starts_with('/') || key.contains('\\') {
        return reject("storage key must be relative and '/'-separated");
    }
    if Path::new(key).components().any(|c| !matches!(c, Component::Normal(_))) {
        return reject("storage key contains traversal");
    }
    Ok(())
}

/// Backend over a local directory tree.
pub struct LocalDirBackend {
    root: PathBuf,
}

impl LocalDirBackend {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Write to a temp file next to `path`, then rename into place so readers
    /// never observe a partial file.
    fn atomic_write(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_data()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn list_recursive(&self, dir: &Path, out: &mut Vec<(String, u64)>) -> Result<()> {
        for ent in walkdir::WalkDir::new(dir).min_depth(1) {
            let ent = ent.map_err(|e| VaultError::Io(e.into()))?;
            // temp files of interrupted atomic writes are dot-prefixed
            if !ent.file_type().is_file() || ent.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let Ok(rel) = ent.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let len = ent.metadata().map_err(|e| VaultError::Io(e.into()))?.len();
            out.push((key, len));
        }
        Ok(())
    }
}

impl BackupBackend for LocalDirBackend {
    fn is_reachable(&self) -> bool {
        self.root.is_dir()
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        match self.atomic_write(&path, data) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                Ok(self.atomic_write(&path, data)?)
            }
            other => Ok(other?),
        }
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.resolve(key)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        match fs::metadata(self.resolve(key)?) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.resolve(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let path = self.resolve(prefix.trim_end_matches('/'))?;
        let res = if path.is_dir() { fs::remove_dir_all(&path) } else { fs::remove_file(&path) };
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, u64)>> {
        let dir = self.resolve(prefix.trim_end_matches('/'))?;
        let mut out = Vec::new();
        if dir.is_dir() {
            self.list_recursive(&dir, &mut out)?;
        }
        out.sort();
        Ok(out)
    }

    fn locator(&self, key: &str) -> String {
        format!("local://{}/{}", self.root.display(), key)
    }
}

/// In-process backend, handy for tests and for callers that want a
/// throwaway redundancy tier. `set_reachable(false)` simulates an outage.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    unreachable: Mutex<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        *self.unreachable.lock() = !reachable;
    }

    fn check(&self) -> Result<()> {
        if *self.unreachable.lock() {
            return Err(VaultError::BackupUnavailable("memory backend offline".into()));
        }
        Ok(())
    }
}

impl BackupBackend for MemoryBackend {
    fn is_reachable(&self) -> bool {
        !*self.unreachable.lock()
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.check()?;
        self.objects.lock().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.objects.lock().get(key).cloned())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.objects.lock().contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.objects.lock().remove(key);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.check()?;
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        self.objects.lock().retain(|k, _| !k.starts_with(&dir));
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, u64)>> {
        self.check()?;
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(&dir))
            .map(|(k, v)| (k.clone(), v.len() as u64))
            .collect())
    }

    fn locator(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}
