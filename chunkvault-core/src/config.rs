use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{Result, VaultError};

pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Root of the primary tier and of the record store.
    pub storage_path: PathBuf,
    /// Root of the backup tier; `None` runs without redundancy.
    pub backup_path: Option<PathBuf>,
    pub chunk_size: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("storage"),
            backup_path: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl VaultConfig {
    /// Load a JSON config file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: VaultConfig = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        codec::validate_chunk_size(self.chunk_size)?;
        if self.storage_path.as_os_str().is_empty() {
            return Err(VaultError::InvalidConfiguration("storage path is empty".into()));
        }
        if self.backup_path.as_deref() == Some(self.storage_path.as_path()) {
            return Err(VaultError::InvalidConfiguration(
                "backup path must differ from storage path".into(),
            ));
        }
        Ok(())
    }
}
