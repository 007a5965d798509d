pub mod backend;
pub mod backup;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod error;
pub mod locks;
pub mod manifest;
pub mod naming;
pub mod primary;
pub mod records;
pub mod vault;

pub use cancel::CancelToken;
pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use manifest::{ChunkId, ChunkManifest, FileId, FileRecord, OwnerId};
pub use vault::{SyncStatus, Vault};
