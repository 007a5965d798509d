use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::naming;

const TOKEN_LEN: usize = 32;

fn is_token(s: &str) -> bool {
    s.len() == TOKEN_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Identifier of one immutable chunk: `<random token>_<ordinal>`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId(String);

impl ChunkId {
    pub(crate) fn new(token: &str, ordinal: u64) -> Self {
        Self(format!("{token}_{ordinal}"))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let valid = s
            .split_once('_')
            .map(|(token, ordinal)| {
                is_token(token) && !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit())
            })
            .unwrap_or(false);
        if !valid {
            return Err(VaultError::InvalidName {
                name: s.to_string(),
                reason: "not a chunk id",
            });
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this chunk in any directory-backed tier.
    pub fn file_name(&self) -> String {
        format!("{}.chunk", self.0)
    }
}

impl TryFrom<String> for ChunkId {
    type Error = VaultError;
    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", self.0)
    }
}

/// Hands out chunk ids for one split call. Every generator draws a fresh
/// random token, so ids never repeat across calls.
pub(crate) struct ChunkIdGen {
    token: String,
    next: u64,
}

impl ChunkIdGen {
    pub(crate) fn new() -> Self {
        Self { token: new_token(), next: 0 }
    }

    pub(crate) fn next_id(&mut self) -> ChunkId {
        let id = ChunkId::new(&self.token, self.next);
        self.next += 1;
        id
    }
}

/// Ordered chunk list of one file. Order is fixed at creation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct ChunkManifest(Vec<ChunkId>);

impl ChunkManifest {
    pub fn ids(&self) -> &[ChunkId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChunkId> {
        self.0.iter()
    }
}

impl From<Vec<ChunkId>> for ChunkManifest {
    fn from(ids: Vec<ChunkId>) -> Self {
        Self(ids)
    }
}

impl<'a> IntoIterator for &'a ChunkManifest {
    type Item = &'a ChunkId;
    type IntoIter = std::slice::Iter<'a, ChunkId>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Identity of a [`FileRecord`]; also the group key of its backup chunk mirror.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    pub fn generate() -> Self {
        Self(new_token())
    }

    pub fn parse(s: &str) -> Result<Self> {
        if !is_token(s) {
            return Err(VaultError::InvalidName {
                name: s.to_string(),
                reason: "not a file id",
            });
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FileId {
    type Error = VaultError;
    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

/// Logical owner of files; names one namespace per tier.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(s: &str) -> Result<Self> {
        naming::validate_component(s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name of this owner's namespace in either tier.
    pub fn namespace(&self) -> String {
        format!("user_{}", self.0)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = VaultError;
    fn try_from(s: String) -> Result<Self> {
        Self::new(&s)
    }
}

impl From<OwnerId> for String {
    fn from(id: OwnerId) -> Self {
        id.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub owner: OwnerId,
    pub original_name: String,
    /// `<id>_<sanitized original name>`; key of the backup snapshot.
    pub stored_name: String,
    pub chunks: ChunkManifest,
    pub chunk_size: usize,
    pub size: u64,
    pub chunk_count: usize,
    /// Hex SHA-256 over the whole file.
    pub checksum: String,
    pub synced: bool,
    pub backup_locator: Option<String>,
    pub created_utc: String,
    pub synced_utc: Option<String>,
}

impl FileRecord {
    pub(crate) fn mark_synced(&mut self, locator: String) {
        self.synced = true;
        self.backup_locator = Some(locator);
        self.synced_utc = Some(chrono::Utc::now().to_rfc3339());
    }
}
