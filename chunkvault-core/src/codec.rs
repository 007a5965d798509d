use std::io::Read;

use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::error::{Result, VaultError};
use crate::manifest::{ChunkId, ChunkIdGen, ChunkManifest};

const INITIAL_WINDOW: usize = 64 * 1024;

/// Source of chunk bytes for reconstruction.
pub trait ChunkReader {
    /// Returns the bytes of `id`, or [`VaultError::ChunkNotFound`] if the id
    /// cannot be resolved.
    fn read_chunk(&self, id: &ChunkId) -> Result<Vec<u8>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitOutcome {
    pub manifest: ChunkManifest,
    pub size: u64,
    /// Hex SHA-256 over the input in original byte order.
    pub checksum: String,
}

pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(VaultError::InvalidConfiguration(
            "chunk size must be a positive number of bytes".into(),
        ));
    }
    Ok(())
}

/// Hex SHA-256 of `data`; same digest `split` produces for the same bytes.
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Split `reader` into `chunk_size` windows without keeping the bytes.
pub fn split<R: Read>(reader: R, chunk_size: usize) -> Result<SplitOutcome> {
    split_with(reader, chunk_size, |_, _| Ok(()))
}

/// Split `reader` into `chunk_size` windows, handing each window and its
/// fresh id to `sink` in order. The last window may be short; empty input
/// yields no windows. Stops at the first sink error.
pub fn split_with<R, F>(mut reader: R, chunk_size: usize, mut sink: F) -> Result<SplitOutcome>
where
    R: Read,
    F: FnMut(&ChunkId, &[u8]) -> Result<()>,
{
    validate_chunk_size(chunk_size)?;
    let mut ids = ChunkIdGen::new();
    let mut hasher = Sha256::new();
    let mut chunks = Vec::new();
    let mut size = 0u64;
    // read_to_end grows the buffer; huge windows must not allocate up front
    let mut buf = Vec::with_capacity(chunk_size.min(INITIAL_WINDOW));
    loop {
        buf.clear();
        let n = (&mut reader).take(chunk_size as u64).read_to_end(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf);
        size += n as u64;
        let id = ids.next_id();
        sink(&id, &buf)?;
        chunks.push(id);
        if n < chunk_size {
            break;
        }
    }
    Ok(SplitOutcome {
        manifest: ChunkManifest::from(chunks),
        size,
        checksum: hex::encode(hasher.finalize()),
    })
}

/// Concatenate the chunks of `manifest` in order.
pub fn reconstruct<C>(manifest: &ChunkManifest, reader: &C, cancel: &CancelToken) -> Result<Vec<u8>>
where
    C: ChunkReader + ?Sized,
{
    let mut out = Vec::new();
    for id in manifest {
        if cancel.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        out.extend_from_slice(&reader.read_chunk(id)?);
    }
    Ok(out)
}

/// Ids of `manifest` failing `exists`, in manifest order.
pub fn verify_presence<F>(manifest: &ChunkManifest, mut exists: F) -> Vec<ChunkId>
where
    F: FnMut(&ChunkId) -> bool,
{
    manifest.iter().filter(|id| !exists(id)).cloned().collect()
}
