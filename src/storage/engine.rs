//! The chunk-linked storage engine.
//!
//! Records are laid down as runs of consecutive chunks linked through their
//! headers' `next` field. Allocation is bump-only: a fresh write starts at
//! `free_chunk_idx` and advances it by the number of chunks consumed. There
//! is no deletion and no free-list reuse.
//!
//! Every mutating call takes a [`CommitHook`]; the engine invokes it after
//! the chunk bytes are on the backend but before the new `free_chunk_idx` is
//! persisted. A failing hook therefore leaves the logical live region
//! untouched: the orphan chunk bytes sit past `free_chunk_idx` and the next
//! successful write overwrites them. The hook is awaited while the exclusive
//! lock is held; that is what binds a remote acknowledgement to the local
//! commit.

use std::io::{self, ErrorKind, Read, Write};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::future::Future;
use thiserror::Error;
use tokio::sync::RwLock;

use super::backend::Backend;
use super::format::{
    chunk_position, ChunkHeader, StoreHeader, CHUNK_HEADER_SIZE, NO_NEXT_CHUNK, STORAGE_VERSION,
    STORE_HEADER_SIZE,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage version mismatch: file version is {found}, software version is {expected}")]
    VersionMismatch { found: i32, expected: i32 },
    #[error("storage is full")]
    Full,
    #[error("index out of bounds")]
    IndexOutOfBounds,
    #[error("replication error: {0}")]
    Replication(anyhow::Error),
    #[error("{0}")]
    Callback(anyhow::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Commit gate for mutating writes.
///
/// `commit` runs after the record's chunks are written and before the new
/// `free_chunk_idx` is persisted. Returning an error aborts the write. The
/// master's storage server implements this with an HTTP forward to its
/// replica; everything else uses [`NopHook`].
#[async_trait]
pub trait CommitHook: Send + Sync {
    async fn commit(&self, start_idx: usize) -> anyhow::Result<()>;
}

/// A commit hook that accepts everything.
pub struct NopHook;

#[async_trait]
impl CommitHook for NopHook {
    async fn commit(&self, _start_idx: usize) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Creates and initializes the binary structure of a storage file on any
/// backend. Returns the storage ID, which is randomized (non-zero) when the
/// caller passes 0.
pub fn create<B: Backend>(
    backend: &mut B,
    chunk_data_size: usize,
    num_chunks: usize,
    storage_id: u64,
) -> Result<u64, StorageError> {
    let mut storage_id = storage_id;
    while storage_id == 0 {
        storage_id = rand::random();
    }

    let header = StoreHeader {
        storage_id,
        version: STORAGE_VERSION,
        chunk_size: (chunk_data_size + CHUNK_HEADER_SIZE) as i32,
        num_chunks: num_chunks as i32,
        free_chunk_idx: 0,
    };
    backend.append(&header.encode())?;

    let chunk_header = ChunkHeader {
        data_size: 0,
        next: NO_NEXT_CHUNK,
        compressed: false,
    }
    .encode();
    let empty_payload = vec![0u8; chunk_data_size];

    for _ in 0..num_chunks {
        backend.append(&chunk_header)?;
        backend.append(&empty_payload)?;
    }

    Ok(storage_id)
}

struct Inner<B> {
    backend: B,
    free_chunk_idx: i32,
}

/// An open storage file.
///
/// Geometry and identity are immutable after [`open`](Storage::open); only
/// the free-chunk pointer and the backend live behind the lock. Reads run
/// concurrently with each other; writes are serialized.
pub struct Storage<B> {
    storage_id: u64,
    chunk_size: i32,
    num_chunks: i32,
    inner: RwLock<Inner<B>>,
}

impl<B: Backend> Storage<B> {
    /// Opens a storage file, validating the header version.
    pub fn open(backend: B) -> Result<Self, StorageError> {
        let mut buf = [0u8; STORE_HEADER_SIZE];
        read_exact_at(&backend, &mut buf, 0)?;
        let header = StoreHeader::decode(&buf);

        if header.version != STORAGE_VERSION {
            return Err(StorageError::VersionMismatch {
                found: header.version,
                expected: STORAGE_VERSION,
            });
        }

        Ok(Self {
            storage_id: header.storage_id,
            chunk_size: header.chunk_size,
            num_chunks: header.num_chunks,
            inner: RwLock::new(Inner {
                backend,
                free_chunk_idx: header.free_chunk_idx,
            }),
        })
    }

    /// Writes `data` into free chunks and returns the index of the starting
    /// chunk.
    pub async fn write(&self, data: &[u8], hook: &dyn CommitHook) -> Result<usize, StorageError> {
        self.write_impl(data, None, hook).await
    }

    /// Writes `data` into chunks starting from `idx`, overwriting whatever
    /// was there. The free-chunk pointer is set to the end of the new record
    /// regardless of its previous value.
    pub async fn write_to(
        &self,
        data: &[u8],
        idx: usize,
        hook: &dyn CommitHook,
    ) -> Result<usize, StorageError> {
        self.write_impl(data, Some(idx), hook).await
    }

    async fn write_impl(
        &self,
        data: &[u8],
        idx: Option<usize>,
        hook: &dyn CommitHook,
    ) -> Result<usize, StorageError> {
        tracing::debug!("data size is {}", data.len());
        let zipped = zip(data)?;
        tracing::debug!("compressed data size is {}", zipped.len());

        let (payload, compressed): (&[u8], bool) = if data.len() < zipped.len() {
            tracing::debug!("about to write uncompressed data");
            (data, false)
        } else {
            (&zipped, true)
        };

        let mut inner = self.inner.write().await;
        let start_idx = idx.unwrap_or(inner.free_chunk_idx as usize);

        let result = self
            .write_chunks(&mut inner, payload, start_idx, compressed, hook)
            .await;
        if let Err(e) = &result {
            tracing::error!("error writing data to storage: {}", e);
        }
        result
    }

    async fn write_chunks(
        &self,
        inner: &mut Inner<B>,
        payload: &[u8],
        start_idx: usize,
        compressed: bool,
        hook: &dyn CommitHook,
    ) -> Result<usize, StorageError> {
        let chunk_data_size = self.chunk_data_size();
        let mut curr = start_idx;
        let mut remaining = payload;

        while !remaining.is_empty() {
            tracing::debug!("current chunk idx={}", curr);
            if curr >= self.num_chunks as usize {
                return Err(StorageError::Full);
            }
            let pos = chunk_position(curr, self.chunk_size as usize);
            let take = remaining.len().min(chunk_data_size);
            let header = ChunkHeader {
                data_size: take as i32,
                next: if remaining.len() > chunk_data_size {
                    (curr + 1) as i32
                } else {
                    NO_NEXT_CHUNK
                },
                compressed,
            };

            // header first, then the payload span right behind it
            inner.backend.write_at(&header.encode(), pos)?;
            inner
                .backend
                .write_at(&remaining[..take], pos + CHUNK_HEADER_SIZE as u64)?;

            remaining = &remaining[take..];
            curr += 1;
        }

        // The write is only visible once free_chunk_idx moves, so a failed
        // commit leaves the chunks above as garbage to be overwritten.
        hook.commit(start_idx)
            .await
            .map_err(StorageError::Replication)?;

        inner.free_chunk_idx = curr as i32;
        self.write_header(inner)?;

        Ok(start_idx)
    }

    fn write_header(&self, inner: &mut Inner<B>) -> Result<(), StorageError> {
        let header = StoreHeader {
            storage_id: self.storage_id,
            version: STORAGE_VERSION,
            chunk_size: self.chunk_size,
            num_chunks: self.num_chunks,
            free_chunk_idx: inner.free_chunk_idx,
        };
        inner.backend.write_at(&header.encode(), 0)?;
        Ok(())
    }

    /// Reads the record starting at `idx`, decompressing it if it was
    /// stored gzipped.
    pub async fn read(&self, idx: usize) -> Result<Vec<u8>, StorageError> {
        tracing::debug!("reading item {}", idx);
        let (buf, _, compressed) = self.read_raw(idx).await?;

        if compressed {
            tracing::debug!("uncompressing item {}", idx);
            return Ok(unzip(&buf)?);
        }
        Ok(buf)
    }

    /// Raw record bytes plus chunk count and the compression flag of the
    /// terminal chunk. No decompression.
    pub(crate) async fn read_raw(&self, idx: usize) -> Result<(Vec<u8>, usize, bool), StorageError> {
        let inner = self.inner.read().await;
        self.read_record(&inner, idx)
    }

    fn read_record(
        &self,
        inner: &Inner<B>,
        start_idx: usize,
    ) -> Result<(Vec<u8>, usize, bool), StorageError> {
        let mut out = Vec::new();
        let mut idx = start_idx;
        let mut chunk_count = 0usize;
        let mut compressed = false;

        loop {
            chunk_count += 1;
            if idx >= inner.free_chunk_idx as usize {
                return Err(StorageError::IndexOutOfBounds);
            }

            let pos = chunk_position(idx, self.chunk_size as usize);

            let mut header_bytes = [0u8; CHUNK_HEADER_SIZE];
            read_exact_at(&inner.backend, &mut header_bytes, pos)?;
            let header = ChunkHeader::decode(&header_bytes);

            let mut data = vec![0u8; header.data_size as usize];
            read_exact_at(&inner.backend, &mut data, pos + CHUNK_HEADER_SIZE as u64)?;
            out.extend_from_slice(&data);

            compressed = header.compressed;
            if header.next < 0 {
                break;
            }
            idx = header.next as usize;
        }

        Ok((out, chunk_count, compressed))
    }

    /// Iterates over records in ascending start-index order, awaiting
    /// `callback` with each record's index and decompressed bytes. The whole
    /// traversal runs under the shared lock, so writes are excluded until it
    /// finishes.
    pub async fn iter<F, Fut>(&self, mut callback: F) -> Result<(), StorageError>
    where
        F: FnMut(usize, Vec<u8>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let inner = self.inner.read().await;

        let mut idx = 0usize;
        while idx < inner.free_chunk_idx as usize {
            let (buf, chunk_count, compressed) = self.read_record(&inner, idx)?;
            let data = if compressed { unzip(&buf)? } else { buf };

            callback(idx, data).await.map_err(StorageError::Callback)?;
            idx += chunk_count;
        }
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.storage_id
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks as usize
    }

    /// Payload capacity of one chunk.
    pub fn chunk_data_size(&self) -> usize {
        self.chunk_size as usize - CHUNK_HEADER_SIZE
    }

    pub async fn is_full(&self) -> bool {
        let inner = self.inner.read().await;
        inner.free_chunk_idx >= self.num_chunks
    }

    #[cfg(test)]
    pub(crate) async fn free_chunk_idx(&self) -> usize {
        self.inner.read().await.free_chunk_idx as usize
    }
}

fn read_exact_at<B: Backend>(backend: &B, buf: &mut [u8], offset: u64) -> Result<(), StorageError> {
    let n = backend.read_at(buf, offset)?;
    if n < buf.len() {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "short read from storage backend").into());
    }
    Ok(())
}

fn zip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn unzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
