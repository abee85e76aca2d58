//! Random-access byte I/O behind the storage engine.
//!
//! The engine only needs positioned reads and writes plus a sequential
//! append used once, by the creation routine. A real file and an in-memory
//! vector (for tests) both qualify.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

/// Capability set required by the storage engine.
///
/// Offsets are absolute byte positions; the address space grows on write.
/// Short reads are tolerated by callers, which validate region contents
/// against expected sizes rather than the returned count.
pub trait Backend: Send + Sync {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize>;
    /// Sequential write at the current end position. Only the creation
    /// routine uses this.
    fn append(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// A storage file on disk. `read_at`/`write_at` map to pread/pwrite and do
/// not move the file cursor.
pub struct FileBackend {
    file: File,
    append_pos: u64,
}

impl FileBackend {
    pub fn new(file: File) -> Self {
        Self {
            file,
            append_pos: 0,
        }
    }
}

impl Backend for FileBackend {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.read_exact_at(buf, offset)?;
        Ok(buf.len())
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.file.write_all_at(buf, offset)?;
        Ok(buf.len())
    }

    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all_at(buf, self.append_pos)?;
        self.append_pos += buf.len() as u64;
        Ok(buf.len())
    }
}

/// In-memory backend used by tests. Writes past the end grow the buffer.
pub struct MemBackend {
    data: Vec<u8>,
    append_pos: usize,
}

impl MemBackend {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(65536),
            append_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemBackend {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.write_at(buf, self.append_pos as u64)?;
        self.append_pos += n;
        Ok(n)
    }
}
