//! Storage Engine Module
//!
//! Implements the chunk-linked, append-mostly persistence layer behind every
//! storage server.
//!
//! ## Core Concepts
//! - **Fixed geometry**: a storage file is a 24-byte header followed by
//!   `num_chunks` equally sized chunks; geometry never changes after creation.
//! - **Records**: each written payload occupies a run of chunks linked via
//!   their headers; the record is addressed by its first chunk index.
//! - **Bump allocation**: `free_chunk_idx` only moves forward on committed
//!   writes; there is no deletion and no reuse.
//! - **Commit hook**: local visibility of a write is gated on a
//!   [`CommitHook`](engine::CommitHook), which the master server uses for
//!   synchronous replication.

pub mod backend;
pub mod engine;
pub mod format;

#[cfg(test)]
mod tests;
