//! Bookstore Storage System Library
//!
//! This library crate defines the core modules of the sharded blob store.
//! It serves as the foundation for the binaries (`bsctl`, `bsserver`,
//! `bsrouter`).
//!
//! ## Architecture Modules
//! The system is composed of five loosely coupled subsystems:
//!
//! - **`storage`**: The persistence engine. A fixed-geometry, chunk-linked
//!   file format with per-record gzip, bump allocation and a commit hook
//!   that gates local visibility on replication.
//! - **`server`**: The HTTP front over one storage file. Runs as a master
//!   (accepting appends, replicating synchronously) or as a replica
//!   (accepting writes only at master-dictated indices).
//! - **`router`**: The dispatch layer. Tracks the health of every
//!   master/replica pair, shards writes across live masters and
//!   load-balances reads across live readers.
//! - **`config`**: INI config loading for the server and router daemons.
//! - **`common`**: The typed HTTP error, uniform JSON error responses and
//!   logging setup shared by all handlers and binaries.

pub mod common;
pub mod config;
pub mod router;
pub mod server;
pub mod storage;
