//! Storage Server Module
//!
//! Exposes one storage engine over HTTP with master/replica semantics.
//!
//! ## Core Concepts
//! - **Roles**: a master accepts `append`; a replica accepts `set/{idx}`
//!   writes dictated by its master. Both serve `info` and `get`.
//! - **Synchronous replication**: the master's commit hook POSTs each record
//!   to the replica and the local write only becomes visible after the
//!   replica acknowledged it.
//! - **Precheck**: at startup a replicating master verifies the replica's
//!   role, capacity and storage identity before accepting traffic.

pub mod handlers;
pub mod protocol;
pub mod service;
