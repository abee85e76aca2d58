//! Router Module
//!
//! Shards writes across a fleet of master/replica pairs and load-balances
//! reads across their replicas.
//!
//! ## Core Concepts
//! - **Shard directory**: every upstream pair is keyed by its storage ID;
//!   the master is the shard's only writer, master and replica both read.
//! - **Health tracking**: a background pinger polls `/api/v1/info` on every
//!   instance; a writer that reports itself full counts as dead.
//! - **Dispatch**: writes pick a live master uniformly at random with up to
//!   three attempts; reads fan out the same way across the shard's live
//!   readers, short-circuiting on 404.

pub mod handlers;
pub mod protocol;
pub mod service;
