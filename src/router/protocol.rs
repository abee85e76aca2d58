//! Router Wire Protocol
//!
//! The router's own client-facing DTOs. Everything it exchanges with
//! storage servers uses the types in `server::protocol`.

use serde::{Deserialize, Serialize};

/// Successful write through the router: which shard took the record and at
/// which index it landed.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutResponse {
    pub instance_id: u64,
    pub item_id: usize,
}
