//! Storage Server Wire Protocol
//!
//! Endpoint paths and the JSON DTOs exchanged between clients, the router
//! and storage servers. The router deserializes these same structures when
//! it proxies requests, so they live here rather than in the handlers.

use serde::{Deserialize, Serialize};

/// Application name reported by every instance.
pub const APP_NAME: &str = "bookstore";

/// Info endpoint, served by masters and replicas alike.
pub const ENDPOINT_INFO: &str = "/api/v1/info";
/// Read endpoint; accepts a comma-separated list of record indices.
pub const ENDPOINT_GET: &str = "/api/v1/data/get";
/// Master-only write endpoint.
pub const ENDPOINT_APPEND: &str = "/api/v1/data/append";
/// Replica-only write endpoint; the master dictates the chunk index.
pub const ENDPOINT_SET: &str = "/api/v1/data/set";

pub const SERVER_TYPE_MASTER: &str = "master";
pub const SERVER_TYPE_REPLICA: &str = "replica";

/// Instance self-description, used by the router for health checks and by
/// masters for the replication precheck.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub app_name: String,
    pub storage_id: u64,
    pub chunk_size: usize,
    pub chunk_data_size: usize,
    pub num_chunks: usize,
    pub server_type: String,
    pub is_full: bool,
}

/// Body of `append` and `set` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingData {
    pub data: String,
}

/// Acknowledgement of a write: the index of the record's first chunk.
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteDataResponse {
    pub id: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataItem {
    pub id: usize,
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataListResponse {
    pub items: Vec<DataItem>,
}
