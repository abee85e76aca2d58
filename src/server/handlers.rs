//! Storage Server API Handlers
//!
//! Translate HTTP requests into engine calls and map engine errors onto the
//! uniform JSON error shape.

use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::Json;
use std::sync::Arc;

use crate::common::http::HttpError;
use crate::storage::backend::Backend;

use super::protocol::{
    DataItem, DataListResponse, IncomingData, InfoResponse, WriteDataResponse, APP_NAME,
    SERVER_TYPE_MASTER, SERVER_TYPE_REPLICA,
};
use super::service::{Role, Server};

pub async fn handle_info<B: Backend + 'static>(
    Extension(server): Extension<Arc<Server<B>>>,
) -> Json<InfoResponse> {
    Json(InfoResponse {
        app_name: APP_NAME.to_string(),
        storage_id: server.storage.id(),
        chunk_size: server.storage.chunk_size(),
        chunk_data_size: server.storage.chunk_data_size(),
        num_chunks: server.storage.num_chunks(),
        server_type: match server.role {
            Role::Master => SERVER_TYPE_MASTER.to_string(),
            Role::Replica => SERVER_TYPE_REPLICA.to_string(),
        },
        is_full: server.storage.is_full().await,
    })
}

/// Serves one or more records; `ids` is a comma-separated list of record
/// indices.
pub async fn handle_get_data<B: Backend + 'static>(
    Extension(server): Extension<Arc<Server<B>>>,
    Path(ids): Path<String>,
) -> Result<Json<DataListResponse>, HttpError> {
    let mut items = Vec::new();

    for token in ids.split(',') {
        // record indices are 32-bit on disk
        let id: usize = token
            .parse::<i32>()
            .ok()
            .and_then(|id| usize::try_from(id).ok())
            .ok_or_else(|| HttpError::bad_request(format!("invalid id '{}'", token)))?;

        let data = server.storage.read(id).await.map_err(|e| {
            HttpError::internal(format!("error reading item at position {}: {}", id, e))
        })?;

        items.push(DataItem {
            id,
            data: String::from_utf8_lossy(&data).into_owned(),
        });
    }

    Ok(Json(DataListResponse { items }))
}

/// Master-only: appends a record at the next free chunk, replicating before
/// the local commit when a replica is configured.
pub async fn handle_append_data<B: Backend + 'static>(
    Extension(server): Extension<Arc<Server<B>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WriteDataResponse>, HttpError> {
    let input = get_incoming_data(&headers, &body)?;

    let idx = server
        .storage
        .write(input.data.as_bytes(), &server.commit_hook(&input))
        .await
        .map_err(|e| HttpError::internal(format!("error writing data to storage: {}", e)))?;

    Ok(Json(WriteDataResponse { id: idx }))
}

/// Replica-only: writes a record at the index the master dictates.
pub async fn handle_set_data<B: Backend + 'static>(
    Extension(server): Extension<Arc<Server<B>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WriteDataResponse>, HttpError> {
    let idx: usize = id
        .parse::<i32>()
        .ok()
        .and_then(|id| usize::try_from(id).ok())
        .ok_or_else(|| HttpError::bad_request(format!("invalid id '{}'", id)))?;

    let input = get_incoming_data(&headers, &body)?;

    let idx = server
        .storage
        .write_to(input.data.as_bytes(), idx, &server.commit_hook(&input))
        .await
        .map_err(|e| HttpError::internal(format!("error writing data to storage: {}", e)))?;

    Ok(Json(WriteDataResponse { id: idx }))
}

fn get_incoming_data(headers: &HeaderMap, body: &[u8]) -> Result<IncomingData, HttpError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != "application/json" {
        return Err(HttpError::bad_request("this handler accepts JSON data only"));
    }

    let input: IncomingData = serde_json::from_slice(body)
        .map_err(|e| HttpError::bad_request(format!("error parsing json data: {}", e)))?;

    if input.data.is_empty() {
        return Err(HttpError::bad_request("input data is empty"));
    }

    Ok(input)
}
