//! Router API Handlers
//!
//! `/put` picks a live master at random and forwards the body verbatim;
//! `/get/{instance}/{items}` fans a read out across the shard's live
//! readers. Both retry up to three times against the snapshot taken at the
//! start of the request.

use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::Rng;
use std::sync::Arc;

use crate::common::http::{ErrorResponse, HttpError};
use crate::server::protocol::{WriteDataResponse, ENDPOINT_APPEND, ENDPOINT_GET};

use super::protocol::PutResponse;
use super::service::Router;

pub async fn handle_put_data(
    Extension(router): Extension<Arc<Router>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PutResponse>, HttpError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != "application/json" {
        return Err(HttpError::bad_request("only application/json body is allowed"));
    }

    let available = router.alive_writers().await;
    if available.is_empty() {
        return Err(HttpError::bad_gateway("no alive writers available"));
    }

    for retries in (1..=3usize).rev() {
        let pick = rand::thread_rng().gen_range(0..available.len());
        let (storage_id, host) = &available[pick];
        let url = format!("http://{}{}", host, ENDPOINT_APPEND);

        let resp = match router
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone())
            .timeout(router.storage_timeout)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(
                    "error putting data to {}: {}. retries left {}",
                    url,
                    e,
                    retries - 1
                );
                continue;
            }
        };

        if resp.status() != StatusCode::OK {
            tracing::error!(
                "non-ok status code from {} while putting data ({}). retries left {}",
                url,
                resp.status().as_u16(),
                retries - 1
            );
            continue;
        }

        let ack: WriteDataResponse = match resp.json().await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!(
                    "error reading response body from {}: {}. retries left {}",
                    url,
                    e,
                    retries - 1
                );
                continue;
            }
        };

        return Ok(Json(PutResponse {
            instance_id: *storage_id,
            item_id: ack.id,
        }));
    }

    Err(HttpError::internal("can't write data after 3 retries"))
}

pub async fn handle_get_data(
    Extension(router): Extension<Arc<Router>>,
    Path((instance_id, item_id)): Path<(String, String)>,
) -> Response {
    let instance_id: u64 = match instance_id.parse() {
        Ok(id) => id,
        Err(_) => return HttpError::bad_request("invalid instanceID").into_response(),
    };

    let Some(hosts) = router.alive_readers(instance_id).await else {
        return HttpError::not_found("instance not found").into_response();
    };
    if hosts.is_empty() {
        return HttpError::bad_gateway("no alive storages available").into_response();
    }

    match proxy_data(&router, &hosts, &item_id).await {
        Ok((status, body)) => {
            (status, [(CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Fetches a record from one of the shard's readers.
///
/// A single candidate is queried once and its response passed through. With
/// several candidates the router retries random picks, except on 404: a
/// missing record is missing everywhere, so it gives up immediately.
async fn proxy_data(
    router: &Router,
    hosts: &[String],
    item_id: &str,
) -> Result<(StatusCode, Bytes), HttpError> {
    if hosts.len() == 1 {
        let host = &hosts[0];
        let url = format!("http://{}{}/{}", host, ENDPOINT_GET, item_id);
        tracing::debug!("getting data from {}", url);

        let resp = router
            .client
            .get(&url)
            .timeout(router.storage_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!("error getting data from {}: {}", host, e);
                HttpError::bad_gateway(format!("error getting data from storage: {}", e))
            })?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| HttpError::bad_gateway(format!("error getting data from storage: {}", e)))?;
        return Ok((status, body));
    }

    for retries in (1..=3usize).rev() {
        let pick = rand::thread_rng().gen_range(0..hosts.len());
        let host = &hosts[pick];
        let url = format!("http://{}{}/{}", host, ENDPOINT_GET, item_id);
        tracing::debug!("getting data from {}", url);

        let resp = match router
            .client
            .get(&url)
            .timeout(router.storage_timeout)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(
                    "error getting data from {}: {}. retries left: {}",
                    host,
                    e,
                    retries - 1
                );
                continue;
            }
        };

        let status = resp.status();
        if status != StatusCode::OK {
            let content = match resp.bytes().await {
                Ok(content) => content,
                Err(e) => {
                    tracing::debug!(
                        "status code {} from {}, body can't be read due to an error: {}. retries left: {}",
                        status.as_u16(),
                        host,
                        e,
                        retries - 1
                    );
                    continue;
                }
            };
            let err_data: ErrorResponse = match serde_json::from_slice(&content) {
                Ok(err_data) => err_data,
                Err(e) => {
                    tracing::debug!(
                        "status code {} from {}, body can't be unmarshalled due to an error: {}. retries left: {}",
                        status.as_u16(),
                        host,
                        e,
                        retries - 1
                    );
                    continue;
                }
            };

            tracing::debug!("error getting data: {}", err_data.error);
            if status == StatusCode::NOT_FOUND {
                // no need to retry if there's no such item
                tracing::debug!("status code 404 from {}, giving up", host);
                return Err(HttpError::not_found(err_data.error));
            }
            continue;
        }

        match resp.bytes().await {
            Ok(body) => return Ok((StatusCode::OK, body)),
            Err(e) => {
                tracing::debug!(
                    "error reading body from {}: {}. retries left: {}",
                    host,
                    e,
                    retries - 1
                );
                continue;
            }
        }
    }

    Err(HttpError::bad_gateway("can't get data: no more retries left"))
}
