//! The storage server: one engine behind an HTTP front.
//!
//! A master accepts `append` and forwards every committed record to its
//! replica through the engine's commit hook; a replica accepts `set` at
//! master-dictated indices. Both serve `info` and `get`.

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use axum::extract::Extension;
use axum::routing::{get, post};

use crate::config::ServerCfg;
use crate::storage::backend::Backend;
use crate::storage::engine::{CommitHook, Storage};

use super::handlers::{handle_append_data, handle_get_data, handle_info, handle_set_data};
use super::protocol::{IncomingData, InfoResponse, ENDPOINT_INFO, ENDPOINT_SET, SERVER_TYPE_REPLICA};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

/// Replication target of a master: the replica's base URL plus a client
/// carrying the configured per-request timeout.
pub(crate) struct Replication {
    target: String,
    client: reqwest::Client,
}

pub struct Server<B> {
    pub(crate) storage: Storage<B>,
    pub(crate) role: Role,
    replication: Option<Replication>,
}

impl<B: Backend + 'static> Server<B> {
    /// Creates and configures a server instance over an opened storage.
    pub fn new(storage: Storage<B>, cfg: &ServerCfg) -> anyhow::Result<Arc<Self>> {
        let role = if cfg.is_master {
            Role::Master
        } else {
            Role::Replica
        };

        let replication = match &cfg.replicate_to {
            Some(target) => Some(Replication {
                target: target.clone(),
                client: reqwest::Client::builder()
                    .timeout(cfg.replication_timeout)
                    .build()
                    .context("error building replication client")?,
            }),
            None => None,
        };

        tracing::info!(
            "Server configured as {}",
            if role == Role::Master {
                "master"
            } else {
                "replica"
            }
        );

        Ok(Arc::new(Self {
            storage,
            role,
            replication,
        }))
    }

    /// Validates the configured replica before serving: it must identify as
    /// a replica, have at least as much room as the local storage, and share
    /// the local storage ID. A server without a replica passes trivially.
    pub async fn precheck(&self) -> anyhow::Result<()> {
        let Some(repl) = &self.replication else {
            return Ok(());
        };

        tracing::info!("Checking replication...");
        let info: InfoResponse = repl
            .client
            .get(format!("{}{}", repl.target, ENDPOINT_INFO))
            .send()
            .await
            .context("error getting server info from replica")?
            .json()
            .await
            .context("error parsing json from replica")?;

        if info.server_type != SERVER_TYPE_REPLICA {
            bail!("invalid server type on replica: {}", info.server_type);
        }

        tracing::info!(
            "Local chunk data size is {}, replica chunk data size is {}",
            self.storage.chunk_data_size(),
            info.chunk_data_size
        );
        if info.chunk_data_size < self.storage.chunk_data_size() {
            bail!("insufficient chunk data size on replica");
        }

        tracing::info!(
            "Local storage has {} chunks, replica has {}",
            self.storage.num_chunks(),
            info.num_chunks
        );
        if info.num_chunks < self.storage.num_chunks() {
            bail!("insufficient replica storage size");
        }

        tracing::info!("Local StorageID: {}", self.storage.id());
        tracing::info!("Replica StorageID: {}", info.storage_id);
        if info.storage_id != self.storage.id() {
            bail!("master and replica's storage IDs don't match");
        }

        Ok(())
    }

    /// Commit hook for a write of `input`: forwards to the replica when one
    /// is configured, accepts locally otherwise.
    pub(crate) fn commit_hook<'a>(&'a self, input: &'a IncomingData) -> ForwardToReplica<'a> {
        ForwardToReplica {
            replication: self.replication.as_ref(),
            input,
        }
    }

    /// Builds the HTTP application. The write route depends on the role:
    /// only a master exposes `append`, only a replica exposes `set`.
    pub fn app(self: &Arc<Self>) -> axum::Router {
        let router = axum::Router::new()
            .route(ENDPOINT_INFO, get(handle_info::<B>))
            .route(
                &format!("{}/:ids", super::protocol::ENDPOINT_GET),
                get(handle_get_data::<B>),
            );

        let router = match self.role {
            Role::Master => router.route(
                super::protocol::ENDPOINT_APPEND,
                post(handle_append_data::<B>),
            ),
            Role::Replica => router.route(
                &format!("{}/:id", ENDPOINT_SET),
                post(handle_set_data::<B>),
            ),
        };

        router.layer(Extension(self.clone()))
    }
}

/// Synchronous replication: POSTs the record to the replica's `set`
/// endpoint at the same chunk index and fails the commit on any transport
/// error or non-200 response.
pub(crate) struct ForwardToReplica<'a> {
    replication: Option<&'a Replication>,
    input: &'a IncomingData,
}

#[async_trait]
impl CommitHook for ForwardToReplica<'_> {
    async fn commit(&self, start_idx: usize) -> anyhow::Result<()> {
        let Some(repl) = self.replication else {
            return Ok(());
        };

        let url = format!("{}{}/{}", repl.target, ENDPOINT_SET, start_idx);
        let resp = repl.client.post(&url).json(self.input).send().await?;
        if resp.status() != reqwest::StatusCode::OK {
            bail!("non-ok status code from replica: {}", resp.status().as_u16());
        }
        Ok(())
    }
}
