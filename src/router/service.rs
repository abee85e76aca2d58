//! The router: shard directory, health tracking and dispatch state.
//!
//! Shards are addressed by storage ID. Each shard contributes exactly one
//! writer (its master) and two readers (master and replica). A background
//! pinger keeps the per-role liveness flags current; handlers snapshot the
//! alive sets under the corresponding lock and never hold a lock across an
//! outbound call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use axum::extract::Extension;
use axum::routing::{get, post};
use tokio::sync::{mpsc, RwLock};

use crate::config::RouterCfg;
use crate::server::protocol::{InfoResponse, ENDPOINT_INFO};

use super::handlers::{handle_get_data, handle_put_data};

/// One storage server as seen from the router, in one role. The master of a
/// shard appears twice with independent liveness: as the shard's writer
/// (dead while full) and as one of its readers (fullness is irrelevant for
/// reads).
#[derive(Debug, Clone)]
pub(crate) struct StorageInstance {
    pub host: String,
    pub is_alive: bool,
}

struct Upstream {
    name: String,
    master_host: String,
    replica_host: String,
}

pub struct Router {
    upstreams: Vec<Upstream>,
    panic_on_faulty: bool,
    pub(crate) storage_timeout: Duration,
    check_interval: Duration,
    pub(crate) client: reqwest::Client,
    pub(crate) writers: RwLock<HashMap<u64, StorageInstance>>,
    pub(crate) readers: RwLock<HashMap<u64, Vec<StorageInstance>>>,
}

impl Router {
    /// Creates a router from config. Upstreams are probed later, by
    /// [`configure_upstreams`](Self::configure_upstreams).
    pub fn new(cfg: &RouterCfg) -> Arc<Self> {
        let upstreams = cfg
            .upstreams
            .iter()
            .map(|(name, pair)| Upstream {
                name: name.clone(),
                master_host: pair.master.clone(),
                replica_host: pair.replica.clone(),
            })
            .collect();

        Arc::new(Self {
            upstreams,
            panic_on_faulty: cfg.panic_on_faulty,
            storage_timeout: cfg.storage_timeout,
            check_interval: cfg.storage_check_interval,
            client: reqwest::Client::new(),
            writers: RwLock::new(HashMap::new()),
            readers: RwLock::new(HashMap::new()),
        })
    }

    /// Probes every configured upstream pair and builds the shard directory.
    ///
    /// A pair whose sides disagree on storage ID is rejected; a pair with
    /// one unreachable side is registered unchecked under the ID the healthy
    /// side reported; a fully unreachable pair is skipped. Fails when
    /// `panic_on_faulty` is set and anything went wrong, or when no usable
    /// shard remains.
    pub async fn configure_upstreams(&self) -> anyhow::Result<()> {
        let mut last_error: Option<anyhow::Error> = None;

        for upstream in &self.upstreams {
            let master_info = match self.get_app_info(&upstream.master_host).await {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::error!(
                        "error getting info on {} master ({}): {}",
                        upstream.name,
                        upstream.master_host,
                        e
                    );
                    last_error = Some(e);
                    None
                }
            };
            let replica_info = match self.get_app_info(&upstream.replica_host).await {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::error!(
                        "error getting info on {} replica ({}): {}",
                        upstream.name,
                        upstream.replica_host,
                        e
                    );
                    last_error = Some(e);
                    None
                }
            };

            let instance_id = match (&master_info, &replica_info) {
                (Some(master), Some(replica)) => {
                    if master.storage_id != replica.storage_id {
                        let e = anyhow!("{} instances' storage ids don't match", upstream.name);
                        tracing::error!("{}", e);
                        last_error = Some(e);
                        continue;
                    }
                    master.storage_id
                }
                (Some(master), None) => {
                    tracing::warn!(
                        "{} instances are added unchecked due to errors during getting info",
                        upstream.name
                    );
                    master.storage_id
                }
                (None, Some(replica)) => {
                    tracing::warn!(
                        "{} instances are added unchecked due to errors during getting info",
                        upstream.name
                    );
                    replica.storage_id
                }
                (None, None) => {
                    let e = anyhow!(
                        "{} instances are not accessible so can't be used",
                        upstream.name
                    );
                    tracing::error!("{}", e);
                    last_error = Some(e);
                    continue;
                }
            };

            let mut readers = self.readers.write().await;
            let mut writers = self.writers.write().await;

            if readers.contains_key(&instance_id) {
                let e = anyhow!(
                    "StorageID {} has already been used by another instance, skipping",
                    instance_id
                );
                tracing::error!("{}", e);
                last_error = Some(e);
                continue;
            }

            writers.insert(
                instance_id,
                StorageInstance {
                    host: upstream.master_host.clone(),
                    is_alive: true,
                },
            );
            tracing::info!(
                "added writer {}: host={} storageID={}",
                upstream.name,
                upstream.master_host,
                instance_id
            );

            readers.insert(
                instance_id,
                vec![
                    StorageInstance {
                        host: upstream.master_host.clone(),
                        is_alive: true,
                    },
                    StorageInstance {
                        host: upstream.replica_host.clone(),
                        is_alive: true,
                    },
                ],
            );
            tracing::info!(
                "added readers {}: master={} replica={} storageID={}",
                upstream.name,
                upstream.master_host,
                upstream.replica_host,
                instance_id
            );
        }

        if self.panic_on_faulty {
            if let Some(e) = last_error {
                return Err(e.context("panic due to upstream failure (and panic_on_faulty flag)"));
            }
        }

        let readers = self.readers.read().await;
        let writers = self.writers.read().await;
        if readers.is_empty() || writers.is_empty() {
            bail!(
                "not enough instances to work with ({} readers and {} writers)",
                readers.len(),
                writers.len()
            );
        }

        Ok(())
    }

    pub(crate) async fn get_app_info(&self, host: &str) -> anyhow::Result<InfoResponse> {
        let url = format!("http://{}{}", host, ENDPOINT_INFO);
        let resp = self
            .client
            .get(&url)
            .timeout(self.storage_timeout)
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    /// Spawns the background health loop and returns its stop signal. One
    /// send on the returned channel terminates the loop.
    pub fn spawn_pinger(self: &Arc<Self>) -> mpsc::Sender<()> {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let router = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(router.check_interval);
            // consume the immediate tick; the first round runs one interval in
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => router.ping_upstreams().await,
                    _ = stop_rx.recv() => break,
                }
            }
            tracing::info!("upstream pinger stopped");
        });

        stop_tx
    }

    /// One health round over every writer and reader. Liveness rules differ
    /// per role: a full writer counts as dead, a full reader does not.
    /// Transitions are logged only on state change.
    pub(crate) async fn ping_upstreams(&self) {
        let writer_snapshot: Vec<(u64, String, bool)> = {
            let writers = self.writers.read().await;
            writers
                .iter()
                .map(|(id, w)| (*id, w.host.clone(), w.is_alive))
                .collect()
        };

        for (iid, host, was_alive) in writer_snapshot {
            match self.get_app_info(&host).await {
                Err(e) => {
                    if was_alive {
                        tracing::info!(
                            "writer {} (host={}) becomes dead due to ping error: {}",
                            iid,
                            host,
                            e
                        );
                        if let Some(w) = self.writers.write().await.get_mut(&iid) {
                            w.is_alive = false;
                        }
                    }
                }
                Ok(info) => {
                    let new_alive = !info.is_full;
                    if new_alive != was_alive {
                        if new_alive {
                            tracing::info!("writer {} (host={}) becomes alive", iid, host);
                        } else {
                            tracing::info!(
                                "writer {} (host={}) is full, thus marked as dead",
                                iid,
                                host
                            );
                        }
                        if let Some(w) = self.writers.write().await.get_mut(&iid) {
                            w.is_alive = new_alive;
                        }
                    }
                }
            }
        }

        let reader_snapshot: Vec<(u64, usize, String, bool)> = {
            let readers = self.readers.read().await;
            readers
                .iter()
                .flat_map(|(id, list)| {
                    let id = *id;
                    list.iter()
                        .enumerate()
                        .map(move |(pos, r)| (id, pos, r.host.clone(), r.is_alive))
                })
                .collect()
        };

        for (iid, pos, host, was_alive) in reader_snapshot {
            match self.get_app_info(&host).await {
                Err(e) => {
                    if was_alive {
                        tracing::info!(
                            "reader {} (host={}) becomes dead due to ping error: {}",
                            iid,
                            host,
                            e
                        );
                        if let Some(list) = self.readers.write().await.get_mut(&iid) {
                            if let Some(r) = list.get_mut(pos) {
                                r.is_alive = false;
                            }
                        }
                    }
                }
                Ok(_) => {
                    if !was_alive {
                        tracing::info!("reader {} (host={}) becomes alive", iid, host);
                        if let Some(list) = self.readers.write().await.get_mut(&iid) {
                            if let Some(r) = list.get_mut(pos) {
                                r.is_alive = true;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Snapshot of alive writers as `(storage_id, host)` pairs.
    pub(crate) async fn alive_writers(&self) -> Vec<(u64, String)> {
        let writers = self.writers.read().await;
        writers
            .iter()
            .filter(|(_, w)| w.is_alive)
            .map(|(id, w)| (*id, w.host.clone()))
            .collect()
    }

    /// Snapshot of a shard's alive reader hosts; `None` when the shard is
    /// unknown.
    pub(crate) async fn alive_readers(&self, instance_id: u64) -> Option<Vec<String>> {
        let readers = self.readers.read().await;
        readers.get(&instance_id).map(|list| {
            list.iter()
                .filter(|r| r.is_alive)
                .map(|r| r.host.clone())
                .collect()
        })
    }

    /// Builds the HTTP application.
    pub fn app(self: &Arc<Self>) -> axum::Router {
        axum::Router::new()
            .route("/put", post(handle_put_data))
            .route("/get/:instance_id/:item_id", get(handle_get_data))
            .layer(Extension(self.clone()))
    }
}
