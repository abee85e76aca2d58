//! Configuration Module
//!
//! INI-style config files for the storage server and the router. Parsing is
//! delegated to the `ini` crate; this module only maps keys to typed config
//! structs and fills in defaults.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use ini::Ini;

const DEFAULT_REPLICATION_TIMEOUT_MS: u64 = 250;
const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 500;
const DEFAULT_STORAGE_CHECK_INTERVAL_S: u64 = 30;
const DEFAULT_SERVER_LOG_FILE: &str = "/var/log/bookstore.log";

/// Storage server configuration.
#[derive(Debug, Clone)]
pub struct ServerCfg {
    pub bind: String,
    pub is_master: bool,
    /// Replica base URL, e.g. `http://127.0.0.1:4001`. Only a master
    /// replicates; a server without this entry commits locally.
    pub replicate_to: Option<String>,
    pub replication_timeout: Duration,
    pub storage_file: String,
    pub log_file: String,
}

/// One master/replica address pair, keyed by its section name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPair {
    pub master: String,
    pub replica: String,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterCfg {
    pub bind: String,
    pub log_file: String,
    pub panic_on_faulty: bool,
    pub storage_timeout: Duration,
    pub storage_check_interval: Duration,
    pub upstreams: HashMap<String, HostPair>,
}

fn get_str(ini: &Ini, section: &str, key: &str) -> Option<String> {
    ini.section(Some(section))
        .and_then(|s| s.get(key))
        .map(str::to_string)
}

fn require_str(ini: &Ini, section: &str, key: &str) -> anyhow::Result<String> {
    get_str(ini, section, key).ok_or_else(|| anyhow!("error reading {}.{}: key not found", section, key))
}

fn require_bool(ini: &Ini, section: &str, key: &str) -> anyhow::Result<bool> {
    require_str(ini, section, key)?
        .parse()
        .map_err(|_| anyhow!("error reading {}.{}: not a boolean", section, key))
}

fn get_u64(ini: &Ini, section: &str, key: &str) -> Option<u64> {
    get_str(ini, section, key).and_then(|v| v.parse().ok())
}

/// Parses a server config from INI text.
pub fn read_server_config(text: &str) -> anyhow::Result<ServerCfg> {
    let ini = Ini::load_from_str(text).context("error parsing config")?;

    let bind = require_str(&ini, "main", "bind")?;
    let is_master = require_bool(&ini, "main", "master")?;
    let storage_file = require_str(&ini, "storage", "file")?;

    let replicate_to = get_str(&ini, "replica", "host");
    let replication_timeout = Duration::from_millis(
        get_u64(&ini, "replica", "timeout").unwrap_or(DEFAULT_REPLICATION_TIMEOUT_MS),
    );

    let log_file =
        get_str(&ini, "main", "log").unwrap_or_else(|| DEFAULT_SERVER_LOG_FILE.to_string());

    Ok(ServerCfg {
        bind,
        is_master,
        replicate_to,
        replication_timeout,
        storage_file,
        log_file,
    })
}

/// Parses a router config from INI text. Every section other than `main`
/// that carries a `master` or `replica` key describes one upstream pair.
pub fn read_router_config(text: &str) -> anyhow::Result<RouterCfg> {
    let ini = Ini::load_from_str(text).context("error parsing config")?;

    let bind = require_str(&ini, "main", "bind")?;
    let log_file = get_str(&ini, "main", "log").unwrap_or_default();

    let storage_timeout = Duration::from_millis(
        get_u64(&ini, "main", "storage_timeout").unwrap_or(DEFAULT_STORAGE_TIMEOUT_MS),
    );
    let storage_check_interval = Duration::from_secs(
        get_u64(&ini, "main", "storage_check_interval").unwrap_or(DEFAULT_STORAGE_CHECK_INTERVAL_S),
    );
    let panic_on_faulty = get_str(&ini, "main", "panic_on_faulty")
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let mut upstreams = HashMap::new();
    for section in ini.sections().flatten() {
        if section == "main" {
            continue;
        }
        let master = get_str(&ini, section, "master").unwrap_or_default();
        let replica = get_str(&ini, section, "replica").unwrap_or_default();
        if !master.is_empty() || !replica.is_empty() {
            upstreams.insert(section.to_string(), HostPair { master, replica });
        }
    }

    Ok(RouterCfg {
        bind,
        log_file,
        panic_on_faulty,
        storage_timeout,
        storage_check_interval,
        upstreams,
    })
}

/// Reads and parses a server config file.
pub fn load_server_config(path: impl AsRef<Path>) -> anyhow::Result<ServerCfg> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("can not open config file {}", path.as_ref().display()))?;
    read_server_config(&text)
}

/// Reads and parses a router config file.
pub fn load_router_config(path: impl AsRef<Path>) -> anyhow::Result<RouterCfg> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("can not open config file {}", path.as_ref().display()))?;
    read_router_config(&text)
}
