//! Storage server daemon.

use std::fs::OpenOptions;

use anyhow::Context;
use clap::Parser;

use bookstore::common::logging;
use bookstore::config::load_server_config;
use bookstore::server::service::Server;
use bookstore::storage::backend::FileBackend;
use bookstore::storage::engine::Storage;

const DEFAULT_CONFIG_FILENAME: &str = "/etc/bsserver.cfg";

#[derive(Parser)]
#[command(name = "bsserver", about = "bookstore storage server")]
struct Cli {
    /// Configuration filename
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILENAME)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = load_server_config(&cli.config).context("error reading config")?;
    logging::init(&cfg.log_file).context("error opening logfile")?;

    // The replica writes too: it takes records from its master via `set`.
    let storage_file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&cfg.storage_file)
        .with_context(|| format!("error opening storage file {}", cfg.storage_file))?;
    let storage =
        Storage::open(FileBackend::new(storage_file)).context("error opening storage")?;

    let server = Server::new(storage, &cfg).context("error configuring server")?;
    server.precheck().await.context("error starting server")?;

    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("error binding to {}", cfg.bind))?;
    tracing::info!("server is starting at {}", cfg.bind);

    axum::serve(listener, server.app())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
