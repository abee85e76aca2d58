//! Router daemon.

use anyhow::Context;
use clap::Parser;

use bookstore::common::logging;
use bookstore::config::load_router_config;
use bookstore::router::service::Router;

const DEFAULT_CONFIG_FILENAME: &str = "/etc/bsrouter.cfg";

#[derive(Parser)]
#[command(name = "bsrouter", about = "bookstore routing proxy")]
struct Cli {
    /// Configuration filename
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILENAME)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = load_router_config(&cli.config).context("error reading config")?;
    logging::init(&cfg.log_file).context("error opening logfile")?;

    let router = Router::new(&cfg);
    router
        .configure_upstreams()
        .await
        .context("error starting router server")?;

    let pinger_stop = router.spawn_pinger();

    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("error binding to {}", cfg.bind))?;
    tracing::info!("server is starting at {}", cfg.bind);

    // stop order on SIGINT: the pinger first, then the HTTP drain
    axum::serve(listener, router.app())
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            pinger_stop.send(()).await.ok();
            tracing::info!("shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
