mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rdns::handler::RequestHandler;
use rdns::server;
use rdns::{Resolver, ServerConfig};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use supervisor::spawn_supervised;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{error, info};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_CONFIG_PATH: &str = "/etc/recursord/config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,recursord=debug".parse().unwrap()),
        )
        .init();

    info!("recursord starting...");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = ServerConfig::load(&config_path).context("failed to load config")?;
    config.validate().context("invalid config")?;

    let resolver = Arc::new(Resolver::new(&config));
    let handler = Arc::new(RequestHandler::new(resolver.clone(), &config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut listeners = Vec::new();

    // Sockets are bound up front so a bad bind is a startup failure, then
    // handed to supervised listener loops.
    if config.enable_udp {
        let socket = server::bind_udp(&config)
            .await
            .with_context(|| format!("failed to bind UDP {}", config.udp_addr()))?;
        let handler = handler.clone();
        let shutdown = shutdown_rx.clone();
        let max_udp_size = config.max_udp_size;
        listeners.push(spawn_supervised("dns-udp", move || {
            let socket = socket.clone();
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            async move { server::run_udp_listener(socket, handler, shutdown, max_udp_size).await }
        }));
    }

    if config.enable_tcp {
        let listener = server::bind_tcp(&config)
            .await
            .with_context(|| format!("failed to bind TCP {}", config.tcp_addr()))?;
        let handler = handler.clone();
        let shutdown = shutdown_rx.clone();
        let tcp_config = config.clone();
        listeners.push(spawn_supervised("dns-tcp", move || {
            let listener = listener.clone();
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            let config = tcp_config.clone();
            async move { server::run_tcp_listener(listener, handler, shutdown, config).await }
        }));
    }

    info!(
        udp = config.enable_udp,
        tcp = config.enable_tcp,
        caching = config.enable_caching,
        recursion = config.enable_recursion,
        "recursord started"
    );

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    if let Some(signal) = signals.next().await {
        info!(signal, "received shutdown signal");
    }

    // Graceful shutdown: cancel, drain the listeners, then close the cache.
    let _ = shutdown_tx.send(true);
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    let mut drained = true;
    for task in listeners {
        if tokio::time::timeout_at(deadline, task).await.is_err() {
            drained = false;
            break;
        }
    }
    resolver.close();

    if !drained {
        error!("shutdown timed out waiting for listeners to drain");
        anyhow::bail!("shutdown timeout");
    }

    let stats = resolver.stats().await;
    let hit_rate = format!("{:.1}%", stats.hit_rate() * 100.0);
    info!(
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        entries = stats.total_entries,
        capacity = stats.total_capacity,
        hit_rate = %hit_rate,
        "final cache statistics"
    );
    info!("recursord stopped");
    Ok(())
}
