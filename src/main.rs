use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, trace, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, StoreBackend, TurnstileConfig};
use turnstile::http::{HttpServer, Interceptor};
use turnstile::ratelimit::{
    CounterStore, LimitSettings, MemoryStore, RateLimiter, RedisStore, RedisStoreOptions,
};

/// Fixed-window rate limiting in front of HTTP routes.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<std::net::SocketAddr>,

    /// Override the counter store backend
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(store) = args.store {
        config.store.backend = store;
    }
    config.validate()?;

    init_tracing(config.logging.format);

    info!("Starting Turnstile Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        limit_by_ip = config.rate_limiting.limit_by_ip,
        limit_by_token = config.rate_limiting.limit_by_token,
        block_duration_secs = config.rate_limiting.block_duration_secs,
        "Configuration loaded"
    );

    if config.server.trust_proxy_headers {
        warn!(
            "Client IPs are taken from X-Forwarded-For / X-Real-IP; \
             only run this way behind a proxy that sets those headers"
        );
    }

    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Redis => {
            let options = RedisStoreOptions {
                key_prefix: config.store.key_prefix.clone(),
                timeout: config.store.timeout(),
            };
            Arc::new(RedisStore::connect(&config.store.redis_url, options).await?)
        }
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            spawn_sweeper(store.clone(), config.store.sweep_interval());
            store
        }
    };

    let settings = LimitSettings::from(&config.rate_limiting);
    let rate_limiter = Arc::new(RateLimiter::new(store, settings)?);
    info!("Rate limiter initialized");

    let interceptor = Arc::new(Interceptor::new(rate_limiter, &config.server)?);
    let server = HttpServer::new(config.server.listen_addr, interceptor);

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Turnstile Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Periodically drop lapsed records from the in-memory store.
fn spawn_sweeper(store: Arc<MemoryStore>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = store.purge_expired();
            trace!(removed = removed, remaining = store.len(), "Swept in-memory counter store");
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
