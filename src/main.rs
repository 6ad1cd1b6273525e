use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tollgate::config::{LoggingConfig, StoreBackend, TollgateConfig};
use tollgate::http::HttpServer;
use tollgate::ratelimit::{
    CounterStore, InMemoryCounterStore, PolicyTable, RateLimiter, RedisCounterStore,
};

/// HTTP request rate limiter backed by a shared counter store.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "TOLLGATE_CONFIG")]
    config: Option<String>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit JSON formatted logs
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TollgateConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.http_addr = listen;
    }
    if cli.log_json {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting Tollgate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        backend = ?config.store.backend,
        "Configuration loaded"
    );

    let policies = config.rate_limiting.policy_table()?;
    info!(
        max_requests = policies.default_policy.max_requests,
        window_ms = policies.default_policy.window_ms,
        overrides = policies.user_policies.len(),
        "Rate limit policies loaded"
    );

    match config.store.backend {
        StoreBackend::Redis => {
            let url = config.store.url();
            let store = RedisCounterStore::connect(&url).await?;
            info!(url = %url, "Connected to Redis counter store");
            run(&config, Arc::new(store), policies).await?;
        }
        StoreBackend::Memory => {
            info!("Using in-memory counter store; limits are not shared between instances");
            run(&config, Arc::new(InMemoryCounterStore::new()), policies).await?;
        }
    }

    info!("Tollgate Rate Limiting Service stopped");
    Ok(())
}

async fn run<S: CounterStore + 'static>(
    config: &TollgateConfig,
    store: Arc<S>,
    policies: PolicyTable,
) -> anyhow::Result<()> {
    let rate_limiter = RateLimiter::new(store, policies)
        .with_key_prefix(config.store.key_prefix.clone())
        .with_store_timeout(config.store.timeout());

    let server = HttpServer::new(
        config.server.http_addr,
        Arc::new(rate_limiter),
        config.rate_limiting.identity_header.clone(),
    );

    server.serve_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true),
            )
            .init();
    }
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
