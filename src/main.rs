//! window-cache server.
//!
//! Serves slices of a pull-through window over HTTP. The upstream is a
//! synthetic sequence source; the window lives either in this process
//! (`--mode local`) or in a store shared with other instances (`--mode shared`).

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use prometheus::Registry;
use tokio::net::TcpListener;
use tracing::info;

use window_cache::config::{Cli, Config, Mode};
use window_cache::metrics::WindowMetrics;
use window_cache::server::http_api::{build_router, AppState};
use window_cache::source::{PullSource, SequenceSource};
use window_cache::store::InMemoryStore;
use window_cache::window::{LocalWindowCache, SharedWindowCache, WindowCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "window_cache=debug,tower_http=debug"
    } else {
        "window_cache=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("window-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;
    let config = Arc::new(config);

    info!(
        mode = cli.mode.as_str(),
        ttl_secs = config.window.ttl_secs,
        default_pull_size = config.window.default_pull_size,
        amplification = config.window.amplification,
        "Configuration loaded"
    );

    let registry = Registry::new();
    let metrics = WindowMetrics::new(&registry)?;

    let source: Arc<dyn PullSource<u64>> = Arc::new(
        SequenceSource::new(config.source.start).with_max_batch(config.source.max_batch),
    );

    let cache = build_cache(&config, cli.mode, source, metrics).await?;

    // Build application state.
    let state = Arc::new(AppState {
        cache,
        registry,
        config: config.clone(),
        mode: cli.mode,
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = cli.listen.unwrap_or_else(|| config.server.listen.clone());
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_cache(
    config: &Config,
    mode: Mode,
    source: Arc<dyn PullSource<u64>>,
    metrics: WindowMetrics,
) -> anyhow::Result<Arc<dyn WindowCache<u64>>> {
    match mode {
        Mode::Local => {
            let cache =
                LocalWindowCache::new(source, (&config.window).into()).with_metrics(metrics);
            Ok(Arc::new(cache))
        }
        Mode::Shared => {
            let settings = &config.shared;
            info!(
                prefix = %settings.key_prefix,
                pull_size = settings.pull_size,
                cursor_mode = ?settings.cursor_mode,
                "Shared window"
            );

            if let Some(url) = &settings.redis_url {
                return connect_redis(url, config, source, metrics).await;
            }

            let cache = SharedWindowCache::new(InMemoryStore::new(), source, settings.into())
                .await?
                .with_metrics(metrics);
            Ok(Arc::new(cache))
        }
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(
    url: &str,
    config: &Config,
    source: Arc<dyn PullSource<u64>>,
    metrics: WindowMetrics,
) -> anyhow::Result<Arc<dyn WindowCache<u64>>> {
    let store = window_cache::store::RedisStore::connect(url).await?;
    let cache = SharedWindowCache::new(store, source, (&config.shared).into())
        .await?
        .with_metrics(metrics);
    Ok(Arc::new(cache))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(
    _url: &str,
    _config: &Config,
    _source: Arc<dyn PullSource<u64>>,
    _metrics: WindowMetrics,
) -> anyhow::Result<Arc<dyn WindowCache<u64>>> {
    anyhow::bail!("redis_url is set but window-cache was built without the `redis` feature")
}
