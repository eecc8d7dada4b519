use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use marketgate::config::{LogFormat, LoggingConfig, MarketgateConfig};
use marketgate::http::{HttpServer, RateLimitState};
use marketgate::ratelimit::{
    CounterStore, LimiterSettings, MemoryStore, RateLimiter, RedisStore, RouteRules, Sweeper,
};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "marketgate")]
#[command(about = "Rate limited HTTP gateway for the marketplace API")]
#[command(version)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Route rules file, overrides `rate_limiting.rules_path`
    #[arg(short, long)]
    rules: Option<String>,

    /// Address to listen on, overrides `server.http_addr`
    #[arg(short, long)]
    addr: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = MarketgateConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.http_addr = addr;
    }
    if args.rules.is_some() {
        config.rate_limiting.rules_path = args.rules.clone();
    }
    if args.json_logs {
        config.logging.format = LogFormat::Json;
    }

    init_tracing(&config.logging);

    info!("Starting Marketgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        environment = ?config.server.environment,
        "Configuration loaded"
    );

    let rules = match config.rate_limiting.rules_path.as_deref() {
        Some(path) => RouteRules::from_file(path)?,
        None => {
            warn!("No rate limit rules configured, no route will be limited");
            RouteRules::new()
        }
    };
    info!(rules = rules.len(), "Rate limit rules loaded");

    let store = build_store(config.rate_limiting.redis_url.as_deref()).await;
    let sweeper = Sweeper::spawn(
        store.clone(),
        Duration::from_secs(config.rate_limiting.sweep_interval_secs.max(1)),
    );

    let limiter = Arc::new(RateLimiter::with_rules(
        store,
        LimiterSettings::from_config(&config),
        rules,
    ));
    info!(backend = limiter.store().backend(), "Rate limiter initialized");

    let reloader = spawn_rules_reloader(&config, limiter.clone());

    let state = RateLimitState::from_config(limiter, &config.rate_limiting)?;
    let server = HttpServer::new(config.server.http_addr, state);

    server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(reloader) = reloader {
        reloader.abort();
    }
    sweeper.shutdown().await;

    info!("Marketgate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Use Redis when it is configured and reachable, the in-memory store otherwise.
async fn build_store(redis_url: Option<&str>) -> Arc<dyn CounterStore> {
    let Some(url) = redis_url else {
        info!("No Redis URL configured, using in-memory counters");
        return Arc::new(MemoryStore::new());
    };

    match RedisStore::connect(url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "Failed to connect to Redis, using in-memory counters");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Periodically reload the rules file, keeping the current rules when it fails to parse.
fn spawn_rules_reloader(
    config: &MarketgateConfig,
    limiter: Arc<RateLimiter>,
) -> Option<tokio::task::JoinHandle<()>> {
    let path = config.rate_limiting.rules_path.clone()?;
    let interval_secs = config.rate_limiting.rules_reload_interval_secs;
    if interval_secs == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match RouteRules::from_file(&path) {
                Ok(rules) => limiter.set_rules(rules),
                Err(e) => warn!(path = %path, error = %e, "Failed to reload rate limit rules"),
            }
        }
    }))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
