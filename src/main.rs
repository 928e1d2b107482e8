//! Sinkhole DNS proxy - Entry point.
//!
//! Loads the configuration and the model, then answers DNS queries over UDP
//! (and TCP) until Ctrl-C, blocking domains the model scores as ads or
//! trackers and forwarding the rest upstream.

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sinkhole::cache::MokaDecisionCache;
use sinkhole::config::Config;
use sinkhole::dns::{DomainRules, UdpForwarder};
use sinkhole::features::LexicalFeatures;
use sinkhole::model::TreeEnsemble;
use sinkhole::server::{HandlerSettings, QueryHandler, ServerConfig, run_tcp, run_udp};
use sinkhole::stats::{AuditLog, Stats};

async fn run() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed("config.toml"));
    let config = Config::load(config_path.as_ref()).context("Failed to load configuration")?;

    // Initialize metrics (must be done early, before any metrics are recorded)
    sinkhole::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    info!("Starting sinkhole DNS proxy...");
    info!("Upstream resolver: {}", config.upstream_resolver);
    if let Some(secondary) = config.secondary_resolver {
        info!("Secondary resolver: {secondary}");
    }
    info!("Block threshold: {}", config.threshold);
    info!("Cache TTL: {} seconds", config.cache_ttl_seconds);

    let model = TreeEnsemble::load(&config.model_path).with_context(|| {
        format!("Failed to load model from {}", config.model_path.display())
    })?;
    let features = LexicalFeatures::for_columns(model.feature_names());

    let rules = DomainRules::new(&config.allowlist, &config.blocklist);
    info!(
        allow = rules.allow_count(),
        deny = rules.deny_count(),
        "static rules loaded"
    );

    let audit = AuditLog::from_config(&config.audit).context("Failed to open audit log")?;
    let stats = Arc::new(Stats::new());

    let cache = MokaDecisionCache::new(config.cache_ttl(), config.cache_size);
    let forwarder = UdpForwarder::bind(
        config.upstream_sockets,
        config.upstream_resolver.is_ipv6(),
    )
    .await
    .context("Failed to bind upstream sockets")?;

    let handler = QueryHandler::new(
        cache,
        forwarder,
        features,
        model,
        HandlerSettings::from_config(&config),
    )
    .context("Feature provider does not match the model")?
    .with_rules(rules)
    .with_audit(audit)
    .with_stats(Arc::clone(&stats));

    let server_config = ServerConfig::from_config(&config);
    let socket = Arc::new(
        UdpSocket::bind(config.listen)
            .await
            .with_context(|| format!("Failed to bind UDP {}", config.listen))?,
    );
    let udp_handle = tokio::spawn({
        let handler = handler.clone();
        let server_config = server_config.clone();
        async move { run_udp(socket, handler, &server_config).await }
    });

    let tcp_handle = if config.tcp {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("Failed to bind TCP {}", config.listen))?;
        Some(tokio::spawn(async move {
            run_tcp(listener, handler, &server_config).await
        }))
    } else {
        None
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down...");
        }
        result = udp_handle => {
            match result {
                Ok(Err(err)) => error!("UDP listener failed: {err}"),
                Err(err) => error!("UDP listener task failed: {err}"),
                Ok(Ok(())) => {}
            }
        }
    }

    if let Some(handle) = tcp_handle {
        handle.abort();
    }

    stats.log_summary();
    info!("Shutdown complete.");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    run().await
}
