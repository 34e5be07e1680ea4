use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cmd_util::env::config_service;
use metrics::PrometheusMetrics;
use parking_lot::Mutex;
use pipeline::{
    InMemorySubmissionCache,
    PlatformClient,
    SiteClient,
    SubmissionCache,
    SubscriptionWatcher,
};
use prometheus::Registry;
use query::SubmissionID;
use runtime::prod::ProdRuntime;
use tokio::signal;
use watcher::{
    clients::{
        UnconfiguredPlatformClient,
        UnconfiguredSiteClient,
    },
    config::{
        WatcherArgs,
        WatcherConfig,
    },
};

fn main() -> anyhow::Result<()> {
    let _guard = config_service();
    let config = WatcherConfig::load(WatcherArgs::parse())?;
    tracing::info!(?config, "starting subscription watcher");

    if !config.enabled {
        tracing::info!("watcher disabled by configuration, exiting");
        return Ok(());
    }

    let tokio_rt = ProdRuntime::init_tokio()?;
    let runtime = ProdRuntime::new(&tokio_rt);
    runtime.block_on(run(runtime.clone(), config))
}

async fn run(runtime: ProdRuntime, config: WatcherConfig) -> anyhow::Result<()> {
    let (store, latest_ids) = subscriptions::persist::load(&config.subscriptions_path)
        .with_context(|| format!("loading subscriptions from {}", config.subscriptions_path.display()))?;
    let store = Arc::new(Mutex::new(store));
    let seen_ids: Vec<SubmissionID> = latest_ids.iter().filter_map(|id| id.parse().ok()).map(SubmissionID).collect();

    let registry = Registry::new();
    let metrics = Arc::new(PrometheusMetrics::new(&registry).context("setting up metrics registry")?);
    let cache: Arc<dyn SubmissionCache> = Arc::new(InMemorySubmissionCache::new());
    let site_client: Arc<dyn SiteClient> = Arc::new(UnconfiguredSiteClient);
    let platform: Arc<dyn PlatformClient> = Arc::new(UnconfiguredPlatformClient);

    let subscription_watcher = SubscriptionWatcher::new(
        config.pipeline.clone(),
        site_client,
        platform,
        cache,
        store.clone(),
        metrics,
        runtime,
        seen_ids,
    );
    subscription_watcher.run();

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight work");

    let (progress, seen_ids) = subscription_watcher.shutdown().await;
    if let Some(progress) = &progress {
        tracing::info!(sub_id = %progress.latest_id, observed = %progress.latest_observed, "last delivered submission");
    }
    let latest_ids: Vec<String> = seen_ids.into_iter().map(|id| id.key().to_string()).collect();
    subscriptions::persist::save(&store.lock(), &latest_ids, &config.subscriptions_path)
        .with_context(|| format!("saving subscriptions to {}", config.subscriptions_path.display()))?;
    Ok(())
}

/// Waits for Ctrl+C or, on Unix, SIGTERM -- whichever arrives first.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
