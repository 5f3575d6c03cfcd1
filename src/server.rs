use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use crate::{
    app_context::LauncherContext,
    config::LauncherConfig,
    observability::{
        logging::{self, LoggingConfig},
        metrics::{self, PrometheusConfig},
    },
};

/// Build the context from configuration and run until SIGINT/SIGTERM.
pub async fn startup(config: LauncherConfig) -> anyhow::Result<()> {
    static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

    let _log_guard = if !LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        Some(logging::init_logging(LoggingConfig {
            level: config
                .log_level
                .as_deref()
                .map(logging::parse_level)
                .unwrap_or(tracing::Level::INFO),
            json_format: config.log_json,
            log_dir: config.log_dir.clone(),
        }))
    } else {
        None
    };

    if let Some(metrics_config) = &config.metrics {
        let prometheus_config = PrometheusConfig {
            port: metrics_config.port,
            host: metrics_config.host.clone(),
            ..Default::default()
        };
        metrics::start_prometheus(prometheus_config, &config.dataplane_identity())
            .context("failed to start Prometheus exporter")?;
        info!(
            "Prometheus metrics on {}:{}",
            metrics_config.host, metrics_config.port
        );
    }

    info!(
        "Starting workload launcher | dataplane: {} | registry: {} | max concurrent launches: {}",
        config.dataplane_id, config.registry.url, config.queue.max_concurrent_launches
    );

    let context = LauncherContext::from_config(config)
        .await
        .map_err(anyhow::Error::msg)?;

    if !run(context, shutdown_signal()).await {
        warn!("Exited with launches still in flight");
    }
    Ok(())
}

/// Start every background component, wait for `shutdown`, then drain.
/// Returns whether the launch queue drained within the grace period.
pub async fn run(context: LauncherContext, shutdown: impl Future<Output = ()>) -> bool {
    let config = &context.config;

    let sampler = config.load_shed.enabled.then(|| {
        context.pressure.spawn_sampler(
            context.executor.clone(),
            Duration::from_secs(config.load_shed.sample_interval_secs),
            config.timeouts.executor(),
        )
    });

    let queue = context.start_queue();

    if config.rehydrate_on_startup {
        if let Err(e) = context.rehydrator(queue.clone()).rehydrate().await {
            error!("Startup rehydration failed: {}", e);
        }
    }

    let poller = config
        .poller
        .enabled
        .then(|| std::sync::Arc::new(context.poller(queue.clone())).spawn());

    info!(
        "Workload launcher running with stages {:?}",
        context.pipeline().stage_names()
    );

    shutdown.await;

    let drained = queue.shutdown(config.shutdown_grace_period()).await;

    for handle in [poller, sampler].into_iter().flatten() {
        handle.abort();
    }
    info!("Workload launcher stopped");
    drained
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
