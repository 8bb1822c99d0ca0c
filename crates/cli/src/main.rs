//! TRIGRA entry point.
//!
//! This binary is the composition root for the whole system:
//!
//! 1. **Load configuration** from environment variables ([`config`]).
//! 2. **Wire observability**: `tracing-subscriber` text or JSON output,
//!    `RUST_LOG` filtering and an optional OpenTelemetry OTLP exporter
//!    ([`telemetry`]).
//! 3. **Construct infrastructure**: the Kubernetes applier and the configured
//!    Git provider, injected into a [`gitops::SyncEngine`].
//! 4. **Register the webhook** when `PUBLIC_URL` is set ([`webhook_setup`]).
//! 5. **Serve** webhooks until SIGINT/SIGTERM, then drain in-flight requests.

mod config;
mod telemetry;
mod webhook_setup;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use applier::KubeApplier;
use gitops::SyncEngine;
use listener::WebhookServer;

use crate::config::Config;

/// Upper bound on draining in-flight requests after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    let telemetry = telemetry::init(config.log_format, config.otlp_endpoint.as_deref())
        .context("failed to initialise telemetry")?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting TRIGRA");
    let result = run(config).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "TRIGRA stopped with an error");
    }

    telemetry.shutdown();
    result
}

async fn run(config: Config) -> anyhow::Result<()> {
    if config.token.is_none() {
        warn!("GIT_TOKEN is not set; API calls are unauthenticated and private repositories cannot be read");
    }

    let in_cluster = applier::running_in_cluster();
    let client = applier::connect(in_cluster)
        .await
        .context("failed to create Kubernetes client")?;
    let kube_applier = Arc::new(KubeApplier::new(client));

    let provider = providers::build_provider(&config.provider_settings())
        .context("failed to create git provider")?;
    info!(
        provider = %provider.kind(),
        namespace = %config.namespace,
        in_cluster,
        "Initialized"
    );

    webhook_setup::ensure_webhook(provider.as_ref(), &config, webhook_setup::SETUP_TIMEOUT).await;

    let mut engine = SyncEngine::new(provider, kube_applier, config.namespace.clone());
    if let Some(branch) = &config.branch {
        info!(branch = %branch, "Only syncing pushes to branch");
        engine = engine.with_branch_filter(branch.clone());
    }

    let server = WebhookServer::new(engine, config.webhook_secret.clone(), config.port);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut serving = tokio::spawn(server.serve(async move {
        let _ = stop_rx.await;
    }));

    tokio::select! {
        joined = &mut serving => {
            return joined.context("webhook server task failed")?.context("webhook server failed");
        }
        _ = shutdown_signal() => {}
    }

    info!("Shutdown signal received, draining requests");
    let _ = stop_tx.send(());
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, serving).await {
        Ok(joined) => joined
            .context("webhook server task failed")?
            .context("webhook server failed")?,
        Err(_) => warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Timed out waiting for in-flight requests"
        ),
    }
    info!("Server exited");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
