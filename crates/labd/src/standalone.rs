//! Standalone mode: every subsystem in one process, backed by the
//! config-driven provider.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use labgrid_core::LabConfig;
use labgrid_lifecycle::{LifecycleConfig, ServerLifecycle};
use labgrid_provider::LocalProvider;
use labgrid_reconcile::{
    AutoDestroyReconciler, AutoRemediateReconciler, Supervisor, start_auto_destroy_loop,
    start_auto_remediate_loop,
};
use labgrid_state::StateStore;

pub async fn run_standalone(config: LabConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!("labgrid daemon starting in standalone mode");

    // Ensure data directory exists.
    let data_dir = &config.server.data_dir;
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("labgrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = Arc::new(StateStore::open(&db_path)?);
    info!(path = ?db_path, "state store opened");

    let provider = Arc::new(LocalProvider::new(
        config.provider.clone(),
        config.probe_timeout(),
    ));
    info!(
        endpoint_template = %config.provider.endpoint_template,
        storage_account = %config.provider.storage_account,
        "local provider initialized"
    );

    let lifecycle = Arc::new(ServerLifecycle::new(
        store,
        provider.clone(),
        LifecycleConfig::from_config(&config),
    ));
    info!(
        attempts = lifecycle.config().readiness_attempts(),
        probe_path = %lifecycle.config().probe_path,
        "server lifecycle initialized"
    );

    let auto_destroy = Arc::new(AutoDestroyReconciler::new(
        lifecycle.clone(),
        config.auto_destroy_interval(),
        config.provider_timeout(),
    ));
    let auto_remediate = Arc::new(AutoRemediateReconciler::new(
        provider,
        config.auto_remediate_interval(),
        config.provider_timeout(),
    ));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let destroy_handle = start_auto_destroy_loop(
        auto_destroy,
        Supervisor::from_config("auto-destroy", &config),
        shutdown_rx.clone(),
    );
    let remediate_handle = start_auto_remediate_loop(
        auto_remediate,
        Supervisor::from_config("auto-remediate", &config),
        shutdown_rx,
    );

    // ── Start API server ───────────────────────────────────────

    let router = labgrid_api::build_router(lifecycle);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C, shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    for (name, handle) in [("auto-destroy", destroy_handle), ("auto-remediate", remediate_handle)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(loop_name = name, error = %e, "reconciler had stopped early"),
            Err(e) => warn!(loop_name = name, error = %e, "reconciler task failed"),
        }
    }

    info!("labgrid daemon stopped");
    Ok(())
}
