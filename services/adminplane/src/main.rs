//! Admin-plane HTTP service entry point.
//!
//! # Purpose
//! Loads configuration, builds storage and the policy engine, runs the startup
//! reconciliation and serves the admin API until shutdown.
//!
//! # Notes
//! `build_state` and `run_with_shutdown` are split out so wiring stays testable.
use adminplane::app::{self, AppState};
use adminplane::config::{AdminPlaneConfig, StorageBackend};
use adminplane::observability;
use adminplane::reconcile::spawn_policy_resync_task;
use adminplane::store::RbacStore;
use adminplane::store::memory::InMemoryStore;
use adminplane::store::postgres::PostgresStore;
use anyhow::Context;
use homework_authz::{CasbinPolicyEngine, PolicyEngine};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AdminPlaneConfig::from_env_or_yaml().context("admin plane config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: AdminPlaneConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("adminplane");
    let state = build_state(&config).await?;
    tracing::info!(
        backend = state.store.backend_name(),
        durable = state.store.is_durable(),
        "storage ready"
    );

    let modules = app::default_modules();
    let bootstrapped = app::bootstrap(state.clone(), &config.reconcile, &modules).await?;

    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));
    let resync_task = config
        .reconcile
        .policy_resync_interval_secs
        .filter(|secs| *secs > 0)
        .map(|secs| spawn_policy_resync_task(Arc::clone(&state.roles), Duration::from_secs(secs)));

    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "admin plane listening");
    axum::serve(listener, bootstrapped.router.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    metrics_task.abort();
    let _ = metrics_task.await;
    if let Some(task) = resync_task {
        task.abort();
        let _ = task.await;
    }
    Ok(())
}

async fn build_state(config: &AdminPlaneConfig) -> anyhow::Result<AppState> {
    let store: Arc<dyn RbacStore> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(
                PostgresStore::connect(pg)
                    .await
                    .context("connect postgres")?,
            )
        }
    };
    let policy: Arc<dyn PolicyEngine> = Arc::new(
        CasbinPolicyEngine::new()
            .await
            .context("initialize policy engine")?,
    );
    Ok(AppState::from_config(store, policy, config))
}
