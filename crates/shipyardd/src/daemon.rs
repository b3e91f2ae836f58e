//! Subsystem assembly and lifecycle.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use shipyard_alert::{LogTransport, MailTransport, SmtpTransport, WebhookTransport};
use shipyard_cluster::{ClusterGateway, HttpCluster, MemoryCluster};
use shipyard_core::ShipyardConfig;
use shipyard_core::config::TransportKind;
use shipyard_deploy::Deployer;
use shipyard_reconcile::Reconciler;
use shipyard_session::{SessionContext, SessionRegistry, build_router};
use shipyard_state::StateStore;
use shipyard_storage::{CredentialBinder, MemorySnapshotCache, SnapshotCache};

fn mail_transport(config: &ShipyardConfig) -> anyhow::Result<Arc<dyn MailTransport>> {
    Ok(match config.mail.transport {
        TransportKind::Log => Arc::new(LogTransport),
        TransportKind::Webhook => {
            let url = config
                .mail
                .webhook_url
                .as_deref()
                .context("mail.webhook_url is required for the webhook transport")?;
            Arc::new(WebhookTransport::new(url, config.cluster.request_timeout())?)
        }
        TransportKind::Smtp => {
            let smtp = SmtpTransport::new(&config.mail, config.cluster.request_timeout())?;
            info!(relay = %smtp.endpoint(), "alert mail goes through smtp");
            Arc::new(smtp)
        }
    })
}

pub async fn run(config: ShipyardConfig, in_memory_cluster: bool) -> anyhow::Result<()> {
    info!("Shipyard daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&config.state.data_dir)
        .with_context(|| format!("creating {}", config.state.data_dir.display()))?;
    let db_path = config.database_path();
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let gateway: Arc<dyn ClusterGateway> = if in_memory_cluster {
        info!("using in-memory cluster");
        Arc::new(MemoryCluster::new())
    } else {
        let cluster = HttpCluster::new(&config.cluster.api_url, config.cluster.request_timeout())?;
        info!(api_url = %config.cluster.api_url, "cluster gateway configured");
        Arc::new(cluster)
    };

    let cache: Arc<dyn SnapshotCache> = Arc::new(MemorySnapshotCache::new());
    let registry = Arc::new(SessionRegistry::new());
    let deployer = Arc::new(Deployer::new(
        state.clone(),
        gateway.clone(),
        config.deploy.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        state.clone(),
        gateway.clone(),
        cache.clone(),
        registry.clone(),
        config.reconcile.clone(),
        &config.storage,
    ));

    let ctx = Arc::new(SessionContext {
        state: state.clone(),
        gateway: gateway.clone(),
        deployer,
        reconciler: reconciler.clone(),
        cache,
        registry,
        binder: Arc::new(CredentialBinder::new(state.clone(), &config.storage.blob_root)),
        server: config.server.clone(),
    });

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let reconcile_shutdown = shutdown_rx.clone();
    let reconcile_handle = tokio::spawn(async move {
        reconciler.run(reconcile_shutdown).await;
    });

    let alert_handle = if config.alert.enabled {
        let transport = mail_transport(&config)?;
        let alert_config = config.alert.clone();
        let mail_config = config.mail.clone();
        let alert_shutdown = shutdown_rx.clone();
        let gateway = gateway.clone();
        let state = state.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = shipyard_alert::run(
                alert_config,
                mail_config,
                gateway,
                state,
                transport,
                alert_shutdown,
            )
            .await
            {
                error!(error = %e, "alert pipeline failed");
            }
        }))
    } else {
        info!("alert pipeline disabled");
        None
    };

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ctx);
    let addr = config.server.listen;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, session_path = %config.server.session_path, "API server starting");

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = reconcile_handle.await;
    if let Some(handle) = alert_handle {
        let _ = handle.await;
    }

    info!("Shipyard daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn smtp_transport_built_from_config() {
        let config = ShipyardConfig::from_toml(
            r#"
[mail]
transport = "smtp"
from = "ops@example.com"
smtp_host = "mail.example.com"
smtp_port = 2525
"#,
        )
        .unwrap();
        assert!(mail_transport(&config).is_ok());
    }
}
