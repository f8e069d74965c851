//! Gateway server setup
//!
//! Wires the upgrade host, the gateway and the admin routes together on one
//! listener.

mod admin;
mod gateway;
pub mod handshake;
mod host;

pub use admin::create_admin_router;
pub use gateway::{Gateway, GatewayState, GatewayStats, UpgradeOutcome};
pub use handshake::HandshakeError;
pub use host::{HandlerId, HostError, UpgradeHandler, UpgradeHost, UpgradeReply};

use pos_common::{AppConfig, AppError};
use std::future::Future;
use tokio::sync::watch;

impl From<HostError> for AppError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Bind { addr, source } => AppError::bind(addr, source),
            HostError::Io(e) => AppError::Io(e),
            other @ HostError::AlreadyServing => AppError::internal(other),
        }
    }
}

/// Run the gateway until Ctrl+C or SIGTERM
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    run_with_shutdown(config, shutdown_signal()).await
}

/// Run the gateway until `shutdown` resolves
pub async fn run_with_shutdown<F>(config: AppConfig, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let gateway = Gateway::new(&config.gateway);
    let (stop_tx, stop_rx) = watch::channel(false);

    // A missing host degrades to in-process delivery only
    let host = match UpgradeHost::bind(&config.gateway.address()).await {
        Ok(host) => Some(host),
        Err(e) => {
            tracing::warn!(error = %e, "Upgrade host unavailable");
            None
        }
    };
    gateway.bind(host.as_ref());

    let host_task = host.map(|host| {
        tracing::info!(
            "Gateway listening on ws://{}{}",
            host.local_addr(),
            gateway.upgrade_path()
        );
        let routes = create_admin_router(gateway.clone());
        tokio::spawn(host.serve(routes, wait_for_stop(stop_rx.clone())))
    });

    shutdown.await;
    tracing::info!("Shutdown requested");

    gateway.shutdown();
    let _ = stop_tx.send(true);

    if let Some(task) = host_task {
        task.await.map_err(AppError::internal)??;
    }

    Ok(())
}

async fn wait_for_stop(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
