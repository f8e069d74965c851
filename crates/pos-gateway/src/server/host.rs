//! Upgrade host
//!
//! The one HTTP listener of the process. Plain routes are served by an axum
//! router; requests asking for the websocket protocol fall through to the
//! attached upgrade handlers, offered in attach order.

use super::handshake;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Listener errors
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Host is already serving")]
    AlreadyServing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Answer of a handler offered an upgrade
#[derive(Debug)]
pub enum UpgradeReply {
    /// Taken; this response goes back to the client
    Handled(Response),
    /// Not for this handler; the request is handed back untouched
    Declined(Request),
}

/// Receiver of upgrade notifications
#[async_trait]
pub trait UpgradeHandler: Send + Sync {
    async fn on_upgrade(&self, request: Request) -> UpgradeReply;
}

/// Handle returned by [`UpgradeHost::attach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// HTTP host raising upgrade notifications
pub struct UpgradeHost {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    handlers: RwLock<Vec<(HandlerId, Arc<dyn UpgradeHandler>)>>,
    next_id: AtomicU64,
}

impl UpgradeHost {
    /// Bind the listener
    pub async fn bind(addr: &str) -> Result<Arc<Self>, HostError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| HostError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(addr = %local_addr, "Upgrade host listening");

        Ok(Arc::new(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }))
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Attach an upgrade handler; handlers are offered upgrades in attach order
    pub fn attach(&self, handler: Arc<dyn UpgradeHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    /// Detach a handler; returns `false` if it was not attached
    pub fn detach(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// `routes` plus the upgrade fallback, traced
    pub fn router(self: &Arc<Self>, routes: Router) -> Router {
        let host = Arc::clone(self);
        routes
            .fallback(move |request: Request| async move { host.dispatch(request).await })
            .layer(TraceLayer::new_for_http())
    }

    /// Serve `routes` and upgrades until `shutdown` resolves
    ///
    /// A host serves once; a second call fails with [`HostError::AlreadyServing`].
    pub async fn serve<F>(self: Arc<Self>, routes: Router, shutdown: F) -> Result<(), HostError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.listener.lock().take().ok_or(HostError::AlreadyServing)?;
        let app = self.router(routes);

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!(addr = %self.local_addr, "Upgrade host stopped");
        Ok(())
    }

    async fn dispatch(&self, request: Request) -> Response {
        if !handshake::is_websocket_upgrade(request.headers()) {
            return StatusCode::NOT_FOUND.into_response();
        }

        // Snapshot so handlers can detach while an upgrade is in flight
        let handlers: Vec<Arc<dyn UpgradeHandler>> =
            self.handlers.read().iter().map(|(_, h)| h.clone()).collect();

        let mut request = request;
        for handler in handlers {
            match handler.on_upgrade(request).await {
                UpgradeReply::Handled(response) => return response,
                UpgradeReply::Declined(unhandled) => request = unhandled,
            }
        }

        tracing::debug!(target = %request.uri(), "No handler for upgrade");
        (StatusCode::NOT_FOUND, [(header::CONNECTION, "close")]).into_response()
    }
}

impl std::fmt::Debug for UpgradeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeHost")
            .field("local_addr", &self.local_addr)
            .field("handlers", &self.handler_count())
            .finish()
    }
}
