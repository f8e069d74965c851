//! Event gateway
//!
//! Owns the registry of live connections, the late-join replay cache and the
//! in-process listeners, and fans every published event out to all clients.

use super::handshake::{self, HandshakeError};
use super::host::{HandlerId, UpgradeHandler, UpgradeHost, UpgradeReply};
use crate::broadcast::{ListenerId, ListenerRegistry, ReplayCache};
use crate::connection::{Connection, ConnectionConfig, ConnectionId, ConnectionManager, SendError};
use crate::events::{
    EventKind, GatewayEvent, QueueMetricSnapshot, SystemErrorEvent, QUEUE_METRICS, SYSTEM_ERROR,
};
use crate::protocol::{frame, CloseCode, Envelope, OpCode};
use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use pos_common::GatewayConfig;
use serde::Serialize;
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite};

/// Gateway lifecycle; there is no way back from `Shutdown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayState {
    /// Not attached to a host yet; in-process listeners still work
    Init,
    /// Accepting upgrades from a host
    Bound,
    /// Detached, every connection closed
    Shutdown,
}

impl GatewayState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Bound => "BOUND",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub state: GatewayState,
    pub connections: usize,
    pub cached_queues: usize,
    pub error_history: usize,
}

/// What became of an upgrade request
#[derive(Debug)]
pub enum UpgradeOutcome {
    /// Handshake accepted; the connection starts once this 101 response is out
    Accepted(Response),
    /// Not for this gateway; the request is handed back untouched
    Ignored(Request),
    /// Refused; no connection is created
    Rejected(HandshakeError),
}

struct Lifecycle {
    state: GatewayState,
    host: Option<(Weak<UpgradeHost>, HandlerId)>,
}

struct GatewayInner {
    upgrade_path: String,
    connection_config: ConnectionConfig,
    connections: Arc<ConnectionManager>,
    listeners: ListenerRegistry,
    /// Also orders registration+replay against fan-out
    replay: Mutex<ReplayCache>,
    lifecycle: Mutex<Lifecycle>,
}

/// Realtime event gateway
///
/// Cheap to clone; every clone is the same gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                upgrade_path: config.upgrade_path.clone(),
                connection_config: ConnectionConfig::from(config),
                connections: Arc::new(ConnectionManager::new()),
                listeners: ListenerRegistry::new(),
                replay: Mutex::new(ReplayCache::new(config.error_history)),
                lifecycle: Mutex::new(Lifecycle {
                    state: GatewayState::Init,
                    host: None,
                }),
            }),
        }
    }

    /// Attach to a host's upgrade notifications
    ///
    /// Without a host the gateway stays in `Init` and only serves in-process
    /// listeners; it can be bound later.
    pub fn bind(&self, host: Option<&Arc<UpgradeHost>>) -> GatewayState {
        let mut lifecycle = self.inner.lifecycle.lock();

        match (lifecycle.state, host) {
            (GatewayState::Shutdown, _) => {
                tracing::warn!("Gateway is shut down, ignoring bind");
            }
            (GatewayState::Bound, _) => {
                tracing::debug!("Gateway already bound");
            }
            (GatewayState::Init, None) => {
                tracing::warn!("No HTTP server available, realtime delivery limited to in-process listeners");
            }
            (GatewayState::Init, Some(host)) => {
                let handler_id = host.attach(Arc::new(self.clone()));
                lifecycle.host = Some((Arc::downgrade(host), handler_id));
                lifecycle.state = GatewayState::Bound;
                tracing::info!(
                    addr = %host.local_addr(),
                    path = %self.inner.upgrade_path,
                    "Gateway accepting upgrades"
                );
            }
        }

        lifecycle.state
    }

    pub fn state(&self) -> GatewayState {
        self.inner.lifecycle.lock().state
    }

    pub fn upgrade_path(&self) -> &str {
        &self.inner.upgrade_path
    }

    /// Route an upgrade request: ignore other paths, reject bad requests,
    /// accept the rest
    ///
    /// An accepted request gets the 101 response back; once the host has sent
    /// it, the switched socket is registered through [`Self::accept_connection`].
    pub fn handle_upgrade(&self, mut request: Request) -> UpgradeOutcome {
        if request.uri().path() != self.inner.upgrade_path {
            return UpgradeOutcome::Ignored(request);
        }

        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let response = match self.handshake(request.headers()) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(peer = ?peer, error = %e, "Upgrade rejected");
                return UpgradeOutcome::Rejected(e);
            }
        };

        let on_upgrade = hyper::upgrade::on(&mut request);
        let gateway = self.clone();
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    if let Err(e) = gateway.accept_connection(TokioIo::new(upgraded), peer) {
                        tracing::debug!(peer = ?peer, error = %e, "Upgraded socket not registered");
                    }
                }
                Err(e) => tracing::warn!(peer = ?peer, error = %e, "Protocol switch failed"),
            }
        });

        UpgradeOutcome::Accepted(response)
    }

    fn handshake(&self, headers: &HeaderMap) -> Result<Response, HandshakeError> {
        if self.state() == GatewayState::Shutdown {
            return Err(HandshakeError::ShutDown);
        }

        let accept = handshake::accept_key(handshake::client_key(headers)?);
        handshake::switching_protocols(&accept)
    }

    /// Serve a socket that already switched protocols
    ///
    /// Spawns its connection, registers it and replays cached state to it.
    pub fn accept_connection<S>(
        &self,
        socket: S,
        peer: Option<SocketAddr>,
    ) -> Result<ConnectionId, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.state() == GatewayState::Shutdown {
            return Err(HandshakeError::ShutDown);
        }

        let id = self.inner.connections.next_id();
        let registry = Arc::downgrade(&self.inner.connections);
        let connection = Connection::spawn(
            id,
            peer,
            socket,
            &self.inner.connection_config,
            move |id| {
                if let Some(registry) = registry.upgrade() {
                    registry.remove_connection(id);
                }
            },
        );

        self.register(&connection)?;
        Ok(id)
    }

    /// Add a fresh connection and replay cached state to it, before any live
    /// broadcast can reach it
    fn register(&self, connection: &Arc<Connection>) -> Result<(), HandshakeError> {
        let replay = self.inner.replay.lock();

        if !self
            .inner
            .connections
            .add_connection(connection.clone(), replay.version())
        {
            return Err(HandshakeError::Closed);
        }

        // Shutdown may have drained the registry just before the insert
        if self.state() == GatewayState::Shutdown {
            self.inner.connections.remove_connection(connection.id());
            connection.close(CloseCode::GoingAway);
            return Err(HandshakeError::ShutDown);
        }

        match replay_to(connection, &replay) {
            Ok(0) => {}
            Ok(sent) => tracing::debug!(connection_id = %connection.id(), sent, "Replayed cached state"),
            Err(e) => tracing::debug!(connection_id = %connection.id(), error = %e, "Replay interrupted"),
        }

        Ok(())
    }

    /// Subscribe an in-process listener
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.on(kind, listener)
    }

    /// Unsubscribe; returns `false` if the id is unknown
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.off(id)
    }

    /// Deliver an event to in-process listeners, then to every connection
    ///
    /// Returns how many connections accepted the frame. A failing connection
    /// tears itself down without affecting the rest.
    pub fn broadcast(&self, event: &GatewayEvent) -> usize {
        self.publish(event, None)
    }

    /// `cache_version` is set when the event is a replay-cache update;
    /// connections whose replay already carried it are skipped
    fn publish(&self, event: &GatewayEvent, cache_version: Option<u64>) -> usize {
        self.inner.listeners.dispatch(event);

        let frame = match encode_event(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(event = %event.name(), error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let _replay = self.inner.replay.lock();
        let sent = self.inner.connections.broadcast_frame(&frame, cache_version);
        tracing::trace!(event = %event.name(), sent, "Event broadcast");
        sent
    }

    /// Broadcast a wire-named event
    pub fn broadcast_named(&self, name: impl Into<String>, payload: Value) -> usize {
        self.broadcast(&GatewayEvent::from_wire(name, payload))
    }

    /// Cache the latest metrics of a queue, then broadcast them
    pub fn broadcast_queue_metrics(&self, queue: impl Into<String>, metrics: Value) -> usize {
        let snapshot = QueueMetricSnapshot::now(queue, metrics);
        let version = self.inner.replay.lock().record_metrics(snapshot.clone());
        self.publish(&GatewayEvent::QueueMetrics(snapshot), Some(version))
    }

    /// Record a system error in the history, then broadcast it
    pub fn broadcast_system_error(
        &self,
        source: impl Into<String>,
        message: impl fmt::Display,
        details: Option<Value>,
    ) -> usize {
        self.publish_system_error(SystemErrorEvent::new(source, message, details))
    }

    /// Like [`Self::broadcast_system_error`], flattening the error's source chain
    pub fn broadcast_system_error_from(
        &self,
        source: impl Into<String>,
        error: &(dyn StdError + 'static),
        details: Option<Value>,
    ) -> usize {
        self.publish_system_error(SystemErrorEvent::from_error(source, error, details))
    }

    fn publish_system_error(&self, event: SystemErrorEvent) -> usize {
        tracing::warn!(source = %event.source, message = %event.message, "System error reported");
        let version = self.inner.replay.lock().record_error(event.clone());
        self.publish(&GatewayEvent::SystemError(event), Some(version))
    }

    /// Close every connection with 1001, clear the registry and detach from
    /// the host. Idempotent.
    pub fn shutdown(&self) {
        let host = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state == GatewayState::Shutdown {
                return;
            }
            lifecycle.state = GatewayState::Shutdown;
            lifecycle.host.take()
        };

        if let Some((host, handler_id)) = host {
            if let Some(host) = host.upgrade() {
                host.detach(handler_id);
            }
        }

        let connections = self.inner.connections.drain();
        let closed = connections.len();
        for connection in connections {
            connection.close(CloseCode::GoingAway);
        }

        tracing::info!(closed, "Gateway shut down");
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.connection_count()
    }

    /// Cached snapshots, in the order their queues were first reported
    pub fn queue_metrics(&self) -> Vec<QueueMetricSnapshot> {
        self.inner.replay.lock().metrics.iter().cloned().collect()
    }

    /// Buffered system errors, newest first
    pub fn error_history(&self) -> Vec<SystemErrorEvent> {
        self.inner.replay.lock().errors.newest_first().cloned().collect()
    }

    pub fn stats(&self) -> GatewayStats {
        let (cached_queues, error_history) = {
            let replay = self.inner.replay.lock();
            (replay.metrics.len(), replay.errors.len())
        };

        GatewayStats {
            state: self.state(),
            connections: self.connection_count(),
            cached_queues,
            error_history,
        }
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("state", &self.state())
            .field("upgrade_path", &self.inner.upgrade_path)
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[async_trait]
impl UpgradeHandler for Gateway {
    async fn on_upgrade(&self, request: Request) -> UpgradeReply {
        match self.handle_upgrade(request) {
            UpgradeOutcome::Accepted(response) => UpgradeReply::Handled(response),
            UpgradeOutcome::Rejected(e) => UpgradeReply::Handled(e.into_response()),
            UpgradeOutcome::Ignored(request) => UpgradeReply::Declined(request),
        }
    }
}

fn encode_event(event: &GatewayEvent) -> Result<Bytes, serde_json::Error> {
    let json = event.to_envelope()?.to_json()?;
    Ok(frame::encode(OpCode::Text, json.as_bytes()))
}

/// Send cached metrics, then buffered errors oldest first
fn replay_to(connection: &Connection, replay: &ReplayCache) -> Result<usize, SendError> {
    let mut sent = 0;

    for snapshot in replay.metrics.iter() {
        connection.send_envelope(&Envelope::new(QUEUE_METRICS, serde_json::to_value(snapshot)?))?;
        sent += 1;
    }

    for event in replay.errors.oldest_first() {
        connection.send_envelope(&Envelope::new(SYSTEM_ERROR, serde_json::to_value(event)?))?;
        sent += 1;
    }

    Ok(sent)
}
