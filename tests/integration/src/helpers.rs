//! Test helpers for integration tests
//!
//! Provides a gateway served on a real TCP listener, a WebSocket client and raw
//! socket access for malformed handshakes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use pos_common::GatewayConfig;
use pos_gateway::server::create_admin_router;
use pos_gateway::{Gateway, UpgradeHost};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Default wait for anything the server is expected to send
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Client side of an upgraded connection
pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Gateway bound to an ephemeral port; shut down on drop
pub struct TestServer {
    pub addr: SocketAddr,
    pub gateway: Gateway,
    host: Arc<UpgradeHost>,
    stop: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a new test server
    pub async fn start() -> Result<Self> {
        Self::start_with_config(test_config()).await
    }

    /// Start a test server with custom gateway config
    pub async fn start_with_config(config: GatewayConfig) -> Result<Self> {
        let host = UpgradeHost::bind("127.0.0.1:0").await?;
        let gateway = Gateway::new(&config);
        gateway.bind(Some(&host));

        let (stop, stopped) = oneshot::channel::<()>();
        let routes = create_admin_router(gateway.clone());
        tokio::spawn(host.clone().serve(routes, async move {
            let _ = stopped.await;
        }));

        Ok(Self {
            addr: host.local_addr(),
            gateway,
            host,
            stop: Some(stop),
        })
    }

    pub fn host(&self) -> &UpgradeHost {
        &self.host
    }

    /// WebSocket URL of the upgrade endpoint
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.addr, self.gateway.upgrade_path())
    }

    /// Connect a WebSocket client and wait until the gateway registered it
    pub async fn connect(&self) -> Result<WsClient> {
        let before = self.gateway.connection_count();
        let (ws, _response) = connect_async(self.ws_url()).await?;
        self.wait_for_connections(before + 1).await?;
        Ok(ws)
    }

    /// Send raw bytes and collect everything until the server closes
    pub async fn raw_request(&self, request: &str) -> Result<String> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(request.as_bytes()).await?;

        let mut response = Vec::new();
        tokio::time::timeout(RECV_TIMEOUT, stream.read_to_end(&mut response))
            .await
            .context("server did not close the socket")??;

        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    /// Wait until the registry holds exactly `expected` connections
    pub async fn wait_for_connections(&self, expected: usize) -> Result<()> {
        tokio::time::timeout(RECV_TIMEOUT, async {
            while self.gateway.connection_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .with_context(|| {
            format!(
                "expected {expected} connections, have {}",
                self.gateway.connection_count()
            )
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.gateway.shutdown();
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Gateway config for tests: ephemeral port, keepalive out of the way
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        keepalive_secs: 3600,
        ..GatewayConfig::default()
    }
}

/// Next message of any kind
pub async fn next_message(ws: &mut WsClient) -> Result<Message> {
    let message = tokio::time::timeout(RECV_TIMEOUT, ws.next())
        .await
        .context("timed out waiting for a message")?
        .context("stream ended")??;
    Ok(message)
}

/// Next `{event, payload}` envelope, skipping keepalive traffic
pub async fn next_event(ws: &mut WsClient) -> Result<Value> {
    loop {
        match next_message(ws).await? {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Ping(_) | Message::Pong(_) => {}
            other => bail!("expected an event, got {other:?}"),
        }
    }
}

/// Next close frame's status code, skipping everything else
pub async fn next_close_code(ws: &mut WsClient) -> Result<Option<u16>> {
    loop {
        if let Message::Close(frame) = next_message(ws).await? {
            return Ok(frame.map(|f| u16::from(f.code)));
        }
    }
}
