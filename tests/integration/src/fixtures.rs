//! Test fixtures and data generators
//!
//! Provides reusable payloads and raw handshake requests.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Client key from the handshake example in RFC 6455
pub const CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Accept value the server must derive from [`CLIENT_KEY`]
pub const EXPECTED_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

/// Counter for unique test data
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Get a unique suffix for test data
pub fn unique_suffix() -> u64 {
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// A queue name no other test uses
pub fn unique_queue() -> String {
    format!("queue-{}", unique_suffix())
}

/// Metrics as reported by a background queue
pub fn queue_metrics(waiting: u64, failed: u64) -> Value {
    json!({
        "waiting": waiting,
        "active": 1,
        "completed": 120,
        "failed": failed,
    })
}

/// Business event payload
pub fn order_created(order_id: u64) -> Value {
    json!({
        "orderId": order_id,
        "storeId": "store-7",
        "total": "42.50",
    })
}

/// Raw upgrade request; `keys` become one `Sec-WebSocket-Key` header each
pub fn raw_upgrade_request(target: &str, keys: &[&str]) -> String {
    let mut request = format!(
        "GET {target} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Version: 13\r\n"
    );
    for key in keys {
        request.push_str(&format!("Sec-WebSocket-Key: {key}\r\n"));
    }
    request.push_str("\r\n");
    request
}
