//! Periodic liveness poll.
//!
//! Polls the backend's heartbeat endpoint at a fixed interval and emits
//! [`ClientEvent::Heartbeat`] on every tick, including failures. The poll
//! is intentionally decoupled from the WebSocket: it keeps running while
//! the socket reconnects, and it is the only signal that distinguishes
//! "web backend up, bot process down" from a full outage.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::client::ApiClient;
use crate::events::{ClientEvent, EventBus};

/// Cancel handle for a running heartbeat poll.
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the poll. No further ticks are emitted after this returns.
    pub fn cancel(self) {
        self.task.abort();
    }
}

/// Start polling. The first probe fires immediately, then every `interval`.
pub fn start(client: Arc<ApiClient>, bus: EventBus, interval: Duration) -> HeartbeatHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let (web_ok, bot_ok) = match client.heartbeat().await {
                Ok(status) => (status.web_ok, status.bot_ok),
                Err(e) => {
                    warn!("heartbeat: backend unreachable: {e}");
                    (false, false)
                }
            };
            bus.emit(ClientEvent::Heartbeat { web_ok, bot_ok });
        }
    });
    HeartbeatHandle { task }
}
