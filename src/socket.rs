//! WebSocket connection to the playback backend.
//!
//! [`BotConnection`] owns the socket lifecycle: it opens exactly one
//! connection to the backend's `/ws` endpoint, runs the I/O loop, and
//! reconnects with exponential backoff when the connection drops. The
//! connection state is published through a `watch` channel that other
//! components read but never mutate.
//!
//! After every successful connect, initial or re-connect, the read-only
//! resync requests are issued before anything else, so the mirror and
//! catalogs converge with the server without consumers racing the socket
//! open. Consumers observe [`ClientEvent::Connected`] and re-run their auth
//! check.
//!
//! Inbound frames are parsed as JSON and routed strictly in delivery
//! order; a parse failure discards the frame with a warning and touches
//! nothing.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::events::{ClientEvent, EventBus};
use crate::gateway::READ_ONLY_COMMANDS;
use crate::router::Router;
use crate::state::StateStore;

/// Lifecycle of the single socket. Owned by [`BotConnection`]; everyone
/// else only reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Outbound envelopes buffered between the gateway and the I/O loop.
const OUTBOUND_BUFFER: usize = 256;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Persistent WebSocket connection with reconnect and resync.
pub struct BotConnection {
    outbound: mpsc::Sender<Value>,
    state_rx: watch::Receiver<ConnectionState>,
    io_task: tokio::task::JoinHandle<()>,
}

impl BotConnection {
    /// Connect to the backend's WebSocket endpoint and spawn the I/O loop.
    ///
    /// Inbound frames are routed into `store` and `bus`. Fails only if the
    /// initial connection cannot be established; from then on the loop
    /// reconnects on its own.
    pub async fn connect(
        base_url: &str,
        store: Arc<StateStore>,
        bus: EventBus,
    ) -> Result<Self, String> {
        let ws_url = build_ws_url(base_url)?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (out_tx, out_rx) = mpsc::channel::<Value>(OUTBOUND_BUFFER);

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| format!("WebSocket connect failed: {e}"))?;

        let router = Router::new(store, bus.clone());
        let io_task = tokio::spawn(ws_io_loop(ws_stream, out_rx, router, state_tx, bus, ws_url));

        Ok(Self {
            outbound: out_tx,
            state_rx,
            io_task,
        })
    }

    /// Writer handle for the command gateway.
    pub fn sender(&self) -> mpsc::Sender<Value> {
        self.outbound.clone()
    }

    /// Read-only view of the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Tear down the I/O loop. Closing is lifecycle-driven — this is only
    /// called when the process is going away.
    pub fn shutdown(&self) {
        self.io_task.abort();
    }
}

/// Main I/O loop: routes inbound frames, writes outbound envelopes, and
/// recovers the connection on failure.
async fn ws_io_loop(
    ws_stream: WsStream,
    mut out_rx: mpsc::Receiver<Value>,
    router: Router,
    state_tx: watch::Sender<ConnectionState>,
    bus: EventBus,
    ws_url: String,
) {
    let (mut ws_sink, mut ws_reader) = ws_stream.split();

    let _ = state_tx.send(ConnectionState::Open);
    info!("connected to {ws_url}");
    bus.emit(ClientEvent::Connected);
    send_resync(&mut ws_sink).await;

    loop {
        tokio::select! {
            msg = ws_reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(envelope) => router.route(&envelope),
                            Err(e) => warn!("invalid JSON frame discarded: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("WebSocket closed, reconnecting");
                        (ws_sink, ws_reader) = recover(&ws_url, &state_tx, &bus).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {e}, reconnecting");
                        (ws_sink, ws_reader) = recover(&ws_url, &state_tx, &bus).await;
                    }
                    _ => {} // Binary/Ping/Pong — ignore
                }
            }
            msg = out_rx.recv() => {
                match msg {
                    Some(envelope) => {
                        if ws_sink.send(Message::Text(envelope.to_string())).await.is_err() {
                            warn!("WebSocket send failed, command lost");
                        }
                    }
                    None => {
                        // All senders dropped — shutting down.
                        let _ = state_tx.send(ConnectionState::Closed);
                        return;
                    }
                }
            }
        }
    }
}

/// Mark the connection lost, reconnect with backoff, then resync.
async fn recover(
    ws_url: &str,
    state_tx: &watch::Sender<ConnectionState>,
    bus: &EventBus,
) -> (WsSink, WsReader) {
    let _ = state_tx.send(ConnectionState::Closed);
    bus.emit(ClientEvent::Disconnected);

    let (mut ws_sink, ws_reader) = reconnect_loop(ws_url, state_tx).await;

    let _ = state_tx.send(ConnectionState::Open);
    info!("WebSocket reconnected");
    bus.emit(ClientEvent::Connected);
    send_resync(&mut ws_sink).await;

    (ws_sink, ws_reader)
}

/// Reconnect with exponential backoff, 1s doubling to a 30s cap. Loops
/// until a connection is established.
async fn reconnect_loop(
    ws_url: &str,
    state_tx: &watch::Sender<ConnectionState>,
) -> (WsSink, WsReader) {
    let mut delay = 1u64;
    let max_delay = 30u64;

    loop {
        tokio::time::sleep(Duration::from_secs(delay)).await;
        let _ = state_tx.send(ConnectionState::Connecting);

        match tokio_tungstenite::connect_async(ws_url).await {
            Ok((ws_stream, _)) => return ws_stream.split(),
            Err(e) => {
                warn!("reconnect failed: {e}, retrying in {delay}s");
                let _ = state_tx.send(ConnectionState::Closed);
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}

/// Issue the read-only data requests after every (re)connect. These are
/// the same commands an unauthorized session may send, so admission checks
/// don't apply here.
async fn send_resync(ws_sink: &mut WsSink) {
    for command in READ_ONLY_COMMANDS {
        let envelope = json!({ "command": command });
        if ws_sink.send(Message::Text(envelope.to_string())).await.is_err() {
            warn!("resync request failed: {command}");
            return;
        }
    }
}

/// Build the WebSocket URL from the HTTP base URL.
fn build_ws_url(base_url: &str) -> Result<String, String> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if base.starts_with("https://") {
        base.replacen("https://", "wss://", 1)
    } else if base.starts_with("http://") {
        base.replacen("http://", "ws://", 1)
    } else {
        return Err(format!("Invalid URL scheme: {base}"));
    };
    Ok(format!("{ws_base}/ws"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_derived_from_http_base() {
        assert_eq!(
            build_ws_url("https://bot.example.com").unwrap(),
            "wss://bot.example.com/ws"
        );
        assert_eq!(
            build_ws_url("http://localhost:8080/").unwrap(),
            "ws://localhost:8080/ws"
        );
        assert!(build_ws_url("ftp://bot.example.com").is_err());
    }

    #[tokio::test]
    async fn initial_connect_failure_is_an_error() {
        let bus = EventBus::new();
        let store = Arc::new(StateStore::new(bus.clone()));
        let result = BotConnection::connect("http://127.0.0.1:1", store, bus).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_resyncs_routes_and_writes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{addr}");

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            // The client issues its resync requests immediately on open.
            let mut resync = Vec::new();
            for _ in 0..READ_ONLY_COMMANDS.len() {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let envelope: Value = serde_json::from_str(&text).unwrap();
                        resync.push(envelope["command"].as_str().unwrap().to_string());
                    }
                    other => panic!("expected resync request, got {other:?}"),
                }
            }

            // A garbage frame must be discarded without killing the client.
            ws.send(Message::Text("not json{{{".to_string())).await.unwrap();
            ws.send(Message::Text(
                json!({ "type": "state_update", "payload": { "music": { "volume": 42 } } })
                    .to_string(),
            ))
            .await
            .unwrap();

            // Echo back the next envelope the client writes.
            let forwarded = match ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                other => panic!("expected client command, got {other:?}"),
            };
            (resync, forwarded)
        });

        let bus = EventBus::new();
        let store = Arc::new(StateStore::new(bus.clone()));
        let mut events = bus.subscribe();
        let conn = BotConnection::connect(&base_url, Arc::clone(&store), bus)
            .await
            .unwrap();

        // Wait until the pushed state update has been merged.
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("event within timeout")
                .unwrap();
            if matches!(event, ClientEvent::StateChanged(_)) {
                break;
            }
        }
        assert_eq!(store.snapshot().music.volume, 42);
        assert_eq!(*conn.state().borrow(), ConnectionState::Open);

        conn.sender()
            .send(json!({ "command": "NEXT_SONG" }))
            .await
            .unwrap();

        let (resync, forwarded) = server.await.unwrap();
        assert_eq!(resync, READ_ONLY_COMMANDS);
        assert_eq!(
            serde_json::from_str::<Value>(&forwarded).unwrap(),
            json!({ "command": "NEXT_SONG" })
        );

        conn.shutdown();
    }
}
