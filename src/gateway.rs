//! The single outbound command path.
//!
//! Every command leaves the process through [`CommandGateway::send`], which
//! applies the admission rule before any I/O happens: an unauthorized
//! session may only issue the read-only commands in
//! [`READ_ONLY_COMMANDS`]. Rejections surface on the event bus as
//! [`ClientEvent::CommandRejected`] (the user-visible notification path),
//! never as an error return.
//!
//! Sending is fire-and-forget. There is no acknowledgement tracking and no
//! retry queue; the protocol carries no correlation IDs, so responses can
//! only be matched back by command name. A command issued while the socket
//! is not open is dropped and logged; callers must not assume delivery.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::client::Session;
use crate::events::{ClientEvent, EventBus};
use crate::socket::ConnectionState;

/// Commands permitted without authorization. These only read state.
pub const READ_ONLY_COMMANDS: [&str; 4] = [
    "GET_PLAYLISTS",
    "GET_AMBIENCE",
    "GET_PLAYBACK_STATE",
    "GET_BOT_STATUS",
];

/// Which playback channel a pause/resume targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackTarget {
    Music,
    Ambience,
}

impl PlaybackTarget {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Music => "music",
            Self::Ambience => "ambience",
        }
    }
}

/// Admission-checked writer for outbound command envelopes.
pub struct CommandGateway {
    session: Arc<Session>,
    conn_state: watch::Receiver<ConnectionState>,
    outbound: mpsc::Sender<Value>,
    bus: EventBus,
}

impl CommandGateway {
    #[must_use]
    pub fn new(
        session: Arc<Session>,
        conn_state: watch::Receiver<ConnectionState>,
        outbound: mpsc::Sender<Value>,
        bus: EventBus,
    ) -> Self {
        Self {
            session,
            conn_state,
            outbound,
            bus,
        }
    }

    /// Send `{"command": <name>, ...payload}` to the bot.
    ///
    /// `payload` must be a JSON object; its fields are spliced into the
    /// envelope beside the command tag. Rejected or dropped commands
    /// produce zero socket writes.
    pub async fn send(&self, command: &str, payload: Value) {
        if !self.session.is_authorized() && !READ_ONLY_COMMANDS.contains(&command) {
            warn!("unauthorized command rejected: {command}");
            self.bus.emit(ClientEvent::CommandRejected {
                command: command.to_string(),
            });
            return;
        }

        if *self.conn_state.borrow() != ConnectionState::Open {
            warn!("socket not open, command dropped: {command}");
            return;
        }

        let mut envelope = payload.as_object().cloned().unwrap_or_default();
        envelope.insert("command".to_string(), json!(command));

        if self.outbound.send(Value::Object(envelope)).await.is_err() {
            warn!("socket writer gone, command dropped: {command}");
        }
    }

    // --- Read-only requests ---

    pub async fn get_playlists(&self) {
        self.send("GET_PLAYLISTS", json!({})).await;
    }

    pub async fn get_ambience(&self) {
        self.send("GET_AMBIENCE", json!({})).await;
    }

    pub async fn get_playback_state(&self) {
        self.send("GET_PLAYBACK_STATE", json!({})).await;
    }

    pub async fn get_bot_status(&self) {
        self.send("GET_BOT_STATUS", json!({})).await;
    }

    // --- Playback control ---

    pub async fn play_playlist(&self, name: &str) {
        self.send("PLAY_PLAYLIST", json!({ "name": name })).await;
    }

    pub async fn play_ambience(&self, url: &str, title: &str) {
        self.send("PLAY_AMBIENCE", json!({ "url": url, "title": title }))
            .await;
    }

    pub async fn pause(&self, target: PlaybackTarget) {
        self.send("PAUSE", json!({ "type": target.as_str() })).await;
    }

    pub async fn resume(&self, target: PlaybackTarget) {
        self.send("RESUME", json!({ "type": target.as_str() })).await;
    }

    pub async fn next_song(&self) {
        self.send("NEXT_SONG", json!({})).await;
    }

    pub async fn previous_song(&self) {
        self.send("PREVIOUS_SONG", json!({})).await;
    }

    pub async fn set_shuffle(&self, enabled: bool) {
        self.send("SET_SHUFFLE", json!({ "enabled": enabled })).await;
    }

    pub async fn set_loop(&self, enabled: bool) {
        self.send("SET_LOOP", json!({ "enabled": enabled })).await;
    }

    pub async fn set_volume_music(&self, volume: u8) {
        self.send("SET_VOLUME_MUSIC", json!({ "volume": volume }))
            .await;
    }

    pub async fn set_volume_ambience(&self, volume: u8) {
        self.send("SET_VOLUME_AMBIENCE", json!({ "volume": volume }))
            .await;
    }

    // --- Catalog editing ---

    pub async fn save_playlist(&self, name: &str, data: Value) {
        self.send("SAVE_PLAYLIST", json!({ "name": name, "data": data }))
            .await;
    }

    pub async fn save_ambience(&self, data: Value) {
        self.send("SAVE_AMBIENCE", json!({ "data": data })).await;
    }

    // --- Voice channel ---

    pub async fn join_vc(&self) {
        self.send("JOINVC", json!({})).await;
    }

    pub async fn leave_vc(&self) {
        self.send("LEAVEVC", json!({})).await;
    }

    // --- Bot lifecycle & setup ---

    pub async fn start_bot(&self) {
        self.send("START_BOT", json!({})).await;
    }

    pub async fn stop_bot(&self) {
        self.send("STOP_BOT", json!({})).await;
    }

    pub async fn reboot_bot(&self) {
        self.send("REBOOT_BOT", json!({})).await;
    }

    pub async fn setup_save(&self, text_channel_id: &str, voice_channel_id: &str) {
        self.send(
            "SETUP_SAVE",
            json!({
                "text_channel_id": text_channel_id,
                "voice_channel_id": voice_channel_id,
            }),
        )
        .await;
    }

    pub async fn update_queue_message(&self) {
        self.send("UPDATE_QUEUE_MESSAGE", json!({})).await;
    }

    pub async fn update_ui_link(&self) {
        self.send("UPDATE_UI_LINK", json!({})).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    struct Fixture {
        gateway: CommandGateway,
        wire: mpsc::Receiver<Value>,
        events: tokio::sync::broadcast::Receiver<ClientEvent>,
        session: Arc<Session>,
        conn_tx: watch::Sender<ConnectionState>,
    }

    fn fixture(state: ConnectionState) -> Fixture {
        let session = Arc::new(Session::new());
        let (conn_tx, conn_rx) = watch::channel(state);
        let (out_tx, wire) = mpsc::channel(8);
        let bus = EventBus::new();
        let events = bus.subscribe();
        let gateway = CommandGateway::new(Arc::clone(&session), conn_rx, out_tx, bus);
        Fixture {
            gateway,
            wire,
            events,
            session,
            conn_tx,
        }
    }

    #[tokio::test]
    async fn unauthorized_mutating_command_writes_nothing() {
        let mut f = fixture(ConnectionState::Open);

        f.gateway.set_loop(true).await;

        assert!(f.wire.try_recv().is_err());
        assert_eq!(
            f.events.try_recv().unwrap(),
            ClientEvent::CommandRejected {
                command: "SET_LOOP".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unauthorized_read_only_command_writes_exactly_once() {
        let mut f = fixture(ConnectionState::Open);

        f.gateway.get_bot_status().await;

        let envelope = f.wire.try_recv().unwrap();
        assert_eq!(envelope, serde_json::json!({ "command": "GET_BOT_STATUS" }));
        assert!(f.wire.try_recv().is_err());
        assert!(matches!(f.events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn authorized_command_carries_payload_fields() {
        let mut f = fixture(ConnectionState::Open);
        f.session.set_authorized(true);

        f.gateway.play_playlist("Tavern").await;

        let envelope = f.wire.try_recv().unwrap();
        assert_eq!(
            envelope,
            serde_json::json!({ "command": "PLAY_PLAYLIST", "name": "Tavern" })
        );
    }

    #[tokio::test]
    async fn closed_connection_drops_admitted_command() {
        let mut f = fixture(ConnectionState::Closed);
        f.session.set_authorized(true);

        f.gateway.join_vc().await;

        assert!(f.wire.try_recv().is_err());
        // Dropped, not rejected: no notification fires.
        assert!(matches!(f.events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn send_follows_connection_state_transitions() {
        let mut f = fixture(ConnectionState::Connecting);
        f.session.set_authorized(true);

        f.gateway.next_song().await;
        assert!(f.wire.try_recv().is_err());

        f.conn_tx.send(ConnectionState::Open).unwrap();
        f.gateway.next_song().await;
        assert!(f.wire.try_recv().is_ok());
    }

    #[tokio::test]
    async fn pause_targets_are_typed() {
        let mut f = fixture(ConnectionState::Open);
        f.session.set_authorized(true);

        f.gateway.pause(PlaybackTarget::Ambience).await;

        let envelope = f.wire.try_recv().unwrap();
        assert_eq!(
            envelope,
            serde_json::json!({ "command": "PAUSE", "type": "ambience" })
        );
    }
}
