//! Inbound message dispatch.
//!
//! Every successfully parsed frame goes through [`Router::route`]. Dispatch
//! is two-level: first on the envelope `type` (defaulting to `"response"`
//! when absent), then, within responses, on the `command` tag. The same
//! transport thereby carries both request/response traffic and
//! server-initiated pushes.
//!
//! Dispatch is total: every frame lands in exactly one arm and produces at
//! least one event, so nothing is ever dropped silently. Frames are routed
//! strictly in delivery order — a merge and its notification complete
//! before the caller reads the next frame.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::events::{ClientEvent, EventBus};
use crate::state::{BotStatus, StatePatch, StateStore};

/// Classifies inbound envelopes and hands them to the state store or the
/// event bus.
pub struct Router {
    store: Arc<StateStore>,
    bus: EventBus,
}

impl Router {
    #[must_use]
    pub fn new(store: Arc<StateStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Route one parsed envelope.
    pub fn route(&self, envelope: &Value) {
        let msg_type = envelope["type"].as_str().unwrap_or("response");
        match msg_type {
            "response" => self.route_response(envelope),
            "state_update" => self.route_state_update(envelope),
            "bot_ready" => self.bus.emit(ClientEvent::BotReady(envelope.clone())),
            "broadcast" => {
                debug!("broadcast: {envelope}");
                self.bus.emit(ClientEvent::Broadcast(envelope.clone()));
            }
            other => {
                warn!("unknown message type: {other}");
                self.bus.emit(ClientEvent::UnhandledMessage(envelope.clone()));
            }
        }
    }

    fn route_response(&self, envelope: &Value) {
        let command = envelope["command"].as_str().unwrap_or("").to_string();

        if !envelope["ok"].as_bool().unwrap_or(false) {
            let error = envelope["error"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            warn!("command '{command}' failed: {error}");
            self.bus.emit(ClientEvent::CommandFailed { command, error });
            return;
        }

        let data = &envelope["data"];
        match command.as_str() {
            "BOT_STATUS" => {
                match data["online"].as_str().and_then(BotStatus::parse) {
                    Some(status) => {
                        self.store.set_bot_status(status);
                        self.bus.emit(ClientEvent::BotStatus(status));
                    }
                    // Missing or unrecognized liveness value: the hook still
                    // fires with the current mirror, the mirror is untouched.
                    None => self
                        .bus
                        .emit(ClientEvent::BotStatus(self.store.snapshot().bot_online)),
                }
            }
            "PLAYLISTS_DATA" => self
                .bus
                .emit(ClientEvent::Playlists(data["playlists"].clone())),
            "AMBIENCE_DATA" => self
                .bus
                .emit(ClientEvent::Ambience(data["ambience"].clone())),
            "PLAYLIST_SAVE" => self
                .bus
                .emit(ClientEvent::PlaylistSaved(data["playlist"].clone())),
            "AMBIENCE_SAVE" => self
                .bus
                .emit(ClientEvent::AmbienceSaved(data["ambience"].clone())),
            "JOINEDVC" => self.bus.emit(ClientEvent::VoiceJoined),
            "LEFTVC" => {
                self.store.reset();
                self.bus.emit(ClientEvent::VoiceLeft);
            }
            _ => {
                debug!("unhandled response: {envelope}");
                self.bus.emit(ClientEvent::UnhandledCommand(envelope.clone()));
            }
        }
    }

    fn route_state_update(&self, envelope: &Value) {
        let payload = if envelope["payload"].is_null() {
            &envelope["state"]
        } else {
            &envelope["payload"]
        };
        match StatePatch::from_wire(payload) {
            Some(patch) => self.store.merge(&patch),
            None => {
                warn!("state_update with unusable payload: {envelope}");
                self.bus.emit(ClientEvent::UnhandledMessage(envelope.clone()));
            }
        }
    }
}
