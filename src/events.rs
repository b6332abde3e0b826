//! Typed client events.
//!
//! Every observable outcome of the core (state changes, command results,
//! lifecycle transitions, heartbeat ticks) is published as a
//! [`ClientEvent`] on a broadcast bus. Consumers subscribe for a receiver;
//! dropping it unsubscribes. Emitting never blocks and never fails: with no
//! subscribers the event is simply discarded.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::state::{BotStatus, PlaybackState};

/// Buffered events per subscriber before the oldest are dropped.
const BUS_CAPACITY: usize = 256;

/// An observable outcome of the client core.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The WebSocket reported open (initial connect or reconnect). The core
    /// has already re-issued its read-only resync requests; consumers should
    /// re-run the auth check.
    Connected,
    /// The WebSocket closed or errored; a reconnect loop is running.
    Disconnected,
    /// The mirror changed; carries an owned snapshot.
    StateChanged(PlaybackState),
    /// The server answered a `GET_BOT_STATUS` request.
    BotStatus(BotStatus),
    /// Playlist catalog data arrived.
    Playlists(Value),
    /// Ambience catalog data arrived.
    Ambience(Value),
    /// A playlist save was acknowledged.
    PlaylistSaved(Value),
    /// An ambience save was acknowledged.
    AmbienceSaved(Value),
    /// The bot joined the voice channel.
    VoiceJoined,
    /// The bot left the voice channel; the mirror has been reset.
    VoiceLeft,
    /// The bot process finished booting; carries the full envelope.
    BotReady(Value),
    /// A server-initiated broadcast; carries the full envelope.
    Broadcast(Value),
    /// The server rejected a command (`ok: false`).
    CommandFailed { command: String, error: String },
    /// The gateway refused to send an unauthorized mutating command.
    CommandRejected { command: String },
    /// A well-formed response with a command tag nothing handles.
    UnhandledCommand(Value),
    /// A message of unknown type, or an unusable state payload.
    UnhandledMessage(Value),
    /// One liveness poll tick. Both flags are `false` on network failure.
    Heartbeat { web_ok: bool, bot_ok: bool },
}

/// Broadcast bus carrying [`ClientEvent`] values to any number of
/// subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Register a new subscriber. Each receiver sees every event emitted
    /// after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
