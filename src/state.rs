//! Playback state mirror and merge semantics.
//!
//! [`PlaybackState`] is the canonical local mirror of the bot's playback
//! state. It is always fully populated — a merge may update a subset of
//! fields but never clears an un-mentioned one. The backend legitimately
//! sends sparse updates (e.g. a volume-only change), so an absent or null
//! field means "no opinion, keep the current value".
//!
//! The wire payload arrives in several shapes (plain object, JSON-encoded
//! string, array-wrapped). [`StatePatch::from_wire`] normalizes all of them
//! into one typed patch ahead of the merge; anything unrecognizable is
//! rejected before it can touch the mirror.
//!
//! [`StateStore`] is the only sanctioned mutator. Every successful merge or
//! reset emits [`ClientEvent::StateChanged`] with an owned snapshot.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{ClientEvent, EventBus};

/// Liveness of the bot process behind the web backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Offline,
    Booting,
    Online,
}

impl BotStatus {
    /// Parse a wire value. Unrecognized strings yield `None` so a bad
    /// payload can be ignored instead of corrupting the mirror.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "offline" => Some(Self::Offline),
            "booting" => Some(Self::Booting),
            "online" => Some(Self::Online),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Booting => "booting",
            Self::Online => "online",
        }
    }
}

impl Default for BotStatus {
    fn default() -> Self {
        Self::Offline
    }
}

/// Music playback slice of the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicState {
    pub playlist_name: String,
    pub track_name: String,
    pub playing: bool,
    pub volume: u8,
    pub shuffle: bool,
    #[serde(rename = "loop")]
    pub loop_enabled: bool,
}

impl Default for MusicState {
    fn default() -> Self {
        Self {
            playlist_name: "None".to_string(),
            track_name: "None".to_string(),
            playing: false,
            volume: 100,
            shuffle: false,
            loop_enabled: false,
        }
    }
}

/// Ambience playback slice of the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbienceState {
    pub name: String,
    pub playing: bool,
    pub volume: u8,
}

impl Default for AmbienceState {
    fn default() -> Self {
        Self {
            name: "None".to_string(),
            playing: false,
            volume: 25,
        }
    }
}

/// The canonical mirror of remote playback state. Created once with
/// defaults, mutated only through [`StateStore::merge`], reset when the
/// session leaves the voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaybackState {
    pub music: MusicState,
    pub ambience: AmbienceState,
    pub in_vc: bool,
    pub bot_online: BotStatus,
}

/// Sparse update for the music slice. `None` means keep the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MusicPatch {
    pub playlist_name: Option<String>,
    pub track_name: Option<String>,
    pub playing: Option<bool>,
    pub volume: Option<u8>,
    pub shuffle: Option<bool>,
    pub loop_enabled: Option<bool>,
}

impl MusicPatch {
    fn from_object(value: &Value) -> Self {
        Self {
            playlist_name: value["playlist_name"].as_str().map(String::from),
            track_name: value["track_name"].as_str().map(String::from),
            playing: value["playing"].as_bool(),
            volume: clamp_volume(&value["volume"]),
            shuffle: value["shuffle"].as_bool(),
            loop_enabled: value["loop"].as_bool(),
        }
    }

    fn apply(&self, target: &mut MusicState) {
        if let Some(v) = &self.playlist_name {
            target.playlist_name = v.clone();
        }
        if let Some(v) = &self.track_name {
            target.track_name = v.clone();
        }
        if let Some(v) = self.playing {
            target.playing = v;
        }
        if let Some(v) = self.volume {
            target.volume = v;
        }
        if let Some(v) = self.shuffle {
            target.shuffle = v;
        }
        if let Some(v) = self.loop_enabled {
            target.loop_enabled = v;
        }
    }
}

/// Sparse update for the ambience slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbiencePatch {
    pub name: Option<String>,
    pub playing: Option<bool>,
    pub volume: Option<u8>,
}

impl AmbiencePatch {
    fn from_object(value: &Value) -> Self {
        Self {
            name: value["name"].as_str().map(String::from),
            playing: value["playing"].as_bool(),
            volume: clamp_volume(&value["volume"]),
        }
    }

    fn apply(&self, target: &mut AmbienceState) {
        if let Some(v) = &self.name {
            target.name = v.clone();
        }
        if let Some(v) = self.playing {
            target.playing = v;
        }
        if let Some(v) = self.volume {
            target.volume = v;
        }
    }
}

/// A normalized partial state update, ready to merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub music: Option<MusicPatch>,
    pub ambience: Option<AmbiencePatch>,
    pub in_vc: Option<bool>,
    pub bot_online: Option<BotStatus>,
}

impl StatePatch {
    /// Normalize a wire payload into a patch.
    ///
    /// Accepted shapes:
    /// - a JSON object (canonical),
    /// - a string containing an encoded JSON document (decoded, then
    ///   normalized again),
    /// - a single-element array wrapping the document,
    /// - a four-or-more element array carrying the legacy positional layout
    ///   `[music, ambience, in_vc, bot_online]`.
    ///
    /// Anything else returns `None` and the frame is rejected before the
    /// merge.
    pub fn from_wire(value: &Value) -> Option<Self> {
        match value {
            Value::Object(_) => Some(Self::from_object(value)),
            Value::String(encoded) => serde_json::from_str::<Value>(encoded)
                .ok()
                .and_then(|decoded| Self::from_wire(&decoded)),
            Value::Array(items) if items.len() == 1 => Self::from_wire(&items[0]),
            Value::Array(items) if items.len() >= 4 => {
                let mut doc = serde_json::Map::new();
                doc.insert("music".to_string(), items[0].clone());
                doc.insert("ambience".to_string(), items[1].clone());
                doc.insert("in_vc".to_string(), items[2].clone());
                doc.insert("bot_online".to_string(), items[3].clone());
                Some(Self::from_object(&Value::Object(doc)))
            }
            _ => None,
        }
    }

    /// Extract recognized fields from a canonical object. Fields of the
    /// wrong type are skipped, not errors — `in_vc` must be a boolean and
    /// `bot_online` a recognized status string to be taken.
    fn from_object(value: &Value) -> Self {
        Self {
            music: value
                .get("music")
                .filter(|m| m.is_object())
                .map(MusicPatch::from_object),
            ambience: value
                .get("ambience")
                .filter(|a| a.is_object())
                .map(AmbiencePatch::from_object),
            in_vc: value.get("in_vc").and_then(Value::as_bool),
            bot_online: value
                .get("bot_online")
                .and_then(Value::as_str)
                .and_then(BotStatus::parse),
        }
    }
}

/// Volumes are 0–100; out-of-range wire values are clamped, non-integer
/// values skipped.
#[allow(clippy::cast_possible_truncation)]
fn clamp_volume(value: &Value) -> Option<u8> {
    value.as_u64().map(|v| v.min(100) as u8)
}

/// Owner of the playback state mirror.
///
/// The store is the only mutator of [`PlaybackState`]; consumers read owned
/// snapshots and request changes by sending commands, then react to the
/// resulting [`ClientEvent::StateChanged`].
pub struct StateStore {
    state: Mutex<PlaybackState>,
    bus: EventBus,
}

impl StateStore {
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: Mutex::new(PlaybackState::default()),
            bus,
        }
    }

    /// An owned copy of the current mirror.
    pub fn snapshot(&self) -> PlaybackState {
        self.state.lock().expect("playback state lock poisoned").clone()
    }

    /// Apply a normalized patch. Fields the patch has no opinion on keep
    /// their current value. Notifies subscribers exactly once.
    pub fn merge(&self, patch: &StatePatch) {
        let snapshot = {
            let mut state = self.state.lock().expect("playback state lock poisoned");
            if let Some(music) = &patch.music {
                music.apply(&mut state.music);
            }
            if let Some(ambience) = &patch.ambience {
                ambience.apply(&mut state.ambience);
            }
            if let Some(in_vc) = patch.in_vc {
                state.in_vc = in_vc;
            }
            if let Some(status) = patch.bot_online {
                state.bot_online = status;
            }
            state.clone()
        };
        self.bus.emit(ClientEvent::StateChanged(snapshot));
    }

    /// Update only the bot liveness slice. Notifies subscribers exactly once.
    pub fn set_bot_status(&self, status: BotStatus) {
        let snapshot = {
            let mut state = self.state.lock().expect("playback state lock poisoned");
            state.bot_online = status;
            state.clone()
        };
        self.bus.emit(ClientEvent::StateChanged(snapshot));
    }

    /// Restore all defaults. Per-track and per-ambience state is meaningless
    /// outside a voice-channel session, so leaving one resets the mirror.
    pub fn reset(&self) {
        let snapshot = {
            let mut state = self.state.lock().expect("playback state lock poisoned");
            *state = PlaybackState::default();
            state.clone()
        };
        self.bus.emit(ClientEvent::StateChanged(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> StateStore {
        StateStore::new(EventBus::new())
    }

    #[test]
    fn defaults_match_reset_document() {
        let state = PlaybackState::default();
        assert_eq!(state.music.playlist_name, "None");
        assert_eq!(state.music.track_name, "None");
        assert!(!state.music.playing);
        assert_eq!(state.music.volume, 100);
        assert!(!state.music.shuffle);
        assert!(!state.music.loop_enabled);
        assert_eq!(state.ambience.name, "None");
        assert!(!state.ambience.playing);
        assert_eq!(state.ambience.volume, 25);
        assert!(!state.in_vc);
        assert_eq!(state.bot_online, BotStatus::Offline);
    }

    #[test]
    fn volume_only_merge_leaves_other_fields() {
        let store = store();
        let patch = StatePatch::from_wire(&json!({ "music": { "volume": 40 } })).unwrap();
        store.merge(&patch);

        let state = store.snapshot();
        assert_eq!(state.music.volume, 40);
        assert_eq!(state.music.playlist_name, "None");
        assert_eq!(state.ambience.volume, 25);
        assert!(!state.in_vc);

        store.reset();
        assert_eq!(store.snapshot().music.volume, 100);
    }

    #[test]
    fn absent_fields_never_clobber() {
        let store = store();
        store.merge(
            &StatePatch::from_wire(&json!({
                "music": {
                    "playlist_name": "Tavern",
                    "track_name": "Lute Set",
                    "playing": true,
                    "volume": 80,
                    "shuffle": true,
                    "loop": true
                },
                "in_vc": true
            }))
            .unwrap(),
        );

        // A later sparse update must not regress the fields it omits.
        store.merge(&StatePatch::from_wire(&json!({ "music": { "volume": 55 } })).unwrap());

        let state = store.snapshot();
        assert_eq!(state.music.volume, 55);
        assert_eq!(state.music.playlist_name, "Tavern");
        assert_eq!(state.music.track_name, "Lute Set");
        assert!(state.music.playing);
        assert!(state.music.shuffle);
        assert!(state.music.loop_enabled);
        assert!(state.in_vc);
    }

    #[test]
    fn null_field_means_no_opinion() {
        let store = store();
        store.merge(
            &StatePatch::from_wire(&json!({ "music": { "track_name": "Dungeon Echoes" } }))
                .unwrap(),
        );
        store.merge(
            &StatePatch::from_wire(&json!({ "music": { "track_name": null, "volume": 10 } }))
                .unwrap(),
        );
        let state = store.snapshot();
        assert_eq!(state.music.track_name, "Dungeon Echoes");
        assert_eq!(state.music.volume, 10);
    }

    #[test]
    fn reset_is_idempotent() {
        let store = store();
        store.merge(
            &StatePatch::from_wire(&json!({
                "music": { "volume": 1, "playing": true },
                "ambience": { "name": "Rain", "playing": true },
                "in_vc": true,
                "bot_online": "online"
            }))
            .unwrap(),
        );

        store.reset();
        let once = store.snapshot();
        store.reset();
        let twice = store.snapshot();

        assert_eq!(once, PlaybackState::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn volume_clamped_to_range() {
        let patch = StatePatch::from_wire(&json!({ "music": { "volume": 400 } })).unwrap();
        assert_eq!(patch.music.unwrap().volume, Some(100));

        // Non-integer volume is skipped entirely.
        let patch = StatePatch::from_wire(&json!({ "music": { "volume": "loud" } })).unwrap();
        assert_eq!(patch.music.unwrap().volume, None);
    }

    #[test]
    fn malformed_in_vc_and_bot_online_ignored() {
        let patch =
            StatePatch::from_wire(&json!({ "in_vc": "yes", "bot_online": "rebooting" })).unwrap();
        assert_eq!(patch.in_vc, None);
        assert_eq!(patch.bot_online, None);

        let store = store();
        store.merge(&patch);
        assert_eq!(store.snapshot(), PlaybackState::default());
    }

    #[test]
    fn from_wire_decodes_string_payload() {
        let encoded = json!({ "music": { "volume": 33 } }).to_string();
        let patch = StatePatch::from_wire(&Value::String(encoded)).unwrap();
        assert_eq!(patch.music.unwrap().volume, Some(33));
    }

    #[test]
    fn from_wire_unwraps_single_element_array() {
        let patch = StatePatch::from_wire(&json!([{ "in_vc": true }])).unwrap();
        assert_eq!(patch.in_vc, Some(true));
    }

    #[test]
    fn from_wire_reads_positional_array() {
        let patch = StatePatch::from_wire(&json!([
            { "volume": 60 },
            { "name": "Storm" },
            true,
            "booting"
        ]))
        .unwrap();
        assert_eq!(patch.music.unwrap().volume, Some(60));
        assert_eq!(patch.ambience.unwrap().name.as_deref(), Some("Storm"));
        assert_eq!(patch.in_vc, Some(true));
        assert_eq!(patch.bot_online, Some(BotStatus::Booting));
    }

    #[test]
    fn from_wire_rejects_scalars() {
        assert_eq!(StatePatch::from_wire(&json!(42)), None);
        assert_eq!(StatePatch::from_wire(&json!(null)), None);
        assert_eq!(StatePatch::from_wire(&json!([1, 2])), None);
        assert_eq!(StatePatch::from_wire(&Value::String("not json".into())), None);
    }

    #[test]
    fn bot_status_round_trip() {
        for status in [BotStatus::Offline, BotStatus::Booting, BotStatus::Online] {
            assert_eq!(BotStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BotStatus::parse("ONLINE"), None);
    }
}
