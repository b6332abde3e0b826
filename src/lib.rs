//! # ambctl
//!
//! Remote-control client for the ambience/music playback bot.
//!
//! The bot is a stateful remote agent reachable over a persistent WebSocket
//! plus a low-frequency HTTP liveness endpoint. This crate keeps a single
//! authoritative local mirror of the bot's playback state in sync with
//! asynchronous, partial, possibly out-of-order server updates, routes every
//! inbound message to the correct handler, and gates outbound commands on an
//! authorization check.
//!
//! ## Architecture
//!
//! ```text
//! main.rs      — entry point, clap subcommands, tracing init
//! config.rs    — JSON file / env-var configuration loading
//! client.rs    — HTTP client: auth check + heartbeat endpoints
//! heartbeat.rs — periodic liveness poll with cancel handle
//! state.rs     — playback state mirror, wire normalization, sparse merge
//! events.rs    — typed client events over a broadcast bus
//! gateway.rs   — single outbound command path with admission checks
//! socket.rs    — WebSocket connection, reconnect with backoff, resync
//! router.rs    — two-level dispatch of inbound envelopes
//! ```
//!
//! ## Data flow
//!
//! Caller → [`gateway::CommandGateway`] (admission check) → socket send.
//! Socket receive → [`router::Router`] → state merge + event, or direct
//! event. Heartbeat poll → event, independent of socket health.

pub mod client;
pub mod config;
pub mod events;
pub mod gateway;
pub mod heartbeat;
pub mod router;
pub mod socket;
pub mod state;
