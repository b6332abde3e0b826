//! # ambctl
//!
//! Command-line remote control for the ambience/music playback bot.
//!
//! ## Subcommands
//!
//! - `ambctl watch` (default) — connect, authorize, and stream every state
//!   change, command result, and heartbeat tick as log lines
//! - `ambctl send <COMMAND> [--payload <json>]` — one-shot command
//! - `ambctl status` — probe backend and bot liveness once
//!
//! Configuration comes from `--config <file>`, `AMBCTL_CONFIG`, or the
//! `AMBCTL_URL`/`AMBCTL_KEY` environment variables.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use ambctl::client::{ApiClient, Session};
use ambctl::config::{self, Cli, Commands, ResolvedConfig};
use ambctl::events::{ClientEvent, EventBus};
use ambctl::gateway::CommandGateway;
use ambctl::heartbeat;
use ambctl::socket::BotConnection;
use ambctl::state::{BotStatus, StateStore};

/// How often to re-request bot status while it reports `booting`.
const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How long `ambctl send` waits for an answer before giving up. The
/// protocol is fire-and-forget, so this is a courtesy, not a guarantee.
const SEND_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let config = match config::load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        None | Some(Commands::Watch) => run_watch(config).await,
        Some(Commands::Send { command, payload }) => {
            run_send(config, &command, payload.as_deref()).await;
        }
        Some(Commands::Status) => run_status(config).await,
    }
}

/// Connect, authorize, and log everything until interrupted.
async fn run_watch(config: ResolvedConfig) {
    let session = Arc::new(Session::new());
    let client = Arc::new(ApiClient::new(config.url.clone(), config.key.clone()));
    client.auth_check(&session).await;

    let bus = EventBus::new();
    let store = Arc::new(StateStore::new(bus.clone()));
    // Subscribe before connecting so the initial open is observed too.
    let mut events = bus.subscribe();

    let conn = match BotConnection::connect(&config.url, Arc::clone(&store), bus.clone()).await {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    let gateway = CommandGateway::new(
        Arc::clone(&session),
        conn.state(),
        conn.sender(),
        bus.clone(),
    );
    let heartbeat = heartbeat::start(Arc::clone(&client), bus.clone(), config.heartbeat_interval);

    let mut boot_poll = tokio::time::interval(BOOT_POLL_INTERVAL);
    let mut booting = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            _ = boot_poll.tick(), if booting => {
                gateway.get_bot_status().await;
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if event == ClientEvent::Connected {
                            // The session cookie may have lapsed while the
                            // socket was down.
                            client.auth_check(&session).await;
                        }
                        if let Some(now_booting) = booting_hint(&event) {
                            booting = now_booting;
                        }
                        report(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("event bus lagged, {skipped} events skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    heartbeat.cancel();
    conn.shutdown();
}

/// Send one command, then wait briefly for an answer.
///
/// The protocol has no correlation IDs, so the answer is matched by
/// command name at best: a failure tagged with our command aborts, and the
/// first data-bearing response is reported. The resync requests issued on
/// connect may answer first for read-only commands — that answer is just
/// as current.
async fn run_send(config: ResolvedConfig, command: &str, payload: Option<&str>) {
    let payload: Value = match payload {
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => {
                error!("--payload must be a JSON object");
                std::process::exit(2);
            }
            Err(e) => {
                error!("invalid --payload: {e}");
                std::process::exit(2);
            }
        },
        None => json!({}),
    };

    let session = Arc::new(Session::new());
    let client = Arc::new(ApiClient::new(config.url.clone(), config.key.clone()));
    client.auth_check(&session).await;

    let bus = EventBus::new();
    let store = Arc::new(StateStore::new(bus.clone()));
    let conn = match BotConnection::connect(&config.url, store, bus.clone()).await {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    let gateway = CommandGateway::new(
        Arc::clone(&session),
        conn.state(),
        conn.sender(),
        bus.clone(),
    );

    let mut events = bus.subscribe();
    gateway.send(command, payload).await;

    let deadline = tokio::time::sleep(SEND_RESPONSE_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!("no response within {}s", SEND_RESPONSE_TIMEOUT.as_secs());
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(ClientEvent::CommandRejected { command: rejected }) if rejected == command => {
                        warn!("authorization required for {command}");
                        conn.shutdown();
                        std::process::exit(3);
                    }
                    Ok(ClientEvent::CommandFailed { command: failed, error }) if failed == command => {
                        error!("{command} failed: {error}");
                        conn.shutdown();
                        std::process::exit(1);
                    }
                    Ok(event) if is_answer(&event) => {
                        report(&event);
                        break;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    conn.shutdown();
}

/// Probe liveness and authorization once.
async fn run_status(config: ResolvedConfig) {
    let client = ApiClient::new(config.url.clone(), config.key.clone());
    let session = Session::new();

    let authorized = client.auth_check(&session).await;
    match client.heartbeat().await {
        Ok(status) => {
            info!(
                "web backend: {}",
                if status.web_ok { "reachable" } else { "unreachable" }
            );
            info!(
                "bot process: {}",
                if status.bot_ok { "connected" } else { "down" }
            );
            info!("authorized: {authorized}");
            if !status.web_ok {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("backend unreachable: {e}");
            std::process::exit(1);
        }
    }
}

/// Whether this event changes the booting-poll state: `Some(true)` while
/// the bot reports booting, `Some(false)` once it settles.
fn booting_hint(event: &ClientEvent) -> Option<bool> {
    match event {
        ClientEvent::BotStatus(status) => Some(*status == BotStatus::Booting),
        ClientEvent::StateChanged(state) => Some(state.bot_online == BotStatus::Booting),
        _ => None,
    }
}

/// Data-bearing answers `ambctl send` is willing to report.
fn is_answer(event: &ClientEvent) -> bool {
    matches!(
        event,
        ClientEvent::Playlists(_)
            | ClientEvent::Ambience(_)
            | ClientEvent::BotStatus(_)
            | ClientEvent::PlaylistSaved(_)
            | ClientEvent::AmbienceSaved(_)
            | ClientEvent::VoiceJoined
            | ClientEvent::VoiceLeft
            | ClientEvent::StateChanged(_)
            | ClientEvent::UnhandledCommand(_)
    )
}

/// Render one event as a log line.
fn report(event: &ClientEvent) {
    match event {
        ClientEvent::Connected => info!("socket open"),
        ClientEvent::Disconnected => warn!("socket lost, reconnecting"),
        ClientEvent::StateChanged(state) => info!(
            "state: music[{} / {} playing={} vol={} shuffle={} loop={}] \
             ambience[{} playing={} vol={}] in_vc={} bot={}",
            state.music.playlist_name,
            state.music.track_name,
            state.music.playing,
            state.music.volume,
            state.music.shuffle,
            state.music.loop_enabled,
            state.ambience.name,
            state.ambience.playing,
            state.ambience.volume,
            state.in_vc,
            state.bot_online.as_str(),
        ),
        ClientEvent::BotStatus(status) => info!("bot status: {}", status.as_str()),
        ClientEvent::Playlists(data) => info!(
            "{} playlist(s) loaded",
            data.as_object().map_or(0, |m| m.len())
        ),
        ClientEvent::Ambience(data) => info!(
            "{} ambience track(s) loaded",
            data.as_object().map_or(0, |m| m.len())
        ),
        ClientEvent::PlaylistSaved(data) => info!("playlist saved: {data}"),
        ClientEvent::AmbienceSaved(_) => info!("ambience saved"),
        ClientEvent::VoiceJoined => info!("joined voice channel"),
        ClientEvent::VoiceLeft => info!("left voice channel, state reset"),
        ClientEvent::BotReady(_) => info!("bot ready"),
        ClientEvent::Broadcast(envelope) => info!(
            "broadcast: {}",
            envelope["message"].as_str().unwrap_or("(no message)")
        ),
        ClientEvent::CommandFailed { command, error } => {
            warn!("command '{command}' failed: {error}");
        }
        ClientEvent::CommandRejected { command } => {
            warn!("authorization required to use {command}");
        }
        ClientEvent::UnhandledCommand(envelope) => warn!("unhandled response: {envelope}"),
        ClientEvent::UnhandledMessage(envelope) => warn!("unhandled message: {envelope}"),
        ClientEvent::Heartbeat { web_ok, bot_ok } => {
            info!("heartbeat: web={web_ok} bot={bot_ok}");
        }
    }
}
