//! Configuration loading for ambctl.
//!
//! Configuration is resolved from three fallback sources (tried in order):
//!
//! 1. **JSON file** via `--config <path>` CLI flag
//! 2. **JSON file** via `AMBCTL_CONFIG` environment variable
//! 3. **Environment variables** — `AMBCTL_URL` plus optional `AMBCTL_KEY`
//!
//! The file format:
//!
//! ```json
//! {
//!   "config_version": 1,
//!   "url": "https://bot.example.com",
//!   "key": "shared-secret",
//!   "heartbeat_interval_secs": 300
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;

/// Bump when the config format changes. ambctl warns if the on-disk version
/// is older, so users know to update.
pub const CONFIG_VERSION: u32 = 1;

/// Liveness poll default: one probe every five minutes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);

/// CLI arguments parsed by `clap`.
#[derive(Parser)]
#[command(name = "ambctl", version, about = "Remote control for the playback bot")]
pub struct Cli {
    /// Path to config file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and stream state changes and events (default).
    Watch,
    /// Send a single command and wait briefly for the server's answer.
    Send {
        /// Command name, e.g. PLAY_PLAYLIST
        command: String,
        /// Extra envelope fields as a JSON object, e.g. '{"name":"Tavern"}'
        #[arg(long)]
        payload: Option<String>,
    },
    /// Probe backend and bot liveness once, then exit.
    Status,
}

/// Raw JSON config file structure.
#[derive(Deserialize)]
pub struct ConfigFile {
    /// Config format version — checked against [`CONFIG_VERSION`] to detect
    /// stale files.
    pub config_version: Option<u32>,
    pub url: String,
    /// Credential sent with the auth check. Read-only commands work without it.
    pub key: Option<String>,
    pub heartbeat_interval_secs: Option<u64>,
}

/// Validated configuration.
pub struct ResolvedConfig {
    pub url: String,
    pub key: Option<String>,
    pub heartbeat_interval: Duration,
}

/// Load and validate configuration from CLI args, env vars, or config file.
pub fn load_config(cli: &Cli) -> Result<ResolvedConfig, String> {
    if let Some(path) = &cli.config {
        load_from_file(&expand_tilde(path))
    } else if let Ok(path) = std::env::var("AMBCTL_CONFIG") {
        load_from_file(&expand_tilde(&PathBuf::from(path)))
    } else {
        load_from_env()
    }
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde(path: &PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.clone()
}

fn load_from_file(path: &PathBuf) -> Result<ResolvedConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
    parse_config(&contents).map_err(|e| format!("Config file {}: {}", path.display(), e))
}

/// Parse and validate the JSON config format.
fn parse_config(contents: &str) -> Result<ResolvedConfig, String> {
    let config: ConfigFile =
        serde_json::from_str(contents).map_err(|e| format!("invalid JSON: {e}"))?;

    match config.config_version {
        None => tracing::warn!(
            "config has no config_version field (expected {CONFIG_VERSION}); \
             it may be outdated"
        ),
        Some(v) if v < CONFIG_VERSION => tracing::warn!(
            "config has config_version {v} but ambctl expects {CONFIG_VERSION}; \
             it may be outdated"
        ),
        _ => {}
    }

    validate_url(&config.url)?;

    Ok(ResolvedConfig {
        url: config.url.trim_end_matches('/').to_string(),
        key: config.key.filter(|k| !k.is_empty()),
        heartbeat_interval: config
            .heartbeat_interval_secs
            .map_or(DEFAULT_HEARTBEAT_INTERVAL, Duration::from_secs),
    })
}

fn load_from_env() -> Result<ResolvedConfig, String> {
    let url =
        std::env::var("AMBCTL_URL").map_err(|_| "No config file and AMBCTL_URL not set")?;
    validate_url(&url)?;

    Ok(ResolvedConfig {
        url: url.trim_end_matches('/').to_string(),
        key: std::env::var("AMBCTL_KEY").ok().filter(|k| !k.is_empty()),
        heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
    })
}

fn validate_url(url: &str) -> Result<(), String> {
    if url.is_empty() {
        return Err("url is empty".into());
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(format!("url must start with http:// or https://: {url}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = parse_config(
            r#"{
                "config_version": 1,
                "url": "https://bot.example.com/",
                "key": "secret",
                "heartbeat_interval_secs": 60
            }"#,
        )
        .unwrap();
        assert_eq!(config.url, "https://bot.example.com");
        assert_eq!(config.key.as_deref(), Some("secret"));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config(r#"{ "url": "http://localhost:8080" }"#).unwrap();
        assert_eq!(config.key, None);
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn empty_key_treated_as_absent() {
        let config =
            parse_config(r#"{ "url": "http://localhost:8080", "key": "" }"#).unwrap();
        assert_eq!(config.key, None);
    }

    #[test]
    fn rejects_missing_or_bad_url() {
        assert!(parse_config(r#"{ "url": "" }"#).is_err());
        assert!(parse_config(r#"{ "url": "bot.example.com" }"#).is_err());
        assert!(parse_config(r#"{ "key": "secret" }"#).is_err());
        assert!(parse_config("not json").is_err());
    }

    #[test]
    fn tilde_expansion_uses_home() {
        std::env::set_var("HOME", "/home/gm");
        let expanded = expand_tilde(&PathBuf::from("~/ambctl.json"));
        assert_eq!(expanded, PathBuf::from("/home/gm/ambctl.json"));

        let absolute = expand_tilde(&PathBuf::from("/etc/ambctl.json"));
        assert_eq!(absolute, PathBuf::from("/etc/ambctl.json"));
    }
}
