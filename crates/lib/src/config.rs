//! Configuration types and loading.
//!
//! Config is loaded from an optional JSON file (e.g. `~/.onebot-relay/config.json`) and then
//! overridden by environment variables. The result is resolved once into [`Settings`], which is
//! read-only for the life of the process and passed explicitly to the relay.

use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_COMPLETION_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_PRIMARY_MODEL: &str = "gpt-4-0314";
pub const DEFAULT_SECONDARY_MODEL: &str = "gpt-3.5-turbo-0301";

/// Top-level config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Event server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Completion service (OpenAI-compatible) settings.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// OneBot HTTP API settings (where replies are sent).
    #[serde(default)]
    pub onebot: OnebotConfig,

    /// Retry budget shared by completion and delivery.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Dump request and response content to the log. Overridden by EXTRA_LOG env.
    #[serde(default)]
    pub verbose: bool,
}

/// Event server bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for the event server (default 8080).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,

    /// Allow a non-loopback bind. Events carry no authentication, so this is off by default
    /// and the server refuses to start on a non-loopback address without it.
    #[serde(default)]
    pub allow_remote: bool,
}

fn default_server_port() -> u16 {
    8080
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
            allow_remote: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    /// API base including the version segment (default https://api.openai.com/v1).
    /// Overridden by OPENAI_BASE_URL.
    pub base_url: Option<String>,
    /// Overridden by OPENAI_API_KEY.
    pub api_key: Option<String>,
    /// Overridden by PRIMARY_MODEL.
    pub primary_model: Option<String>,
    /// Overridden by SECONDARY_MODEL.
    pub secondary_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnebotConfig {
    /// OneBot HTTP API base, e.g. "http://127.0.0.1:5700". Overridden by RECV_ADDR.
    pub base_url: Option<String>,
    /// Bearer token for the OneBot HTTP API. Overridden by ONEBOT_ACCESS_TOKEN.
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Attempts per tier. Overridden by MAX_RETRIES.
    pub max_attempts: Option<u32>,
    /// Seconds between attempts. Overridden by RETRY_DELAY.
    pub delay_secs: Option<u64>,
}

/// Resolved, immutable settings for one process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub verbose: bool,
    pub retry: RetryPolicy,
    pub completion: CompletionSettings,
    pub onebot: OnebotSettings,
    pub server: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub primary_model: String,
    pub secondary_model: String,
}

#[derive(Debug, Clone)]
pub struct OnebotSettings {
    pub base_url: Option<String>,
    pub access_token: Option<String>,
}

/// Trimmed, non-empty value or None.
fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse an attempt count. Zero, negative, or non-numeric values are rejected.
pub fn parse_max_attempts(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

/// Parse a whole number of seconds.
pub fn parse_delay_secs(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

impl Settings {
    /// Resolve settings from the process environment on top of `config`.
    pub fn from_env(config: &Config) -> Self {
        Self::resolve(config, |key| std::env::var(key).ok())
    }

    /// Resolve settings from `config` and an environment lookup. Env values win over the file;
    /// blank env values are treated as unset. Invalid retry values fall back to the defaults.
    pub fn resolve<F>(config: &Config, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let verbose = match non_empty(env("EXTRA_LOG")) {
            Some(v) => v == "true",
            None => config.verbose,
        };

        let max_attempts = match non_empty(env("MAX_RETRIES")) {
            Some(raw) => parse_max_attempts(&raw).unwrap_or_else(|| {
                log::warn!(
                    "invalid MAX_RETRIES {:?}, using default of {}",
                    raw,
                    DEFAULT_MAX_ATTEMPTS
                );
                DEFAULT_MAX_ATTEMPTS
            }),
            None => config
                .retry
                .max_attempts
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
        };
        let delay_secs = match non_empty(env("RETRY_DELAY")) {
            Some(raw) => parse_delay_secs(&raw).unwrap_or_else(|| {
                log::warn!(
                    "invalid RETRY_DELAY {:?}, using default of {}s",
                    raw,
                    DEFAULT_RETRY_DELAY_SECS
                );
                DEFAULT_RETRY_DELAY_SECS
            }),
            None => config.retry.delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS),
        };

        let completion = CompletionSettings {
            base_url: non_empty(env("OPENAI_BASE_URL"))
                .or_else(|| non_empty(config.completion.base_url.clone()))
                .unwrap_or_else(|| DEFAULT_COMPLETION_BASE_URL.to_string()),
            api_key: non_empty(env("OPENAI_API_KEY"))
                .or_else(|| non_empty(config.completion.api_key.clone())),
            primary_model: non_empty(env("PRIMARY_MODEL"))
                .or_else(|| non_empty(config.completion.primary_model.clone()))
                .unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string()),
            secondary_model: non_empty(env("SECONDARY_MODEL"))
                .or_else(|| non_empty(config.completion.secondary_model.clone()))
                .unwrap_or_else(|| DEFAULT_SECONDARY_MODEL.to_string()),
        };

        let onebot = OnebotSettings {
            base_url: non_empty(env("RECV_ADDR"))
                .or_else(|| non_empty(config.onebot.base_url.clone())),
            access_token: non_empty(env("ONEBOT_ACCESS_TOKEN"))
                .or_else(|| non_empty(config.onebot.access_token.clone())),
        };

        if completion.api_key.is_none() {
            log::warn!("no completion API key configured (OPENAI_API_KEY); completion calls will fail");
        }
        if onebot.base_url.is_none() {
            log::warn!("no OneBot address configured (RECV_ADDR); reply delivery will fail");
        }

        Self {
            verbose,
            retry: RetryPolicy::new(max_attempts, Duration::from_secs(delay_secs)),
            completion,
            onebot,
            server: config.server.clone(),
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".onebot-relay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
