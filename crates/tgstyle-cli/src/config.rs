use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tgstyle_engine::{AuthMode, ResolverConfig};

pub const DEFAULT_BIND: &str = "0.0.0.0:3000";
pub const DEFAULT_INFERENCE_URL: &str = "http://127.0.0.1:3001";
pub const DEFAULT_LOG_DIR: &str = "logs";
/// Upper bound for request bodies; base64 photos dominate.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Flags that override environment settings. `None` defers to the env.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub inference_url: Option<String>,
    pub no_inference: bool,
    pub model: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub events: Option<PathBuf>,
    pub auth_mode: Option<String>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub resolver: ResolverConfig,
    pub log_dir: PathBuf,
    pub events_path: PathBuf,
    pub bot_token: String,
    pub auth_mode: AuthMode,
}

impl ServerConfig {
    pub fn from_env(overrides: &Overrides) -> Result<Self> {
        Self::resolve(overrides, |key: &str| env::var(key).ok())
    }

    pub fn resolve(overrides: &Overrides, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_raw = overrides
            .bind
            .clone()
            .or_else(|| first_non_empty(&lookup, &["TGSTYLE_BIND"]))
            .or_else(|| first_non_empty(&lookup, &["PORT"]).map(|port| format!("0.0.0.0:{port}")))
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_raw
            .parse()
            .with_context(|| format!("invalid bind address {bind_raw:?}"))?;

        let auth_mode = match overrides
            .auth_mode
            .clone()
            .or_else(|| first_non_empty(&lookup, &["TGSTYLE_AUTH_MODE"]))
        {
            Some(raw) => match AuthMode::parse(&raw) {
                Some(mode) => mode,
                None => bail!("unknown auth mode {raw:?} (expected strict or development)"),
            },
            None => AuthMode::Strict,
        };

        let log_dir = overrides
            .log_dir
            .clone()
            .or_else(|| first_non_empty(&lookup, &["TGSTYLE_LOG_DIR"]).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
        let events_path = overrides
            .events
            .clone()
            .or_else(|| first_non_empty(&lookup, &["TGSTYLE_EVENTS_PATH"]).map(PathBuf::from))
            .unwrap_or_else(|| log_dir.join("events.jsonl"));

        Ok(Self {
            bind,
            resolver: resolver_config(overrides, &lookup),
            log_dir,
            events_path,
            bot_token: first_non_empty(&lookup, &["TELEGRAM_BOT_TOKEN", "BOT_TOKEN"])
                .unwrap_or_default(),
            auth_mode,
        })
    }
}

pub fn resolver_config_from_env(overrides: &Overrides) -> ResolverConfig {
    resolver_config(overrides, &|key: &str| env::var(key).ok())
}

fn resolver_config(overrides: &Overrides, lookup: &impl Fn(&str) -> Option<String>) -> ResolverConfig {
    let service_endpoint = if overrides.no_inference {
        None
    } else {
        Some(
            overrides
                .inference_url
                .clone()
                .or_else(|| first_non_empty(lookup, &["TGSTYLE_INFERENCE_URL"]))
                .unwrap_or_else(|| DEFAULT_INFERENCE_URL.to_string()),
        )
    };
    let mut config = ResolverConfig {
        service_endpoint,
        model_path: overrides
            .model
            .clone()
            .or_else(|| first_non_empty(lookup, &["TGSTYLE_MODEL_PATH"]).map(PathBuf::from)),
        simulation_seed: overrides.seed,
        ..ResolverConfig::default()
    };
    if let Some(prompt) = first_non_empty(lookup, &["TGSTYLE_PROMPT"]) {
        config.prompt = prompt;
    }
    config
}

fn first_non_empty(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = lookup(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
