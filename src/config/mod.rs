// src/config/mod.rs
// Layered configuration: defaults -> TOML file -> environment -> CLI flags

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::relay::multiplexer::{DEFAULT_MAX_SUBSCRIBERS, DEFAULT_SUBSCRIBER_BUFFER};
use crate::relay::upstream::DEFAULT_UPSTREAM_URL;

pub const DEFAULT_JWT_SECRET: &str = "parley-dev-secret";

/// What gets sent upstream on each turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// Latest prompt only; the provider keeps the conversation via `session_id`
    #[default]
    ProviderSession,
    /// Whole ledger history on every turn
    FullReplay,
}

impl FromStr for HistoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "provider_session" | "session" => Ok(Self::ProviderSession),
            "full_replay" | "replay" | "full" => Ok(Self::FullReplay),
            other => Err(format!("unknown history policy: {}", other)),
        }
    }
}

impl fmt::Display for HistoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderSession => write!(f, "provider_session"),
            Self::FullReplay => write!(f, "full_replay"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    // ── Server
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    pub static_dir: Option<PathBuf>,

    // ── Upstream provider
    pub upstream_url: String,
    pub upstream_api_key: String,
    pub history_policy: HistoryPolicy,

    // ── Stream fan-out
    pub max_subscribers_per_session: usize,
    pub subscriber_buffer: usize,

    // ── Uploads
    pub upload_dir: PathBuf,
    pub upload_max_bytes: usize,

    // ── Auth
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub require_auth: bool,
    pub login_max_attempts: u32,
    pub login_window_secs: u64,
    /// Key login attempts on `X-Forwarded-For`. Only safe behind a proxy that sets it.
    pub trust_forwarded_for: bool,
    pub test_user_email: Option<String>,
    pub test_user_name: Option<String>,
    pub test_user_password: Option<String>,

    // ── Logging
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origin: "*".to_string(),
            static_dir: None,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            upstream_api_key: String::new(),
            history_policy: HistoryPolicy::default(),
            max_subscribers_per_session: DEFAULT_MAX_SUBSCRIBERS,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            upload_dir: PathBuf::from("uploads"),
            upload_max_bytes: 10 * 1024 * 1024,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_ttl_hours: 24,
            require_auth: false,
            login_max_attempts: 5,
            login_window_secs: 24 * 60 * 60,
            trust_forwarded_for: false,
            test_user_email: None,
            test_user_name: None,
            test_user_password: None,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Defaults, then the TOML file, then process environment.
    ///
    /// An explicit `config_file` must exist; the default `~/.parley/config.toml`
    /// is optional.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Overlay values from an environment lookup. Values that fail to parse
    /// keep what the previous layer set.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvLayer { lookup };

        env.set(&mut self.host, "PARLEY_HOST");
        env.set(&mut self.port, "PORT");
        env.set(&mut self.cors_origin, "PARLEY_CORS_ORIGIN");
        env.set_opt(&mut self.static_dir, "PARLEY_STATIC_DIR");

        env.set(&mut self.upstream_url, "ALIYUN_AI_API_URL");
        env.set(&mut self.upstream_api_key, "ALIYUN_API_KEY");
        env.set(&mut self.history_policy, "PARLEY_HISTORY_POLICY");

        env.set(&mut self.max_subscribers_per_session, "PARLEY_MAX_SUBSCRIBERS");
        env.set(&mut self.subscriber_buffer, "PARLEY_SUBSCRIBER_BUFFER");

        env.set(&mut self.upload_dir, "PARLEY_UPLOAD_DIR");
        env.set(&mut self.upload_max_bytes, "PARLEY_UPLOAD_MAX_BYTES");

        env.set(&mut self.jwt_secret, "JWT_SECRET");
        env.set(&mut self.token_ttl_hours, "PARLEY_TOKEN_TTL_HOURS");
        env.set(&mut self.require_auth, "PARLEY_REQUIRE_AUTH");
        env.set(&mut self.login_max_attempts, "PARLEY_LOGIN_MAX_ATTEMPTS");
        env.set(&mut self.login_window_secs, "PARLEY_LOGIN_WINDOW_SECS");
        env.set(&mut self.trust_forwarded_for, "PARLEY_TRUST_FORWARDED_FOR");
        env.set_opt(&mut self.test_user_email, "TEST_USER_EMAIL");
        env.set_opt(&mut self.test_user_name, "TEST_USER_NAME");
        env.set_opt(&mut self.test_user_password, "TEST_USER_PASSWORD");

        env.set(&mut self.log_level, "PARLEY_LOG_LEVEL");
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

struct EnvLayer<F> {
    lookup: F,
}

impl<F> EnvLayer<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value with any trailing `# comment` removed; empty counts as unset
    fn clean(&self, key: &str) -> Option<String> {
        let raw = (self.lookup)(key)?;
        let clean = raw.split('#').next().unwrap_or("").trim();
        if clean.is_empty() {
            None
        } else {
            Some(clean.to_string())
        }
    }

    fn set<T: FromStr>(&self, slot: &mut T, key: &str) {
        let Some(value) = self.clean(key) else {
            return;
        };
        match value.parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => eprintln!("Config: {} = '{}' (parse failed, keeping previous value)", key, value),
        }
    }

    fn set_opt<T: FromStr>(&self, slot: &mut Option<T>, key: &str) {
        let Some(value) = self.clean(key) else {
            return;
        };
        match value.parse::<T>() {
            Ok(parsed) => *slot = Some(parsed),
            Err(_) => eprintln!("Config: {} = '{}' (parse failed, keeping previous value)", key, value),
        }
    }
}

/// Default config file location
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".parley")
        .join("config.toml")
}
