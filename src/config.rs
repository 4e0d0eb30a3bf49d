//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the bot's constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::bot::Layout;
use crate::gallery::DEFAULT_API_ENDPOINT;
use crate::limits::admission::{DEFAULT_IDLE_TTL_SECS, DEFAULT_MAX_TRACKED_KEYS};
use crate::limits::{Eviction, MeterPolicy, Scope};

/// Application settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Remote gallery API
    #[serde(default)]
    pub api: ApiSettings,

    /// Token bucket limits
    #[serde(default)]
    pub ratelimit: RateLimitSettings,

    /// Optional flood window limits
    #[serde(default)]
    pub antispam: AntispamSettings,

    /// Bounds on per-sender and per-room limiter state
    #[serde(default)]
    pub limits: EvictionSettings,

    /// Comma-separated list of user IDs whose messages are ignored
    #[serde(rename = "blacklist", default)]
    pub blacklist_str: Option<String>,

    /// From this many galleries on, all results go into one message
    #[serde(default = "default_inline_thresh")]
    pub inline_thresh: usize,

    /// From this many galleries on, results are collapsed
    #[serde(default = "default_collapse_thresh")]
    pub collapse_thresh: usize,
}

/// Remote API endpoint and timeout.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_api_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            endpoint: default_api_endpoint(),
            timeout_secs: default_api_timeout_secs(),
        }
    }
}

/// Token bucket parameters.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct BucketSettings {
    /// Tokens gained per second
    pub per_second: f64,
    /// Bucket capacity
    pub burst_count: u32,
}

impl From<BucketSettings> for MeterPolicy {
    fn from(s: BucketSettings) -> Self {
        Self::TokenBucket {
            per_second: s.per_second,
            burst_count: s.burst_count,
        }
    }
}

/// Token bucket limits per scope.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct RateLimitSettings {
    /// Shared by all requests to the remote API
    #[serde(default = "default_api_bucket")]
    pub api: BucketSettings,
    /// Per sender, costs one token per gallery
    #[serde(default = "default_user_bucket")]
    pub user: BucketSettings,
    /// Per room, costs one token per gallery
    #[serde(default = "default_room_bucket")]
    pub room: BucketSettings,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            api: default_api_bucket(),
            user: default_user_bucket(),
            room: default_room_bucket(),
        }
    }
}

/// Flood window parameters.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct FloodSettings {
    /// Messages allowed per window
    pub max: u32,
    /// Idle seconds after which the window resets
    pub delay: u64,
}

impl From<FloodSettings> for MeterPolicy {
    fn from(s: FloodSettings) -> Self {
        Self::FloodWindow {
            max: s.max,
            delay_secs: s.delay,
        }
    }
}

/// Flood windows per scope, disabled unless configured.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct AntispamSettings {
    #[serde(default)]
    pub user: Option<FloodSettings>,
    #[serde(default)]
    pub room: Option<FloodSettings>,
}

/// Bounds on keyed limiter state.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct EvictionSettings {
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: u64,
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

impl Default for EvictionSettings {
    fn default() -> Self {
        Self {
            max_tracked_keys: default_max_tracked_keys(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

fn default_api_endpoint() -> String {
    DEFAULT_API_ENDPOINT.to_string()
}

const fn default_api_timeout_secs() -> u64 {
    API_TIMEOUT_SECS
}

// Following the load guidance published for the API: 5 request burst, then
// one request every 5 seconds.
const fn default_api_bucket() -> BucketSettings {
    BucketSettings {
        per_second: 0.2,
        burst_count: 5,
    }
}

const fn default_user_bucket() -> BucketSettings {
    BucketSettings {
        per_second: 0.05,
        burst_count: 5,
    }
}

const fn default_room_bucket() -> BucketSettings {
    BucketSettings {
        per_second: 0.1,
        burst_count: 10,
    }
}

const fn default_max_tracked_keys() -> u64 {
    DEFAULT_MAX_TRACKED_KEYS
}

const fn default_idle_ttl_secs() -> u64 {
    DEFAULT_IDLE_TTL_SECS
}

const fn default_inline_thresh() -> usize {
    2
}

const fn default_collapse_thresh() -> usize {
    5
}

/// Build the layered configuration source.
///
/// Sources, later ones winning: `config/default`, `config/{RUN_MODE}`,
/// `config/local`, `APP__`-prefixed environment variables (nested keys
/// separated by `__`), then plain environment variables.
///
/// # Errors
///
/// Returns a `ConfigError` if a source fails to load.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // This file shouldn't be checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP__RATELIMIT__USER__BURST_COUNT=3`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // `TELEGRAM_TOKEN`, `BLACKLIST`, ...; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sadpanda::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Returns the set of sender IDs whose messages are ignored
    #[must_use]
    pub fn blacklist(&self) -> HashSet<String> {
        self.blacklist_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Timeout applied to each remote API call
    #[must_use]
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Eviction bounds for per-key limiter state
    #[must_use]
    pub fn eviction(&self) -> Eviction {
        Eviction {
            max_keys: self.limits.max_tracked_keys,
            idle: Duration::from_secs(self.limits.idle_ttl_secs),
        }
    }

    /// Message layout thresholds for gallery responses
    #[must_use]
    pub const fn layout(&self) -> Layout {
        Layout {
            inline_thresh: self.inline_thresh,
            collapse_thresh: self.collapse_thresh,
        }
    }

    /// All configured limits, token buckets before flood windows
    #[must_use]
    pub fn limit_policies(&self) -> Vec<(Scope, MeterPolicy)> {
        let mut policies = vec![
            (Scope::Api, self.ratelimit.api.into()),
            (Scope::Sender, self.ratelimit.user.into()),
            (Scope::Room, self.ratelimit.room.into()),
        ];
        if let Some(flood) = self.antispam.user {
            policies.push((Scope::Sender, flood.into()));
        }
        if let Some(flood) = self.antispam.room {
            policies.push((Scope::Room, flood.into()));
        }
        policies
    }
}

/// Default timeout for remote API calls in seconds.
pub const API_TIMEOUT_SECS: u64 = 30;

// Telegram API retry configuration
/// Initial backoff delay for retries in milliseconds
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff delay for retries in milliseconds
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum number of retries for Telegram API calls
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
