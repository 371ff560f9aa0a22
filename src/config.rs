//! Mirror Configuration
//!
//! Settings for the store connection, the transfer queue and the contract
//! filter, with defaults and loading from `MIRROR_*` environment variables.

use std::time::Duration;
use thiserror::Error;

use crate::chain::{Name, NameError};
use crate::queue::{ThrottleConfig, DEFAULT_QUEUE_SIZE};

/// Default store connection URI
pub const DEFAULT_STORE_URI: &str = "redis://127.0.0.1:6379";

/// Default key namespace of the mirrored collections
pub const DEFAULT_NAMESPACE: &str = "Filter";

/// Default number of store connection attempts before giving up
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Initial backoff delay between connection attempts
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay between connection attempts
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Errors that can occur while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Queue size must be greater than zero")]
    ZeroQueueSize,

    #[error("Invalid filter contract: {0}")]
    InvalidContract(#[from] NameError),

    #[error("Throttle minimum ({min:?}) exceeds maximum ({max:?})")]
    InvalidThrottle { min: Duration, max: Duration },
}

/// Configuration of the mirror
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Store connection URI
    pub store_uri: String,
    /// Key namespace of the account and action collections
    pub namespace: String,
    /// Queue depth above which the producer is throttled
    pub queue_size: usize,
    /// First block whose transactions are persisted; 0 persists from the start
    pub start_block: u32,
    /// Drop both collections on startup
    pub wipe_on_startup: bool,
    /// Contracts whose actions are persisted
    pub filter_contracts: Vec<String>,
    /// Producer throttle bounds
    pub throttle: ThrottleConfig,
    /// Store connection attempts before giving up
    pub connect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            store_uri: DEFAULT_STORE_URI.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            queue_size: DEFAULT_QUEUE_SIZE,
            start_block: 0,
            wipe_on_startup: false,
            filter_contracts: Vec::new(),
            throttle: ThrottleConfig::default(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl MirrorConfig {
    /// Create a config filtering the given contracts
    pub fn with_contracts<I, C>(contracts: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self {
            filter_contracts: contracts.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Load configuration from `MIRROR_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults
    ///
    /// Recognized keys: `MIRROR_STORE_URI`, `MIRROR_NAMESPACE`,
    /// `MIRROR_QUEUE_SIZE`, `MIRROR_START_BLOCK`, `MIRROR_WIPE`,
    /// `MIRROR_FILTER_CONTRACTS` (comma separated),
    /// `MIRROR_THROTTLE_STEP_MS`, `MIRROR_THROTTLE_MAX_MS` and
    /// `MIRROR_CONNECT_ATTEMPTS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(uri) = lookup("MIRROR_STORE_URI") {
            config.store_uri = uri;
        }
        if let Some(namespace) = lookup("MIRROR_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(value) = lookup("MIRROR_QUEUE_SIZE") {
            config.queue_size = parse_value("MIRROR_QUEUE_SIZE", &value)?;
        }
        if let Some(value) = lookup("MIRROR_START_BLOCK") {
            config.start_block = parse_value("MIRROR_START_BLOCK", &value)?;
        }
        if let Some(value) = lookup("MIRROR_WIPE") {
            config.wipe_on_startup = parse_flag("MIRROR_WIPE", &value)?;
        }
        if let Some(value) = lookup("MIRROR_FILTER_CONTRACTS") {
            config.filter_contracts = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = lookup("MIRROR_THROTTLE_STEP_MS") {
            config.throttle.step =
                Duration::from_millis(parse_value("MIRROR_THROTTLE_STEP_MS", &value)?);
        }
        if let Some(value) = lookup("MIRROR_THROTTLE_MAX_MS") {
            config.throttle.max =
                Duration::from_millis(parse_value("MIRROR_THROTTLE_MAX_MS", &value)?);
        }
        if let Some(value) = lookup("MIRROR_CONNECT_ATTEMPTS") {
            config.connect_attempts = parse_value("MIRROR_CONNECT_ATTEMPTS", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if self.throttle.min > self.throttle.max {
            return Err(ConfigError::InvalidThrottle {
                min: self.throttle.min,
                max: self.throttle.max,
            });
        }
        self.contract_names()?;
        Ok(())
    }

    /// Filter contracts parsed as names
    pub fn contract_names(&self) -> Result<Vec<Name>, ConfigError> {
        self.filter_contracts
            .iter()
            .map(|c| c.parse::<Name>().map_err(ConfigError::from))
            .collect()
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
