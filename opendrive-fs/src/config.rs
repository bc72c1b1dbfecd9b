use std::fmt;
use std::time::Duration;

use opendrive_core::DEFAULT_BASE_URL;
use thiserror::Error;

use crate::obscure::{RevealError, reveal};
use crate::pacer::PacerConfig;

pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_MIN_SLEEP_MS: u64 = 10;
const DEFAULT_MAX_SLEEP_MS: u64 = 5 * 60 * 1000;
const DEFAULT_DECAY_CONSTANT: u32 = 1;
const DEFAULT_MAX_RETRIES: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("username not found")]
    MissingUsername,
    #[error("password not found")]
    MissingPassword,
    #[error("password could not be revealed: {0}")]
    Reveal(#[from] RevealError),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone)]
pub struct RemoteConfig {
    pub name: String,
    pub username: String,
    pub password: String,
    pub root: String,
    pub endpoint: String,
    pub pacer: PacerConfig,
    pub chunk_size: usize,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("root", &self.root)
            .field("endpoint", &self.endpoint)
            .field("pacer", &self.pacer)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl RemoteConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: "opendrive".to_string(),
            username: username.into(),
            password: password.into(),
            root: String::new(),
            endpoint: DEFAULT_BASE_URL.to_string(),
            pacer: PacerConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_pacer(mut self, pacer: PacerConfig) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Reads the remote profile from the process environment, after loading a
    /// `.env` file if one is present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = lookup("OPENDRIVE_USERNAME")
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingUsername)?;
        let obscured = lookup("OPENDRIVE_PASSWORD")
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingPassword)?;
        let password = reveal(&obscured)?;
        if password.is_empty() {
            return Err(ConfigError::MissingPassword);
        }

        let max_retries = match read_u64(&lookup, "OPENDRIVE_MAX_RETRIES")? {
            Some(0) => None,
            Some(value) => Some(u32::try_from(value).unwrap_or(u32::MAX)),
            None => Some(DEFAULT_MAX_RETRIES),
        };
        let decay_constant = read_u64(&lookup, "OPENDRIVE_DECAY_CONSTANT")?
            .map(|value| value.min(16) as u32)
            .unwrap_or(DEFAULT_DECAY_CONSTANT);
        let pacer = PacerConfig {
            min_sleep: Duration::from_millis(
                read_u64(&lookup, "OPENDRIVE_MIN_SLEEP_MS")?.unwrap_or(DEFAULT_MIN_SLEEP_MS),
            ),
            max_sleep: Duration::from_millis(
                read_u64(&lookup, "OPENDRIVE_MAX_SLEEP_MS")?.unwrap_or(DEFAULT_MAX_SLEEP_MS),
            ),
            decay_constant,
            max_retries,
            call_timeout: read_u64(&lookup, "OPENDRIVE_CALL_TIMEOUT_SECS")?
                .filter(|value| *value > 0)
                .map(Duration::from_secs),
        };
        let chunk_size = read_u64(&lookup, "OPENDRIVE_CHUNK_SIZE")?
            .filter(|value| *value > 0)
            .map(|value| usize::try_from(value).unwrap_or(DEFAULT_CHUNK_SIZE))
            .unwrap_or(DEFAULT_CHUNK_SIZE);

        Ok(Self {
            name: lookup("OPENDRIVE_REMOTE_NAME").unwrap_or_else(|| "opendrive".to_string()),
            username,
            password,
            root: lookup("OPENDRIVE_ROOT").unwrap_or_default(),
            endpoint: lookup("OPENDRIVE_ENDPOINT")
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            pacer,
            chunk_size,
        })
    }
}

fn read_u64<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
