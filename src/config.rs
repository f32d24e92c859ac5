use std::{collections::HashMap, fmt, path::Path, str::FromStr, time::Duration};

use config::{Config as ConfigLib, ConfigError, Environment, File};
use redis::{
    Client as RedisClient, RedisResult,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::extensions::ExtensionsConfig;
use crate::pruning::{IdGenerator, PruningConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pruning: PruningConfig,
    #[serde(default)]
    pub extensions: ExtensionsConfig,
}

/// Where issuing point records are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(format!("unknown store backend {other}")),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Memory => f.write_str("memory"),
            StoreBackend::Redis => f.write_str("redis"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub uri: SecretString,
    /// Prefix of every key written by the repository
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    /// How long a writer waits for the per issuing point lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// How long a writer may hold the lock before Redis expires it
    #[serde(default = "default_lock_lease_ms")]
    pub lock_lease_ms: u64,
}

fn default_redis_prefix() -> String {
    "crl".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_lock_lease_ms() -> u64 {
    30_000
}

impl RedisConfig {
    /// Establishes a new Redis connection based on the provided URI.
    ///
    /// - To enable TLS, the URI must use the `rediss://` scheme.
    /// - To enable insecure TLS, the URI must use the `rediss://` scheme and end with `/#insecure`.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn start(&self) -> RedisResult<ConnectionManager> {
        let client = RedisClient::open(self.uri.expose_secret())?;
        let config = ConnectionManagerConfig::new().set_connection_timeout(Duration::from_secs(60));
        client.get_connection_manager_with_config(config).await
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms)
    }
}

/// Id allocation strategies of the certificate and request databases
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, alias = "certIdGenerator")]
    pub cert_id_generator: IdGenerator,
    #[serde(default, alias = "requestIdGenerator")]
    pub request_id_generator: IdGenerator,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    /// Loads from an explicit settings file instead of `config/settings`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::build(Some(path), None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        Self::build(None, env_vars)
    }

    fn build(
        path: Option<&Path>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("config/settings").required(false),
        };
        let mut builder = ConfigLib::builder()
            .set_default("store.backend", "memory")?
            .set_default("database.cert_id_generator", "random")?
            .set_default("database.request_id_generator", "random")?
            .set_default("pruning.enabled", false)?
            .set_default("pruning.cron", "0 0 * * *")?
            .add_source(file);

        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Should be in the format APP_STORE__BACKEND or APP_PRUNING__CRON
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}
