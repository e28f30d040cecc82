//! Environment-driven configuration.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MONGO_URL` | `mongodb://localhost:27017` | Connection string |
//! | `MONGO_DATABASE` | (required) | Target database |
//! | `MIGRATIONS_COLLECTION` | `schema_migrations` | Ledger collection |
//! | `MIGRATIONS_LOCK_COLLECTION` | `migrations_lock` | Lock collection |
//! | `MIGRATIONS_LOCK_TTL_SECS` | `600` | Lock TTL index expiry |
//! | `MIGRATIONS_RELEASE_GRACE_SECS` | `5` | Bounded lock release time |
//! | `MONGO_USERNAME` / `MONGO_PASSWORD` | unset | Credentials (if not in URL) |
//! | `MONGO_AUTH_SOURCE` | `admin` | Authentication database |
//! | `MONGO_SSL_ENABLED` | `false` | Enable TLS |
//! | `MONGO_SSL_INSECURE` | `false` | Accept invalid certificates |
//! | `MONGO_MAX_POOL_SIZE` | `10` | Max pooled connections |
//! | `MONGO_MIN_POOL_SIZE` | `1` | Min pooled connections |
//! | `MONGO_TIMEOUT` | `60` | Connect/selection timeout (seconds) |

use std::path::Path;
use std::time::Duration;

use crate::defaults;
use crate::error::{Error, Result};

/// Connection and engine settings.
#[derive(Clone)]
pub struct Config {
    pub mongo_url: String,
    pub database: String,
    pub migrations_collection: String,
    pub lock_collection: String,
    pub lock_ttl: Duration,
    pub release_grace: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_source: Option<String>,
    pub ssl_enabled: bool,
    pub ssl_insecure: bool,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("mongo_url", &self.mongo_url)
            .field("database", &self.database)
            .field("migrations_collection", &self.migrations_collection)
            .field("lock_collection", &self.lock_collection)
            .field("lock_ttl", &self.lock_ttl)
            .field("release_grace", &self.release_grace)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("auth_source", &self.auth_source)
            .field("ssl_enabled", &self.ssl_enabled)
            .field("ssl_insecure", &self.ssl_insecure)
            .field("max_pool_size", &self.max_pool_size)
            .field("min_pool_size", &self.min_pool_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Config {
    /// Config for `database` with every other setting at its default.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            mongo_url: defaults::MONGO_URL.to_string(),
            database: database.into(),
            migrations_collection: defaults::MIGRATIONS_COLLECTION.to_string(),
            lock_collection: defaults::LOCK_COLLECTION.to_string(),
            lock_ttl: Duration::from_secs(defaults::LOCK_TTL_SECS),
            release_grace: Duration::from_secs(defaults::RELEASE_GRACE_SECS),
            username: None,
            password: None,
            auth_source: Some(defaults::MONGO_AUTH_SOURCE.to_string()),
            ssl_enabled: false,
            ssl_insecure: false,
            max_pool_size: defaults::MONGO_MAX_POOL_SIZE,
            min_pool_size: defaults::MONGO_MIN_POOL_SIZE,
            timeout: Duration::from_secs(defaults::MONGO_TIMEOUT_SECS),
        }
    }

    /// Load `.env`-style files that exist (earlier files win), then read the environment.
    pub fn load<P: AsRef<Path>>(env_files: &[P]) -> Result<Self> {
        for file in env_files {
            let path = file.as_ref();
            if path.exists() {
                if let Err(e) = dotenvy::from_path(path) {
                    return Err(Error::Config(format!(
                        "failed to read {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
        Self::from_env()
    }

    /// Create config from environment variables (with defaults).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database = get("MONGO_DATABASE").unwrap_or_default();
        let mut config = Self::new(database);

        if let Some(url) = get("MONGO_URL") {
            config.mongo_url = url;
        }
        if let Some(coll) = get("MIGRATIONS_COLLECTION") {
            config.migrations_collection = coll;
        }
        if let Some(coll) = get("MIGRATIONS_LOCK_COLLECTION") {
            config.lock_collection = coll;
        }
        if let Some(secs) = get("MIGRATIONS_LOCK_TTL_SECS") {
            config.lock_ttl = Duration::from_secs(parse_number("MIGRATIONS_LOCK_TTL_SECS", &secs)?);
        }
        if let Some(secs) = get("MIGRATIONS_RELEASE_GRACE_SECS") {
            config.release_grace =
                Duration::from_secs(parse_number("MIGRATIONS_RELEASE_GRACE_SECS", &secs)?);
        }
        config.username = get("MONGO_USERNAME");
        config.password = get("MONGO_PASSWORD");
        if let Some(source) = get("MONGO_AUTH_SOURCE") {
            config.auth_source = Some(source);
        }
        if let Some(v) = get("MONGO_SSL_ENABLED") {
            config.ssl_enabled = parse_bool("MONGO_SSL_ENABLED", &v)?;
        }
        if let Some(v) = get("MONGO_SSL_INSECURE") {
            config.ssl_insecure = parse_bool("MONGO_SSL_INSECURE", &v)?;
        }
        if let Some(v) = get("MONGO_MAX_POOL_SIZE") {
            config.max_pool_size = parse_number("MONGO_MAX_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("MONGO_MIN_POOL_SIZE") {
            config.min_pool_size = parse_number("MONGO_MIN_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("MONGO_TIMEOUT") {
            config.timeout = Duration::from_secs(parse_number("MONGO_TIMEOUT", &v)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check required settings and internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(Error::Config("MONGO_DATABASE is required".to_string()));
        }
        if self.migrations_collection == self.lock_collection {
            return Err(Error::Config(
                "MIGRATIONS_COLLECTION and MIGRATIONS_LOCK_COLLECTION must differ".to_string(),
            ));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(Error::Config(format!(
                "MONGO_MIN_POOL_SIZE ({}) exceeds MONGO_MAX_POOL_SIZE ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        if self.lock_ttl.is_zero() {
            return Err(Error::Config(
                "MIGRATIONS_LOCK_TTL_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_mongo_url(mut self, url: impl Into<String>) -> Self {
        self.mongo_url = url.into();
        self
    }

    pub fn with_migrations_collection(mut self, name: impl Into<String>) -> Self {
        self.migrations_collection = name.into();
        self
    }

    pub fn with_lock_collection(mut self, name: impl Into<String>) -> Self {
        self.lock_collection = name.into();
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be a boolean, got {value:?}"))),
    }
}
