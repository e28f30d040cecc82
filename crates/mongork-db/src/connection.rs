//! MongoDB client construction.

use std::time::Instant;

use bson::doc;
use mongodb::options::{ClientOptions, Credential, Tls, TlsOptions};
use mongodb::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use mongork_core::{defaults, Config, Result};

/// Application name reported to the server.
pub const APP_NAME: &str = "mongork";

/// Translate [`Config`] into driver options.
///
/// Credentials from the config are only applied when the connection string
/// carries none of its own.
pub async fn client_options(config: &Config) -> Result<ClientOptions> {
    let mut options = ClientOptions::parse(&config.mongo_url).await?;

    options.app_name = Some(APP_NAME.to_string());
    options.max_pool_size = Some(config.max_pool_size);
    options.min_pool_size = Some(config.min_pool_size);
    options.connect_timeout = Some(config.timeout);
    options.server_selection_timeout = Some(config.timeout);

    if options.credential.is_none() {
        if let Some(username) = &config.username {
            let mut credential = Credential::default();
            credential.username = Some(username.clone());
            credential.password = config.password.clone();
            credential.source = Some(
                config
                    .auth_source
                    .clone()
                    .unwrap_or_else(|| defaults::MONGO_AUTH_SOURCE.to_string()),
            );
            options.credential = Some(credential);
        }
    }

    if config.ssl_enabled {
        let mut tls = TlsOptions::default();
        if config.ssl_insecure {
            tls.allow_invalid_certificates = Some(true);
        }
        options.tls = Some(Tls::Enabled(tls));
    }

    Ok(options)
}

/// Create a client from `config` and verify it with a `ping`.
pub async fn create_client(config: &Config) -> Result<Client> {
    let start = Instant::now();

    info!(
        subsystem = "database",
        component = "client",
        op = "create",
        database = %config.database,
        max_pool_size = config.max_pool_size,
        min_pool_size = config.min_pool_size,
        timeout_secs = config.timeout.as_secs(),
        "Creating MongoDB client"
    );

    let client = Client::with_options(client_options(config).await?)?;
    ping(&client).await?;

    info!(
        subsystem = "database",
        component = "client",
        op = "established",
        duration_ms = start.elapsed().as_millis() as u64,
        "MongoDB connection established"
    );
    Ok(client)
}

/// Round-trip a `ping` against the `admin` database.
pub async fn ping(client: &Client) -> Result<()> {
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await?;
    debug!(subsystem = "database", component = "client", op = "ping", "Ping ok");
    Ok(())
}

/// Client created on first use.
///
/// Concurrent first callers share one connection attempt; a failed attempt
/// leaves the cell empty so the next caller retries.
pub struct LazyClient {
    config: Config,
    cell: OnceCell<Client>,
}

impl LazyClient {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cell: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<&Client> {
        self.cell
            .get_or_try_init(|| create_client(&self.config))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_options_carry_pool_and_timeouts() {
        let mut config = Config::new("app");
        config.max_pool_size = 20;
        config.min_pool_size = 2;
        config.timeout = Duration::from_secs(5);

        let options = client_options(&config).await.unwrap();
        assert_eq!(options.app_name.as_deref(), Some(APP_NAME));
        assert_eq!(options.max_pool_size, Some(20));
        assert_eq!(options.min_pool_size, Some(2));
        assert_eq!(options.server_selection_timeout, Some(Duration::from_secs(5)));
        assert!(options.credential.is_none());
        assert!(options.tls.is_none());
    }

    #[tokio::test]
    async fn test_config_credentials_default_auth_source() {
        let mut config = Config::new("app");
        config.username = Some("migrator".into());
        config.password = Some("secret".into());

        let credential = client_options(&config).await.unwrap().credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("migrator"));
        assert_eq!(credential.password.as_deref(), Some("secret"));
        assert_eq!(credential.source.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_url_credentials_win() {
        let mut config = Config::new("app")
            .with_mongo_url("mongodb://owner:pw@localhost:27017/?authSource=app");
        config.username = Some("migrator".into());

        let credential = client_options(&config).await.unwrap().credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("owner"));
    }

    #[tokio::test]
    async fn test_insecure_tls() {
        let mut config = Config::new("app");
        config.ssl_enabled = true;
        config.ssl_insecure = true;

        match client_options(&config).await.unwrap().tls {
            Some(Tls::Enabled(tls)) => assert_eq!(tls.allow_invalid_certificates, Some(true)),
            other => panic!("unexpected tls setting: {other:?}"),
        }
    }

    #[test]
    fn test_lazy_client_starts_disconnected() {
        let lazy = LazyClient::new(Config::new("app"));
        assert!(!lazy.is_connected());
        assert_eq!(lazy.config().database, "app");
    }
}
