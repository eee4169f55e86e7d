//! Named connection configuration and the lazily connecting store registry.
//!
//! A [`Registry`] maps names to [`ConnectionOptions`]. The first [`Registry::get`] for a name
//! builds its backend and caches the resulting store; every later call returns the same
//! [`Arc`]. Configuration can be assembled in code or loaded from TOML:
//!
//! ```toml
//! trace = true
//! operation_timeout_secs = 5
//!
//! [connections.default]
//! url = "mongodb://localhost:27017"
//! database = "app"
//! max_pool_size = 16
//!
//! [connections.default.credentials]
//! username = "app"
//! password = "secret"
//! ```

use mea::rwlock::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, marker::PhantomData, sync::Arc, time::Duration};

use crate::{
    backend::StoreBackendBuilder,
    error::{DocumentStoreError, DocumentStoreResult},
    store::{DEFAULT_OPERATION_TIMEOUT, DocumentStore, StoreSettings},
    trace::TraceConfig,
};

/// Username/password authentication for a connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Database the credentials are defined in. The driver default applies when unset.
    #[serde(default)]
    pub source: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("source", &self.source)
            .finish()
    }
}

/// Everything needed to open one named connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Connection string, e.g. `mongodb://localhost:27017`.
    pub url: String,
    /// Database every collection of the connection lives in.
    pub database: String,
    #[serde(default)]
    pub max_pool_size: Option<u32>,
    #[serde(default)]
    pub min_pool_size: Option<u32>,
    /// Seconds an idle pooled connection is kept open.
    #[serde(default)]
    pub max_idle_time_secs: Option<u64>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl ConnectionOptions {
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn max_idle_time(&self) -> Option<Duration> {
        self.max_idle_time_secs.map(Duration::from_secs)
    }
}

fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT.as_secs()
}

/// Registry configuration as loaded from a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub trace: bool,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionOptions>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            trace: false,
            operation_timeout_secs: default_operation_timeout_secs(),
            connections: HashMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(input: &str) -> DocumentStoreResult<Self> {
        Ok(toml::from_str(input)?)
    }

    /// The store settings this configuration describes.
    pub fn settings(&self) -> StoreSettings {
        StoreSettings {
            trace: TraceConfig { enabled: self.trace },
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
        }
    }
}

/// Backend builders that can be constructed from [`ConnectionOptions`].
pub trait FromConnectionOptions: StoreBackendBuilder + Sized {
    fn from_options(options: &ConnectionOptions) -> Self;
}

/// Named, lazily connected stores sharing one set of [`StoreSettings`].
///
/// # Type Parameters
///
/// * `Bld` - The builder used to open each connection
pub struct Registry<Bld: StoreBackendBuilder> {
    options: HashMap<String, ConnectionOptions>,
    settings: StoreSettings,
    stores: RwLock<HashMap<String, Arc<DocumentStore<Bld::Backend>>>>,
    _builder: PhantomData<fn() -> Bld>,
}

impl<Bld: StoreBackendBuilder> Default for Registry<Bld> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Bld: StoreBackendBuilder> Registry<Bld> {
    pub fn new() -> Self {
        Self {
            options: HashMap::new(),
            settings: StoreSettings::default(),
            stores: RwLock::new(HashMap::new()),
            _builder: PhantomData,
        }
    }

    pub fn from_config(config: RegistryConfig) -> Self {
        let settings = config.settings();

        Self {
            options: config.connections,
            settings,
            ..Self::new()
        }
    }

    /// Registers `options` under `name`, replacing any previous entry.
    ///
    /// A store already opened under `name` keeps its connection.
    pub fn set_options(&mut self, name: impl Into<String>, options: ConnectionOptions) -> &mut Self {
        self.options.insert(name.into(), options);
        self
    }

    /// Enables or disables tracing for stores opened after this call.
    pub fn set_trace(&mut self, enabled: bool) -> &mut Self {
        self.settings.trace = TraceConfig { enabled };
        self
    }

    /// Sets the operation bound for stores opened after this call.
    pub fn set_operation_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.settings.operation_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn options(&self, name: &str) -> Option<&ConnectionOptions> {
        self.options.get(name)
    }

    /// Returns the store registered under `name`, connecting on first use.
    ///
    /// Concurrent first calls for the same name connect once.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::Configuration`] when no options are registered under `name`, or
    /// whatever the builder returns when the connection cannot be established. Failed
    /// connections are not cached.
    pub async fn get(&self, name: &str) -> DocumentStoreResult<Arc<DocumentStore<Bld::Backend>>>
    where
        Bld: FromConnectionOptions,
    {
        if let Some(store) = self.stores.read().await.get(name) {
            return Ok(Arc::clone(store));
        }

        let Some(options) = self.options.get(name) else {
            tracing::error!(name, "no connection options registered");
            return Err(DocumentStoreError::Configuration(format!(
                "no connection options registered under '{name}'"
            )));
        };

        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(name) {
            return Ok(Arc::clone(store));
        }

        let backend = Bld::from_options(options)
            .build()
            .await
            .inspect_err(|err| tracing::error!(name, error = %err, "failed to open connection"))?;
        tracing::info!(name, database = %options.database, "opened connection");

        let store = Arc::new(DocumentStore::with_settings(backend, self.settings));
        stores.insert(name.to_string(), Arc::clone(&store));

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_config_parses_toml() {
        let config = RegistryConfig::from_toml_str(
            r#"
            trace = true

            [connections.default]
            url = "mongodb://localhost:27017"
            database = "app"
            max_pool_size = 16
            max_idle_time_secs = 30

            [connections.default.credentials]
            username = "app"
            password = "secret"
            "#,
        )
        .unwrap();

        assert!(config.trace);
        assert_eq!(config.operation_timeout_secs, 5);

        let default = &config.connections["default"];
        assert_eq!(default.database, "app");
        assert_eq!(default.max_pool_size, Some(16));
        assert_eq!(default.max_idle_time(), Some(Duration::from_secs(30)));
        assert_eq!(default.credentials.as_ref().unwrap().username, "app");
    }

    #[test]
    fn registry_config_rejects_malformed_toml() {
        let err = RegistryConfig::from_toml_str("connections = 3").unwrap_err();

        assert!(matches!(err, DocumentStoreError::Configuration(_)));
    }

    #[test]
    fn settings_follow_config() {
        let config = RegistryConfig {
            trace: true,
            operation_timeout_secs: 2,
            ..RegistryConfig::default()
        };

        assert_eq!(
            config.settings(),
            StoreSettings {
                trace: TraceConfig::enabled(),
                operation_timeout: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "app".into(),
            password: "secret".into(),
            source: None,
        };

        assert!(!format!("{credentials:?}").contains("secret"));
    }
}
