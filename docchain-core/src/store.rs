//! Main document store interface.
//!
//! A [`DocumentStore`] owns one connected backend together with the settings its query
//! builders run under. Stores are cheap to share behind an [`Arc`](std::sync::Arc) and hand out
//! one [`Collection`] builder per logical query.
//!
//! # Example
//!
//! ```ignore
//! use docchain::store::{DocumentStore, StoreSettings};
//! use docchain::trace::TraceConfig;
//!
//! let store = DocumentStore::with_settings(backend, StoreSettings {
//!     trace: TraceConfig::enabled(),
//!     ..StoreSettings::default()
//! });
//! let count = store.collection("constants").count(&ctx).await?;
//! ```

use std::time::Duration;

use crate::{
    backend::StoreBackend,
    collection::Collection,
    error::DocumentStoreResult,
    trace::TraceConfig,
};

/// Upper bound applied to every terminal operation unless configured otherwise.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by every builder a store hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Whether terminal operations open child spans.
    pub trace: TraceConfig,
    /// Upper bound for a single terminal operation.
    pub operation_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            trace: TraceConfig::disabled(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// A document store bound to a specific backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
    settings: StoreSettings,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a store with default settings: tracing off, 5 second operation bound.
    pub fn new(backend: B) -> Self {
        Self::with_settings(backend, StoreSettings::default())
    }

    pub fn with_settings(backend: B, settings: StoreSettings) -> Self {
        Self { backend, settings }
    }

    /// Returns a fresh query builder for the collection `name`.
    ///
    /// Builders are not meant to be shared: take a new one for each query.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, B> {
        Collection::new(name.to_string(), &self.backend, &self.settings)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn database_name(&self) -> &str {
        self.backend.database_name()
    }

    /// Shuts down the store, releasing the backend's connections.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await
    }
}
