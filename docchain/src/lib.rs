//! Main docchain crate providing a fluent query layer over document databases.
//!
//! This crate is the primary entry point for users of docchain. It re-exports the core
//! types and functionality from the sub-crates, the `Record` derive macro, and the
//! available storage backends.
//!
//! # Features
//!
//! - **Fluent query builder** - Chain filter, sort, skip, limit and projection clauses; every
//!   terminal operation runs them and resets the builder
//! - **Record marshaling** - Derive `Record` to control wire names, identifier generation and
//!   fields that never appear in updates
//! - **Tracing** - Optional child spans for every operation, tagged with its parameters
//! - **Named connections** - A registry that connects lazily from TOML configuration
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docchain::{prelude::*, memory::InMemoryStore};
//!
//! #[derive(Debug, Default, Serialize, Deserialize, Record)]
//! pub struct Constant {
//!     #[record(id)]
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     pub value: f64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let ctx = OpContext::background();
//!     let mut constants = store.collection("constants");
//!
//!     constants
//!         .insert_one(&ctx, Constant { name: "pi".into(), value: 3.14, ..Default::default() })
//!         .await?;
//!
//!     // Correct the value in place.
//!     constants
//!         .filter(doc! { "name": "pi" })
//!         .update_one(&ctx, doc! { "value": 3.14159 })
//!         .await?;
//!
//!     let mut pi = Constant::default();
//!     constants.filter(doc! { "name": "pi" }).find_one(&ctx, &mut pi).await?;
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Registry
//!
//! Stores can also be looked up by name from configuration. The first lookup connects, later
//! lookups share the same store.
//!
//! ```ignore
//! use docchain::{config::{Registry, RegistryConfig}, memory::InMemoryStoreBuilder};
//!
//! let config = RegistryConfig::from_toml_str(r#"
//!     trace = true
//!
//!     [connections.main]
//!     url = "memory://"
//!     database = "app"
//! "#)?;
//! let registry = Registry::<InMemoryStoreBuilder>::from_config(config);
//! let store = registry.get("main").await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docchain_core::{backend, collection, config, context, decode, error, marshal, query, store, trace};
pub use docchain_macros::Record;

// Re-exported for derived code and for convenience
pub use bson;
pub use serde;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docchain_memory::{DEFAULT_DATABASE, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docchain_mongodb::{DEFAULT_CONNECT_TIMEOUT, MongoDbStore, MongoDbStoreBuilder};
}
