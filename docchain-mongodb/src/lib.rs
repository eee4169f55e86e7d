//! MongoDB backend implementation for docchain.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters,
//! updates, sort and projection documents are handed to the driver unchanged, and driver
//! errors come back wrapped in `DocumentStoreError::Backend`.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docchain = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! The builder parses the connection string, applies pool and credential settings on top,
//! and pings the server before handing out a store. Connection establishment and server
//! selection are bounded by a 5 second timeout unless configured otherwise.
//!
//! # Example
//!
//! ```ignore
//! use docchain::{backend::StoreBackendBuilder, mongodb::MongoDbStore};
//!
//! let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!     .max_pool_size(16)
//!     .build()
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docchain_mongodb;

pub mod store;

pub use store::{DEFAULT_CONNECT_TIMEOUT, MongoDbStore, MongoDbStoreBuilder};
