//! Convenient re-exports of commonly used types from docchain.
//!
//! ```ignore
//! use docchain::prelude::*;
//! ```
//!
//! This provides access to:
//! - The `Record` derive and the marshaling traits
//! - Stores, builders and backends
//! - Filter expressions and sort directions
//! - Operation contexts and tracing settings
//! - Error types
//! - `doc!`, `ObjectId` and the serde derives

pub use docchain_core::{
    backend::{IndexOptions, StoreBackend, StoreBackendBuilder, Update, UpdateOptions},
    collection::Collection,
    config::{ConnectionOptions, Credentials, Registry, RegistryConfig},
    context::OpContext,
    error::{DocumentStoreError, DocumentStoreResult},
    marshal::{Marshal, Record},
    query::{Expr, Filter, SortDirection},
    store::{DocumentStore, StoreSettings},
    trace::TraceConfig,
};
pub use docchain_macros::Record;

pub use bson::{Bson, Document, doc, oid::ObjectId};
pub use serde::{Deserialize, Serialize};
