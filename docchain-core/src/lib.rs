//! A fluent document query layer over MongoDB-style drivers.
//!
//! This crate is the core of the docchain project and provides:
//!
//! - **Marshaling** ([`marshal`]) - Turning records and raw documents into insert and update payloads
//! - **Store backend abstraction** ([`backend`]) - The driver operations a backend must provide
//! - **Query builder** ([`collection`]) - Chainable clauses that reset after every terminal operation
//! - **Decoding** ([`decode`]) - Filling caller-owned targets from result documents and cursors
//! - **Filter expressions** ([`query`]) - Query state and a typed way to build filter documents
//! - **Tracing** ([`trace`], [`context`]) - Child spans and deadlines for every operation
//! - **Document store** ([`store`]) - A backend together with the settings its builders use
//! - **Configuration** ([`config`]) - Named connections and a lazily connecting registry
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docchain::prelude::*;
//!
//! #[derive(Debug, Serialize, Deserialize, Record)]
//! pub struct Constant {
//!     #[record(id)]
//!     #[serde(rename = "_id")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     pub value: f64,
//! }
//!
//! let ctx = OpContext::background();
//! let mut constants = store.collection("constants");
//! constants.insert_one(&ctx, Constant { id: None, name: "pi".into(), value: 3.14159 }).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docchain_core;

pub mod backend;
pub mod collection;
pub mod config;
pub mod context;
pub mod decode;
pub mod error;
pub mod marshal;
pub mod query;
pub mod store;
pub mod trace;
