//! In-memory document storage backend for docchain.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is meant for development,
//! tests, and small embedded deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **MongoDB syntax** - Filters, updates, projections and pipelines are plain MongoDB documents
//! - **Supported filters** - `$eq $ne $gt $gte $lt $lte $in $nin $all $exists $regex $not $and $or $nor`
//! - **Supported updates** - `$set $unset $inc`, replacement documents, `$set/$addFields/$unset` pipelines
//! - **Supported stages** - `$match $sort $skip $limit $project $set $addFields $unset $count`
//! - **Indexes** - Named indexes with unique and sparse enforcement
//!
//! # Quick Start
//!
//! ```ignore
//! use docchain::{context::OpContext, store::DocumentStore};
//! use docchain_memory::InMemoryStore;
//! use bson::doc;
//!
//! let store = DocumentStore::new(InMemoryStore::with_database("app"));
//! let ctx = OpContext::background();
//!
//! store.collection("constants").insert_one(&ctx, doc! { "name": "pi" }).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docchain_memory;

mod evaluator;
mod filter;
mod path;
mod pipeline;
mod update;
pub mod store;

pub use store::{DEFAULT_DATABASE, InMemoryStore, InMemoryStoreBuilder};
