//! Storage backend abstraction for the document store.
//!
//! This module defines the driver-facing seam that terminal operations delegate to once the
//! query builder has prepared their payloads. Implementations exist for MongoDB
//! (`docchain-mongodb`) and for an in-memory store (`docchain-memory`).
//!
//! # Traits
//!
//! - [`StoreBackend`]: The native operations of a document database, bound to one database
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! All filters, updates, sort and projection documents are passed through in MongoDB syntax.

use async_trait::async_trait;
use bson::{Bson, Document};
use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use crate::{decode::DocumentCursor, error::DocumentStoreResult, query::Query};

/// Acknowledgment of a single-document insert.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// The `_id` of the stored document.
    pub inserted_id: Bson,
}

/// Acknowledgment of a batch insert.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    /// The `_id` of each stored document, keyed by its position in the batch.
    pub inserted_ids: BTreeMap<usize, Bson>,
}

/// Acknowledgment of an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Number of documents that matched the filter.
    pub matched_count: u64,
    /// Number of documents that were changed.
    pub modified_count: u64,
    /// The `_id` of the inserted document when an upsert matched nothing.
    pub upserted_id: Option<Bson>,
}

/// The update to apply to matched documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// An update document using operators such as `$set` (or a replacement document).
    Modifiers(Document),
    /// An aggregation pipeline of update stages.
    Pipeline(Vec<Document>),
}

impl From<Document> for Update {
    fn from(document: Document) -> Self {
        Update::Modifiers(document)
    }
}

impl From<Vec<Document>> for Update {
    fn from(stages: Vec<Document>) -> Self {
        Update::Pipeline(stages)
    }
}

impl From<Update> for Bson {
    fn from(update: Update) -> Self {
        match update {
            Update::Modifiers(document) => Bson::Document(document),
            Update::Pipeline(stages) => Bson::Array(stages.into_iter().map(Bson::Document).collect()),
        }
    }
}

/// Options for update operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Insert a document when nothing matches the filter.
    pub upsert: Option<bool>,
}

impl UpdateOptions {
    pub fn upsert() -> Self {
        Self { upsert: Some(true) }
    }
}

/// Options for index creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    /// Index name. Derived from the keys when unset.
    pub name: Option<String>,
    /// Reject documents that duplicate an indexed value.
    pub unique: Option<bool>,
    /// Skip documents that lack the indexed field.
    pub sparse: Option<bool>,
    /// Expire documents this long after the indexed date.
    pub expire_after: Option<Duration>,
}

impl From<IndexOptions> for Bson {
    fn from(options: IndexOptions) -> Self {
        let mut document = Document::new();
        if let Some(name) = options.name {
            document.insert("name", name);
        }
        if let Some(unique) = options.unique {
            document.insert("unique", unique);
        }
        if let Some(sparse) = options.sparse {
            document.insert("sparse", sparse);
        }
        if let Some(expire_after) = options.expire_after {
            document.insert("expireAfterSeconds", expire_after.as_secs() as i64);
        }
        Bson::Document(document)
    }
}

/// Native operations of a document database bound to a single database.
///
/// # Thread Safety
///
/// Implementations must be shareable across tasks; the connection pool behind them is the only
/// shared resource of a store.
///
/// # Error Handling
///
/// Driver failures are returned as [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend)
/// wrapping the driver's own error.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Name of the database this backend operates on.
    fn database_name(&self) -> &str;

    /// Inserts one document.
    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<InsertOneResult>;

    /// Inserts a batch of documents. Partial failure semantics are the driver's.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<InsertManyResult>;

    /// Applies `update` to the first document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Update,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateResult>;

    /// Applies `update` to every document matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Update,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateResult>;

    /// Returns the first document matching the query, honouring skip, sort and projection.
    async fn find_one(&self, collection: &str, query: Query) -> DocumentStoreResult<Option<Document>>;

    /// Opens a cursor over every document matching the query.
    async fn find(&self, collection: &str, query: Query) -> DocumentStoreResult<DocumentCursor>;

    /// Counts documents matching `filter`.
    async fn count_documents(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64>;

    /// Deletes every document matching `filter` and returns how many were removed.
    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64>;

    /// Drops the collection and all its documents.
    async fn drop_collection(&self, collection: &str) -> DocumentStoreResult<()>;

    /// Runs an aggregation pipeline.
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> DocumentStoreResult<DocumentCursor>;

    /// Creates an index and returns its name.
    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        options: IndexOptions,
    ) -> DocumentStoreResult<String>;

    /// Lists the collection's index specifications.
    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<Document>>;

    /// Drops the index with the given name.
    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections should
    /// override this.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn updates_convert_from_documents_and_pipelines() {
        assert_eq!(
            Update::from(doc! { "$set": { "a": 1 } }),
            Update::Modifiers(doc! { "$set": { "a": 1 } })
        );
        assert_eq!(
            Bson::from(Update::from(vec![doc! { "$set": { "a": 1 } }])),
            Bson::Array(vec![Bson::Document(doc! { "$set": { "a": 1 } })])
        );
    }

    #[test]
    fn index_options_render_only_set_fields() {
        let options = IndexOptions {
            unique: Some(true),
            expire_after: Some(Duration::from_secs(60)),
            ..IndexOptions::default()
        };

        assert_eq!(
            Bson::from(options),
            Bson::Document(doc! { "unique": true, "expireAfterSeconds": 60_i64 })
        );
    }
}
