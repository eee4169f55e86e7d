//! Chainable query builder bound to one collection.
//!
//! A [`Collection`] accumulates clauses (`filter`, `skip`, `limit`, `sort`, `project`) and
//! hands them to exactly one terminal operation. Every terminal operation moves the clause
//! state out before it does anything else, so the builder is empty again afterwards whether
//! the operation succeeded, failed, timed out, or was dropped mid-flight.
//!
//! Terminal operations run inside the tracing interceptor and under the store's operation
//! bound (see [`OpContext`]).
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docchain::{context::OpContext, store::DocumentStore};
//!
//! let ctx = OpContext::background();
//! let mut constants = store.collection("constants");
//!
//! constants.insert_one(&ctx, doc! { "name": "pi", "value": 3.14159 }).await?;
//!
//! let mut found: Vec<Constant> = Vec::new();
//! constants
//!     .filter(doc! { "kind": "irrational" })
//!     .sort(doc! { "value": -1 })
//!     .limit(5)
//!     .find_many(&ctx, &mut found)
//!     .await?;
//!
//! // The clauses above are gone: this counts the whole collection.
//! let total = constants.count(&ctx).await?;
//! ```
//!
//! `update_one`, `update_many`, `update_one_raw` and `upsert_many` run against whatever filter
//! is set, including none at all, in which case they apply to the whole collection. Only
//! `delete` refuses to run without a filter.

use bson::{Bson, Document, doc};
use serde::de::DeserializeOwned;
use std::{future::Future, mem};
use tracing::Span;

use crate::{
    backend::{IndexOptions, InsertManyResult, InsertOneResult, StoreBackend, Update, UpdateOptions, UpdateResult},
    context::OpContext,
    decode::{decode_many, decode_one},
    error::{DocumentStoreError, DocumentStoreResult},
    marshal::{Marshal, expect_document, expect_documents, marshal_for_insert, marshal_for_update},
    query::{Query, SortDirection},
    store::StoreSettings,
    trace::{self, SpanTags},
};

/// A query builder bound to one collection of a backend.
///
/// Obtain one per logical query from [`DocumentStore::collection`](crate::store::DocumentStore::collection).
/// Setters and terminal operations take `&mut self`, so a builder cannot be shared between
/// concurrent operations.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the store the builder was obtained from
/// * `B` - The storage backend type
#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    name: String,
    backend: &'a B,
    settings: &'a StoreSettings,
    state: Query,
}

fn tag_query(tags: &SpanTags<'_>, query: &Query, with_limit: bool) {
    tags.tag("filter", query.filter.clone())
        .tag("sort", query.sort.clone());
    if let Some(skip) = query.skip {
        match i64::try_from(skip) {
            Ok(skip) => tags.tag("skip", skip),
            Err(_) => tags.tag("skip", skip.to_string()),
        };
    }
    if let (true, Some(limit)) = (with_limit, query.limit) {
        tags.tag("limit", limit);
    }
    if let Some(projection) = &query.projection {
        tags.tag("fields", projection.clone());
    }
}

fn set_update<D: Marshal>(document: &mut D) -> DocumentStoreResult<Document> {
    Ok(doc! { "$set": expect_document(marshal_for_update(document)?)? })
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    pub(crate) fn new(name: String, backend: &'a B, settings: &'a StoreSettings) -> Self {
        Self { name, backend, settings, state: Query::default() }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name of the database this collection lives in.
    pub fn database_name(&self) -> &str {
        self.backend.database_name()
    }

    /// The clauses accumulated since the last terminal operation.
    pub fn state(&self) -> &Query {
        &self.state
    }

    /// Sets the filter document. An empty document matches everything.
    pub fn filter(&mut self, filter: Document) -> &mut Self {
        self.state.filter = filter;
        self
    }

    /// Sets the maximum number of documents `find_many` returns.
    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.state.limit = Some(limit);
        self
    }

    /// Sets the number of matching documents to skip.
    pub fn skip(&mut self, skip: u64) -> &mut Self {
        self.state.skip = Some(skip);
        self
    }

    /// Sets the sort document, e.g. `doc! { "created_at": -1 }`.
    pub fn sort(&mut self, sort: Document) -> &mut Self {
        self.state.sort = sort;
        self
    }

    /// Appends one key to the sort document.
    pub fn sort_by(&mut self, field: impl Into<String>, direction: SortDirection) -> &mut Self {
        self.state.sort.insert(field.into(), direction);
        self
    }

    /// Sets the projection document, e.g. `doc! { "name": 1 }`.
    pub fn project(&mut self, projection: Document) -> &mut Self {
        self.state.projection = Some(projection);
        self
    }

    fn take_state(&mut self) -> Query {
        mem::take(&mut self.state)
    }

    fn span(&self, ctx: &OpContext, method: &'static str, tags: impl FnOnce(&SpanTags<'_>)) -> Option<Span> {
        trace::start_span(
            &self.settings.trace,
            ctx,
            self.backend.database_name(),
            &self.name,
            method,
            tags,
        )
    }

    async fn execute<T, F>(
        &self,
        ctx: &OpContext,
        span: Option<Span>,
        method: &'static str,
        operation: F,
    ) -> DocumentStoreResult<T>
    where
        F: Future<Output = DocumentStoreResult<T>>,
    {
        tracing::debug!(collection = %self.name, method, "executing");

        let deadline = ctx.effective_deadline(self.settings.operation_timeout);
        let bounded = async {
            match tokio::time::timeout_at(deadline, operation).await {
                Ok(result) => result,
                Err(_) => Err(DocumentStoreError::Timeout(method.to_string())),
            }
        };

        let result = trace::traced(span, bounded).await;
        if let Err(err) = &result {
            tracing::debug!(collection = %self.name, method, error = %err, "operation failed");
        }

        result
    }

    /// Inserts one record, raw document, or pointer to either.
    ///
    /// Records whose identifier is unset get a generated one; raw documents without `_id` get
    /// one added in place.
    pub async fn insert_one<D: Marshal>(&mut self, ctx: &OpContext, mut document: D) -> DocumentStoreResult<InsertOneResult> {
        self.take_state();

        let document = expect_document(marshal_for_insert(&mut document)?)?;
        let span = self.span(ctx, "InsertOne", |tags| {
            tags.tag("data", document.clone());
        });

        self.execute(ctx, span, "InsertOne", self.backend.insert_one(&self.name, document))
            .await
    }

    /// Inserts a sequence (`Vec<T>`, `&mut [T]`, a BSON array) of records or documents.
    pub async fn insert_many<D: Marshal>(&mut self, ctx: &OpContext, mut documents: D) -> DocumentStoreResult<InsertManyResult> {
        self.take_state();

        let documents = expect_documents(marshal_for_insert(&mut documents)?)?;
        let span = self.span(ctx, "InsertMany", |tags| {
            tags.tag("data", documents.clone());
        });

        self.execute(ctx, span, "InsertMany", self.backend.insert_many(&self.name, documents))
            .await
    }

    /// Runs `documents` as an update pipeline against the current filter with upsert enabled.
    ///
    /// The documents are sent as-is. Set a filter first: with none, every document matches.
    pub async fn upsert_many(&mut self, ctx: &OpContext, documents: Vec<Document>) -> DocumentStoreResult<UpdateResult> {
        let query = self.take_state();

        let span = self.span(ctx, "UpsertMany", |tags| {
            tags.tag("filter", query.filter.clone())
                .tag("data", documents.clone());
        });

        self.execute(
            ctx,
            span,
            "UpsertMany",
            self.backend
                .update_many(&self.name, query.filter, Update::Pipeline(documents), UpdateOptions::upsert()),
        )
        .await
    }

    /// `$set`s the update-marshaled `document` on the first document matching the filter.
    pub async fn update_one<D: Marshal>(&mut self, ctx: &OpContext, mut document: D) -> DocumentStoreResult<UpdateResult> {
        let query = self.take_state();

        let update = set_update(&mut document)?;
        let span = self.span(ctx, "UpdateOne", |tags| {
            tags.tag("filter", query.filter.clone())
                .tag("update", update.clone());
        });

        self.execute(
            ctx,
            span,
            "UpdateOne",
            self.backend
                .update_one(&self.name, query.filter, Update::Modifiers(update), UpdateOptions::default()),
        )
        .await
    }

    /// `$set`s the update-marshaled `document` on every document matching the filter.
    pub async fn update_many<D: Marshal>(&mut self, ctx: &OpContext, mut document: D) -> DocumentStoreResult<UpdateResult> {
        let query = self.take_state();

        let update = set_update(&mut document)?;
        let span = self.span(ctx, "UpdateMany", |tags| {
            tags.tag("filter", query.filter.clone())
                .tag("update", update.clone());
        });

        self.execute(
            ctx,
            span,
            "UpdateMany",
            self.backend
                .update_many(&self.name, query.filter, Update::Modifiers(update), UpdateOptions::default()),
        )
        .await
    }

    /// Applies `update` unchanged to the first document matching the filter.
    pub async fn update_one_raw(
        &mut self,
        ctx: &OpContext,
        update: impl Into<Update>,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        let query = self.take_state();

        let update = update.into();
        let span = self.span(ctx, "UpdateOneRaw", |tags| {
            tags.tag("filter", query.filter.clone())
                .tag("update", update.clone());
        });

        self.execute(
            ctx,
            span,
            "UpdateOneRaw",
            self.backend
                .update_one(&self.name, query.filter, update, options),
        )
        .await
    }

    /// Decodes the first document matching filter, skip, sort and projection into `target`.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::NotFound`] when nothing matches; [`DocumentStoreError::ShapeMismatch`]
    /// when the document does not fit `T`. `target` is untouched on error.
    pub async fn find_one<T: DeserializeOwned>(&mut self, ctx: &OpContext, target: &mut T) -> DocumentStoreResult<()> {
        let query = Query { limit: None, ..self.take_state() };

        let span = self.span(ctx, "FindOne", |tags| tag_query(tags, &query, false));

        self.execute(ctx, span, "FindOne", async {
            let document = self.backend
                .find_one(&self.name, query)
                .await?
                .ok_or_else(|| DocumentStoreError::NotFound(self.name.clone()))?;

            decode_one(document, target)
        })
        .await
    }

    /// Replaces `target` with every document matching all clauses.
    ///
    /// `target` is untouched on error.
    pub async fn find_many<T: DeserializeOwned>(&mut self, ctx: &OpContext, target: &mut Vec<T>) -> DocumentStoreResult<()> {
        let query = self.take_state();

        let span = self.span(ctx, "FindMany", |tags| tag_query(tags, &query, true));

        self.execute(ctx, span, "FindMany", async {
            let cursor = self.backend
                .find(&self.name, query)
                .await?;

            decode_many(cursor, target).await
        })
        .await
    }

    /// Counts the documents matching the filter.
    pub async fn count(&mut self, ctx: &OpContext) -> DocumentStoreResult<u64> {
        let query = self.take_state();

        let span = self.span(ctx, "Count", |tags| {
            tags.tag("filter", query.filter.clone());
        });

        self.execute(ctx, span, "Count", self.backend.count_documents(&self.name, query.filter))
            .await
    }

    /// Deletes every document matching the filter and returns how many were removed.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::UnfilteredDelete`] when no filter is set. Nothing is deleted.
    pub async fn delete(&mut self, ctx: &OpContext) -> DocumentStoreResult<u64> {
        let query = self.take_state();

        let span = self.span(ctx, "Delete", |tags| {
            tags.tag("filter", query.filter.clone());
        });

        self.execute(ctx, span, "Delete", async {
            if query.filter.is_empty() {
                tracing::warn!(collection = %self.name, "refusing to delete without a filter");
                return Err(DocumentStoreError::UnfilteredDelete(self.name.clone()));
            }

            self.backend
                .delete_many(&self.name, query.filter)
                .await
        })
        .await
    }

    /// Drops the whole collection. Clauses are ignored.
    pub async fn drop(&mut self, ctx: &OpContext) -> DocumentStoreResult<()> {
        self.take_state();

        let span = self.span(ctx, "Drop", |_| {});

        self.execute(ctx, span, "Drop", self.backend.drop_collection(&self.name))
            .await
    }

    /// Runs an aggregation pipeline and replaces `target` with its results.
    pub async fn aggregate<T: DeserializeOwned>(
        &mut self,
        ctx: &OpContext,
        pipeline: Vec<Document>,
        target: &mut Vec<T>,
    ) -> DocumentStoreResult<()> {
        self.take_state();

        let span = self.span(ctx, "Aggregate", |tags| {
            tags.tag("pipeline", pipeline.clone());
        });

        self.execute(ctx, span, "Aggregate", async {
            let cursor = self.backend
                .aggregate(&self.name, pipeline)
                .await?;

            decode_many(cursor, target).await
        })
        .await
    }

    /// Creates an index over `keys` and returns its name.
    pub async fn create_index(
        &mut self,
        ctx: &OpContext,
        keys: Document,
        options: IndexOptions,
    ) -> DocumentStoreResult<String> {
        self.take_state();

        let span = self.span(ctx, "CreateIndex", |tags| {
            tags.tag("keys", keys.clone())
                .tag("options", options.clone());
        });

        self.execute(ctx, span, "CreateIndex", self.backend.create_index(&self.name, keys, options))
            .await
    }

    /// Lists the collection's index specifications.
    pub async fn list_indexes(&mut self, ctx: &OpContext) -> DocumentStoreResult<Vec<Document>> {
        self.take_state();

        let span = self.span(ctx, "ListIndexes", |_| {});

        self.execute(ctx, span, "ListIndexes", self.backend.list_indexes(&self.name))
            .await
    }

    /// Drops the index named `name`.
    pub async fn drop_index(&mut self, ctx: &OpContext, name: &str) -> DocumentStoreResult<()> {
        self.take_state();

        let span = self.span(ctx, "DropIndex", |tags| {
            tags.tag("index_name", Bson::String(name.to_string()));
        });

        self.execute(ctx, span, "DropIndex", self.backend.drop_index(&self.name, name))
            .await
    }
}
