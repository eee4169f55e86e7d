//! In-memory storage implementation for document stores.
//!
//! Collections keep their documents in insertion order, which is the order unsorted queries
//! return them in. Filters, updates, projections and pipelines use MongoDB syntax; operators
//! outside the supported subset fail with [`DocumentStoreError::Unsupported`].

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use futures::{StreamExt, stream};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};

use docchain_core::{
    backend::{
        IndexOptions, InsertManyResult, InsertOneResult, StoreBackend, StoreBackendBuilder, Update, UpdateOptions,
        UpdateResult,
    },
    config::{ConnectionOptions, FromConnectionOptions},
    decode::DocumentCursor,
    error::{DocumentStoreError, DocumentStoreResult},
    marshal::ID_KEY,
    query::Query,
};

use crate::{
    evaluator::{matches, sort_documents, values_equal},
    filter::parse_filter,
    path::get_path,
    pipeline::{aggregate, project},
    update::{apply_update, upsert_document},
};

/// Database name used when none is configured.
pub const DEFAULT_DATABASE: &str = "memory";

const ID_INDEX: &str = "_id_";

#[derive(Debug, Clone)]
struct IndexSpec {
    name: String,
    keys: Document,
    unique: bool,
    sparse: bool,
    expire_after: Option<Duration>,
}

impl IndexSpec {
    fn to_document(&self) -> Document {
        let mut document = doc! { "v": 2, "key": self.keys.clone(), "name": self.name.clone() };
        if self.unique {
            document.insert("unique", true);
        }
        if self.sparse {
            document.insert("sparse", true);
        }
        if let Some(expire_after) = self.expire_after {
            document.insert("expireAfterSeconds", expire_after.as_secs() as i64);
        }
        document
    }

    /// The indexed values of `document`, or `None` when a sparse index skips it.
    fn key_of(&self, document: &Document) -> Option<Vec<Bson>> {
        let values: Vec<_> = self.keys
            .keys()
            .map(|field| get_path(document, field).cloned())
            .collect();

        if self.sparse && values.iter().all(Option::is_none) {
            return None;
        }

        Some(values.into_iter().map(|value| value.unwrap_or(Bson::Null)).collect())
    }
}

/// Default index name: `field_direction` pairs joined by `_`, e.g. `value_-1`.
fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| {
            let direction = match direction {
                Bson::Int32(value) => value.to_string(),
                Bson::Int64(value) => value.to_string(),
                Bson::Double(value) => value.to_string(),
                Bson::String(value) => value.clone(),
                other => other.to_string(),
            };
            format!("{field}_{direction}")
        })
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Default)]
struct CollectionData {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl CollectionData {
    /// Fails when `candidate` would duplicate a unique key held by another document.
    fn check_unique(&self, collection: &str, candidate: &Document, skip: Option<usize>) -> DocumentStoreResult<()> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let Some(key) = index.key_of(candidate) else {
                continue;
            };

            let duplicate = self.documents
                .iter()
                .enumerate()
                .filter(|(position, _)| Some(*position) != skip)
                .filter_map(|(_, existing)| index.key_of(existing))
                .any(|existing| {
                    existing
                        .iter()
                        .zip(&key)
                        .all(|(a, b)| values_equal(a, b))
                });

            if duplicate {
                return Err(DocumentStoreError::DocumentAlreadyExists(
                    format!("{} {}", index.name, Bson::Array(key)),
                    collection.to_string(),
                ));
            }
        }

        Ok(())
    }

    fn insert(&mut self, collection: &str, mut document: Document) -> DocumentStoreResult<Bson> {
        let id = match document.get(ID_KEY) {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert(ID_KEY, id.clone());
                id
            }
        };

        let exists = self.documents
            .iter()
            .filter_map(|existing| existing.get(ID_KEY))
            .any(|existing| values_equal(existing, &id));
        if exists {
            return Err(DocumentStoreError::DocumentAlreadyExists(id.to_string(), collection.to_string()));
        }

        self.check_unique(collection, &document, None)?;
        self.documents.push(document);

        Ok(id)
    }

    fn select(&self, query: &Query) -> DocumentStoreResult<Vec<Document>> {
        let expr = parse_filter(&query.filter)?;

        let mut selected = Vec::new();
        for document in &self.documents {
            if matches(document, &expr)? {
                selected.push(document.clone());
            }
        }

        if !query.sort.is_empty() {
            sort_documents(&mut selected, &query.sort)?;
        }

        let skip = usize::try_from(query.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = match query.limit {
            Some(limit) if limit != 0 => usize::try_from(limit.unsigned_abs()).unwrap_or(usize::MAX),
            _ => usize::MAX,
        };

        selected
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|document| match &query.projection {
                Some(projection) => project(&document, projection),
                None => Ok(document),
            })
            .collect()
    }
}

type CollectionMap = HashMap<String, CollectionData>;

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait entirely in memory using async-aware
/// read-write locks.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection; indexes only enforce uniqueness.
///
/// # Example
///
/// ```ignore
/// use docchain_memory::InMemoryStore;
/// use docchain::store::DocumentStore;
///
/// let store = DocumentStore::new(InMemoryStore::with_database("app"));
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    database: String,
    collections: Arc<RwLock<CollectionMap>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store for the database [`DEFAULT_DATABASE`].
    pub fn new() -> Self {
        Self::with_database(DEFAULT_DATABASE)
    }

    /// Creates an empty store for the named database.
    pub fn with_database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collections: Arc::new(RwLock::new(CollectionMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Update,
        options: UpdateOptions,
        many: bool,
    ) -> DocumentStoreResult<UpdateResult> {
        let expr = parse_filter(&filter)?;
        let upsert = options.upsert.unwrap_or(false);

        let mut collections = self.collections.write().await;
        if !upsert && !collections.contains_key(collection) {
            return Ok(UpdateResult::default());
        }
        let data = collections.entry(collection.to_string()).or_default();

        let mut result = UpdateResult::default();
        for position in 0..data.documents.len() {
            if !matches(&data.documents[position], &expr)? {
                continue;
            }
            result.matched_count += 1;

            let mut updated = data.documents[position].clone();
            apply_update(&mut updated, &update)?;

            if updated.get(ID_KEY) != data.documents[position].get(ID_KEY) {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "the {ID_KEY} field of a document is immutable"
                )));
            }
            if updated != data.documents[position] {
                data.check_unique(collection, &updated, Some(position))?;
                data.documents[position] = updated;
                result.modified_count += 1;
            }

            if !many {
                break;
            }
        }

        if result.matched_count == 0 && upsert {
            let document = upsert_document(&filter, &update)?;
            result.upserted_id = Some(data.insert(collection, document)?);
        }

        Ok(result)
    }
}

fn cursor(documents: Vec<Document>) -> DocumentCursor {
    stream::iter(documents.into_iter().map(Ok)).boxed()
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<InsertOneResult> {
        let mut collections = self.collections.write().await;
        let inserted_id = collections
            .entry(collection.to_string())
            .or_default()
            .insert(collection, document)?;

        Ok(InsertOneResult { inserted_id })
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<InsertManyResult> {
        let mut collections = self.collections.write().await;
        let data = collections.entry(collection.to_string()).or_default();

        let mut inserted_ids = std::collections::BTreeMap::new();
        for (position, document) in documents.into_iter().enumerate() {
            inserted_ids.insert(position, data.insert(collection, document)?);
        }

        Ok(InsertManyResult { inserted_ids })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Update,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        self.update(collection, filter, update, options, false).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Update,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        self.update(collection, filter, update, options, true).await
    }

    async fn find_one(&self, collection: &str, query: Query) -> DocumentStoreResult<Option<Document>> {
        let collections = self.collections.read().await;
        let Some(data) = collections.get(collection) else {
            return Ok(None);
        };

        let query = Query { limit: Some(1), ..query };
        Ok(data.select(&query)?.into_iter().next())
    }

    async fn find(&self, collection: &str, query: Query) -> DocumentStoreResult<DocumentCursor> {
        let collections = self.collections.read().await;
        let documents = match collections.get(collection) {
            Some(data) => data.select(&query)?,
            None => Vec::new(),
        };

        Ok(cursor(documents))
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        let expr = parse_filter(&filter)?;
        let collections = self.collections.read().await;
        let Some(data) = collections.get(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for document in &data.documents {
            if matches(document, &expr)? {
                count += 1;
            }
        }

        Ok(count)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        let expr = parse_filter(&filter)?;
        let mut collections = self.collections.write().await;
        let Some(data) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut doomed = Vec::with_capacity(data.documents.len());
        for document in &data.documents {
            doomed.push(matches(document, &expr)?);
        }

        let before = data.documents.len();
        let mut doomed = doomed.into_iter();
        data.documents.retain(|_| !doomed.next().unwrap_or(false));

        Ok((before - data.documents.len()) as u64)
    }

    async fn drop_collection(&self, collection: &str) -> DocumentStoreResult<()> {
        if self.collections.write().await.remove(collection).is_some() {
            tracing::debug!(database = %self.database, collection, "dropped collection");
        }

        Ok(())
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> DocumentStoreResult<DocumentCursor> {
        let documents = self.collections
            .read()
            .await
            .get(collection)
            .map(|data| data.documents.clone())
            .unwrap_or_default();

        Ok(cursor(aggregate(documents, &pipeline)?))
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        options: IndexOptions,
    ) -> DocumentStoreResult<String> {
        if keys.is_empty() {
            return Err(DocumentStoreError::InvalidDocument("index keys must not be empty".to_string()));
        }

        let name = options.name.unwrap_or_else(|| default_index_name(&keys));
        let spec = IndexSpec {
            name: name.clone(),
            keys,
            unique: options.unique.unwrap_or(false),
            sparse: options.sparse.unwrap_or(false),
            expire_after: options.expire_after,
        };

        let mut collections = self.collections.write().await;
        let data = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = data.indexes.iter().find(|index| index.name == name) {
            if existing.keys == spec.keys {
                return Ok(name);
            }
            return Err(DocumentStoreError::InvalidDocument(format!(
                "an index named {name} already exists with different keys"
            )));
        }

        if spec.unique {
            let mut seen: Vec<Vec<Bson>> = Vec::new();
            for key in data.documents.iter().filter_map(|document| spec.key_of(document)) {
                if seen.iter().any(|other| other.iter().zip(&key).all(|(a, b)| values_equal(a, b))) {
                    return Err(DocumentStoreError::DocumentAlreadyExists(
                        format!("{name} {}", Bson::Array(key)),
                        collection.to_string(),
                    ));
                }
                seen.push(key);
            }
        }

        tracing::debug!(database = %self.database, collection, index = %name, "created index");
        data.indexes.push(spec);

        Ok(name)
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(data) = collections.get(collection) else {
            return Err(DocumentStoreError::CollectionNotFound(collection.to_string()));
        };

        let id_index = doc! { "v": 2, "key": { ID_KEY: 1 }, "name": ID_INDEX };

        Ok(std::iter::once(id_index)
            .chain(data.indexes.iter().map(IndexSpec::to_document))
            .collect())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        if name == ID_INDEX {
            return Err(DocumentStoreError::InvalidDocument("cannot drop the _id index".to_string()));
        }

        let mut collections = self.collections.write().await;
        let Some(data) = collections.get_mut(collection) else {
            return Err(DocumentStoreError::CollectionNotFound(collection.to_string()));
        };

        let before = data.indexes.len();
        data.indexes.retain(|index| index.name != name);
        if data.indexes.len() == before {
            return Err(DocumentStoreError::InvalidDocument(format!("index not found with name {name}")));
        }

        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docchain_memory::InMemoryStore;
/// use docchain::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().database("app").build().await?;
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryStoreBuilder {
    database: String,
}

impl Default for InMemoryStoreBuilder {
    fn default() -> Self {
        Self { database: DEFAULT_DATABASE.to_string() }
    }
}

impl InMemoryStoreBuilder {
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Always succeeds with a fresh, empty store.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::with_database(self.database))
    }
}

impl FromConnectionOptions for InMemoryStoreBuilder {
    /// Only the database name is used; there is nothing to connect to.
    fn from_options(options: &ConnectionOptions) -> Self {
        Self::default().database(options.database.clone())
    }
}
