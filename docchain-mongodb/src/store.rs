use async_trait::async_trait;
use bson::{Document, doc};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    options::{ClientOptions, Credential, FindOneOptions, FindOptions, IndexOptions as MongoIndexOptions},
};
use std::time::Duration;

use docchain_core::{
    backend::{
        IndexOptions, InsertManyResult, InsertOneResult, StoreBackend, StoreBackendBuilder, Update, UpdateOptions,
        UpdateResult,
    },
    config::{ConnectionOptions, Credentials, FromConnectionOptions},
    decode::DocumentCursor,
    error::{DocumentStoreError, DocumentStoreResult},
    query::Query,
};

/// Default bound for establishing a connection and selecting a server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn modifications(update: Update) -> mongodb::options::UpdateModifications {
    match update {
        Update::Modifiers(document) => document.into(),
        Update::Pipeline(stages) => stages.into(),
    }
}

fn update_result(result: mongodb::results::UpdateResult) -> UpdateResult {
    UpdateResult {
        matched_count: result.matched_count,
        modified_count: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

fn cursor(cursor: mongodb::Cursor<Document>) -> DocumentCursor {
    cursor
        .map_err(DocumentStoreError::backend)
        .boxed()
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(url: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(url, database)
    }

    /// The underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<InsertOneResult> {
        let result = self.get_collection(collection)
            .insert_one(document)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(InsertOneResult { inserted_id: result.inserted_id })
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<InsertManyResult> {
        let result = self.get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(InsertManyResult {
            inserted_ids: result.inserted_ids.into_iter().collect(),
        })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Update,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        self.get_collection(collection)
            .update_one(filter, modifications(update))
            .upsert(options.upsert.unwrap_or(false))
            .await
            .map(update_result)
            .map_err(DocumentStoreError::backend)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Update,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        self.get_collection(collection)
            .update_many(filter, modifications(update))
            .upsert(options.upsert.unwrap_or(false))
            .await
            .map(update_result)
            .map_err(DocumentStoreError::backend)
    }

    async fn find_one(&self, collection: &str, query: Query) -> DocumentStoreResult<Option<Document>> {
        let mut options = FindOneOptions::default();

        options.skip = query.skip;
        options.projection = query.projection;
        if !query.sort.is_empty() {
            options.sort = Some(query.sort);
        }

        self.get_collection(collection)
            .find_one(query.filter)
            .with_options(options)
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn find(&self, collection: &str, query: Query) -> DocumentStoreResult<DocumentCursor> {
        let mut options = FindOptions::default();

        options.limit = query.limit;
        options.skip = query.skip;
        options.projection = query.projection;
        if !query.sort.is_empty() {
            options.sort = Some(query.sort);
        }

        self.get_collection(collection)
            .find(query.filter)
            .with_options(options)
            .await
            .map(cursor)
            .map_err(DocumentStoreError::backend)
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .count_documents(filter)
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .delete_many(filter)
            .await
            .map(|result| result.deleted_count)
            .map_err(DocumentStoreError::backend)
    }

    async fn drop_collection(&self, collection: &str) -> DocumentStoreResult<()> {
        self.get_collection(collection)
            .drop()
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> DocumentStoreResult<DocumentCursor> {
        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map(cursor)
            .map_err(DocumentStoreError::backend)
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        options: IndexOptions,
    ) -> DocumentStoreResult<String> {
        let mut index_options = MongoIndexOptions::default();

        index_options.name = options.name;
        index_options.unique = options.unique;
        index_options.sparse = options.sparse;
        index_options.expire_after = options.expire_after;

        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                .keys(keys)
                .options(index_options)
                .build()
            )
            .await
            .map(|result| result.index_name)
            .map_err(DocumentStoreError::backend)
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let indexes = self.get_collection(collection)
            .list_indexes()
            .await
            .map_err(DocumentStoreError::backend)?
            .try_collect::<Vec<IndexModel>>()
            .await
            .map_err(DocumentStoreError::backend)?;

        indexes
            .iter()
            .map(|index| bson::serialize_to_document(index).map_err(DocumentStoreError::from))
            .collect()
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(collection)
            .drop_index(name)
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Connects a [`MongoDbStore`] and verifies the connection with a `ping`.
#[derive(Debug, Clone)]
pub struct MongoDbStoreBuilder {
    url: String,
    database: String,
    max_pool_size: Option<u32>,
    min_pool_size: Option<u32>,
    max_idle_time: Option<Duration>,
    credentials: Option<Credentials>,
    connect_timeout: Duration,
}

impl MongoDbStoreBuilder {
    pub fn new(url: &str, database: &str) -> Self {
        Self {
            url: url.to_string(),
            database: database.to_string(),
            max_pool_size: None,
            min_pool_size: None,
            max_idle_time: None,
            credentials: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.min_pool_size = Some(size);
        self
    }

    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = Some(idle);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Bounds connection establishment, server selection and the initial ping.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Layers the builder's settings over options parsed from the connection string.
    fn apply(&self, mut options: ClientOptions) -> ClientOptions {
        if self.max_pool_size.is_some() {
            options.max_pool_size = self.max_pool_size;
        }
        if self.min_pool_size.is_some() {
            options.min_pool_size = self.min_pool_size;
        }
        if self.max_idle_time.is_some() {
            options.max_idle_time = self.max_idle_time;
        }
        if let Some(credentials) = &self.credentials {
            let mut credential = Credential::default();
            credential.username = Some(credentials.username.clone());
            credential.password = Some(credentials.password.clone());
            credential.source = credentials.source.clone();
            options.credential = Some(credential);
        }
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.connect_timeout);

        options
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let options = ClientOptions::parse(&self.url)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;
        let client = Client::with_options(self.apply(options))
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;
        tracing::debug!(database = %self.database, "connected to mongodb");

        Ok(MongoDbStore::new(client, self.database))
    }
}

impl FromConnectionOptions for MongoDbStoreBuilder {
    fn from_options(options: &ConnectionOptions) -> Self {
        Self {
            max_pool_size: options.max_pool_size,
            min_pool_size: options.min_pool_size,
            max_idle_time: options.max_idle_time(),
            credentials: options.credentials.clone(),
            ..Self::new(&options.url, &options.database)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_options_layer_over_the_url() {
        let options = ConnectionOptions {
            max_pool_size: Some(16),
            max_idle_time_secs: Some(30),
            credentials: Some(Credentials {
                username: "app".into(),
                password: "secret".into(),
                source: Some("admin".into()),
            }),
            ..ConnectionOptions::new("mongodb://localhost:27017/?minPoolSize=2", "app")
        };
        let builder = MongoDbStoreBuilder::from_options(&options);

        let parsed = ClientOptions::parse(&options.url).await.unwrap();
        let client_options = builder.apply(parsed);

        assert_eq!(client_options.max_pool_size, Some(16));
        assert_eq!(client_options.min_pool_size, Some(2));
        assert_eq!(client_options.max_idle_time, Some(Duration::from_secs(30)));
        assert_eq!(client_options.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
        assert_eq!(client_options.server_selection_timeout, Some(DEFAULT_CONNECT_TIMEOUT));

        let credential = client_options.credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("app"));
        assert_eq!(credential.source.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn unreachable_servers_fail_initialization() {
        let err = MongoDbStore::builder("mongodb://127.0.0.1:1", "app")
            .connect_timeout(Duration::from_millis(200))
            .build()
            .await
            .unwrap_err();

        assert!(matches!(err, DocumentStoreError::Initialization(_)));
    }

    #[tokio::test]
    async fn malformed_urls_fail_initialization() {
        let err = MongoDbStore::builder("not-a-url", "app")
            .build()
            .await
            .unwrap_err();

        assert!(matches!(err, DocumentStoreError::Initialization(_)));
    }
}
