use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

/// Shared handle to the vector+relational store. Cloning is cheap and the
/// underlying connection is safe for concurrent use by every component.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connect and authenticate against a running SurrealDB instance,
    /// selecting the configured namespace and database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define the base schema: scalar indexes and the unique external-id
    /// constraint on documents. Vector indexes depend on the configured
    /// embedding dimension and live in `indexes::ensure_runtime_indexes`.
    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_document_page_id ON TABLE document FIELDS notion_page_id UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_document_database ON TABLE document FIELDS notion_database_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_chunk_document ON TABLE document_chunk FIELDS document_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_metadata_document ON TABLE document_metadata FIELDS document_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_session_status ON TABLE chat_session FIELDS status")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_message_session ON TABLE chat_message FIELDS session_id")
            .await?;

        Ok(())
    }

    /// Insert one row under its own id. Returns the stored row, or `None`
    /// when the store refused the write.
    pub async fn insert<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Load a row by id; `None` when it does not exist.
    pub async fn fetch<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Load every row of a table. Intended for small tables and tests;
    /// query paths with real volume (chunks, messages) have their own
    /// scoped selects on the domain types.
    pub async fn fetch_all<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Delete a row by id, returning it when it existed. Cascading deletes
    /// (document → chunks → metadata) live on the owning types.
    pub async fn remove<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// In-memory store for tests; each test gets an isolated database.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
