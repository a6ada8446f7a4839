//! Key-value storage for instructions, links and generated pages.
//!
//! Everything pagewright persists is a flat string value under a key of the
//! form `content:<id>:<field>`. The store is the only authority for content;
//! nothing is kept in memory between requests.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use redis::AsyncCommands;
use thiserror::Error;

/// The per-identifier fields kept in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The natural-language instruction.
    Prompt,
    /// Identifier of the instruction this one was derived from.
    Previous,
    /// The generated HTML page.
    Source,
    /// When the page was generated (RFC 3339).
    Timestamp,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Prompt => "prompt",
            Field::Previous => "previous",
            Field::Source => "source",
            Field::Timestamp => "timestamp",
        }
    }
}

/// A `content:<id>:<field>` key.
#[derive(Debug, Clone, Copy)]
pub struct ContentKey<'a> {
    pub id: &'a str,
    pub field: Field,
}

impl<'a> ContentKey<'a> {
    pub fn new(id: &'a str, field: Field) -> Self {
        Self { id, field }
    }
}

impl fmt::Display for ContentKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "content:{}:{}", self.id, self.field.as_str())
    }
}

/// Exact-match string key-value storage.
#[allow(async_fn_in_trait)]
pub trait Store {
    /// Read a value, `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Write several values at once. Either every entry is stored or none is.
    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), StoreError>;

    /// Read one field of a content identifier.
    async fn get_field(&self, id: &str, field: Field) -> Result<Option<String>, StoreError> {
        self.get(&ContentKey::new(id, field).to_string()).await
    }

    /// Write one field of a content identifier.
    async fn set_field(&self, id: &str, field: Field, value: &str) -> Result<(), StoreError> {
        self.set(&ContentKey::new(id, field).to_string(), value).await
    }
}

impl<S: Store> Store for &S {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
        (**self).set_many(entries).await
    }
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store internal error: {0}")]
    Internal(String),
}

/// In-memory implementation for development and testing.
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Remove a key, returning whether it was present.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut values = self
            .values
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(values.remove(key).is_some())
    }

    /// Number of stored keys.
    pub fn len(&self) -> Result<usize, StoreError> {
        let values = self
            .values
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(values.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self
            .values
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self
            .values
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
        let mut values = self
            .values
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        values.extend(entries.iter().cloned());
        Ok(())
    }
}

/// Redis implementation for durable storage.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Create a Redis store from a connection URL.
    ///
    /// No connection is made until the first request.
    pub fn new(connection_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        // MSET is atomic: readers never observe a partial write.
        let mut conn = self.connection().await?;
        conn.mset::<_, _, ()>(entries)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

/// The store selected by configuration.
pub enum StoreBackend {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl Store for StoreBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            StoreBackend::Memory(store) => store.get(key).await,
            StoreBackend::Redis(store) => store.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => store.set(key, value).await,
            StoreBackend::Redis(store) => store.set(key, value).await,
        }
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => store.set_many(entries).await,
            StoreBackend::Redis(store) => store.set_many(entries).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_key_layout() {
        assert_eq!(
            ContentKey::new("abc", Field::Prompt).to_string(),
            "content:abc:prompt"
        );
        assert_eq!(
            ContentKey::new("abc", Field::Previous).to_string(),
            "content:abc:previous"
        );
        assert_eq!(
            ContentKey::new("abc", Field::Source).to_string(),
            "content:abc:source"
        );
        assert_eq!(
            ContentKey::new("abc", Field::Timestamp).to_string(),
            "content:abc:timestamp"
        );
    }

    #[tokio::test]
    async fn test_memory_store_fields() {
        let store = MemoryStore::new();
        assert_eq!(store.get_field("x", Field::Prompt).await.unwrap(), None);

        store.set_field("x", Field::Prompt, "hello").await.unwrap();
        assert_eq!(
            store.get("content:x:prompt").await.unwrap().as_deref(),
            Some("hello")
        );

        assert!(store.remove("content:x:prompt").unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_set_many() {
        let store = MemoryStore::new();
        store
            .set_many(&[
                ("content:x:source".to_string(), "<p>x</p>".to_string()),
                ("content:x:timestamp".to_string(), "t".to_string()),
            ])
            .await
            .unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(
            store.get_field("x", Field::Timestamp).await.unwrap().as_deref(),
            Some("t")
        );
    }

    #[test]
    fn test_memory_store_reports_poisoned_lock() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.values.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(matches!(store.len(), Err(StoreError::Internal(_))));
        assert!(matches!(store.is_empty(), Err(StoreError::Internal(_))));
    }

    #[test]
    fn test_redis_store_rejects_bad_url() {
        assert!(matches!(
            RedisStore::new("not a url"),
            Err(StoreError::Connection(_))
        ));
    }
}
