use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use time::{Duration, OffsetDateTime};

use crate::clock::{self, Clock};
use crate::error::Error;
use crate::types::SessionId;

pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer-provided per-session persistence.
///
/// Records are JSON values keyed by opaque strings. Any TTL-capable key-value
/// store (Redis, a database table with an expiry column, ...) fits.
///
/// ```rust,ignore
/// impl SessionStore for RedisStore {
///     async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
///         let raw: Option<String> = self.conn().get(key).await?;
///         Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
///     }
///     async fn put(&self, key: &str, record: serde_json::Value, ttl: time::Duration)
///         -> Result<(), StoreError> {
///         self.conn().set_ex(key, record.to_string(), ttl.whole_seconds() as u64).await?;
///         Ok(())
///     }
///     async fn delete(&self, key: &str) -> Result<(), StoreError> {
///         self.conn().del(key).await?;
///         Ok(())
///     }
/// }
/// ```
pub trait SessionStore: Send + Sync + 'static {
    /// Look up a live record. Expired records must read as `None`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<JsonValue>, StoreError>> + Send;

    /// Insert or overwrite a record that lives for `ttl`.
    fn put(
        &self,
        key: &str,
        record: JsonValue,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a record. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Object-safe wrapper for SessionStore (needed for Arc<dyn>).
pub(crate) trait SessionStoreDyn: Send + Sync {
    fn get_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<JsonValue>, StoreError>>;

    fn put_dyn<'a>(
        &'a self,
        key: &'a str,
        record: JsonValue,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn delete_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

impl<T: SessionStore> SessionStoreDyn for T {
    fn get_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<JsonValue>, StoreError>> {
        Box::pin(self.get(key))
    }

    fn put_dyn<'a>(
        &'a self,
        key: &'a str,
        record: JsonValue,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.put(key, record, ttl))
    }

    fn delete_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.delete(key))
    }
}

/// Typed, session-scoped view over a [`SessionStore`].
///
/// Keys are laid out as `{session_id}:{slot}`.
#[derive(Clone)]
pub struct SessionRecords {
    inner: Arc<dyn SessionStoreDyn>,
}

impl SessionRecords {
    #[must_use]
    pub fn new<S: SessionStore>(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    #[must_use]
    pub fn from_arc<S: SessionStore>(store: Arc<S>) -> Self {
        Self { inner: store }
    }

    fn key(session: &SessionId, slot: &str) -> String {
        format!("{session}:{slot}")
    }

    pub(crate) async fn load<T: DeserializeOwned>(
        &self,
        session: &SessionId,
        slot: &str,
    ) -> Result<Option<T>, Error> {
        let key = Self::key(session, slot);
        let Some(raw) = self.inner.get_dyn(&key).await.map_err(Error::store)? else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // An unreadable record is treated as absent; the next write replaces it.
                tracing::warn!(key = %key, error = %e, "Discarding unreadable session record");
                Ok(None)
            }
        }
    }

    pub(crate) async fn save<T: Serialize>(
        &self,
        session: &SessionId,
        slot: &str,
        record: &T,
        ttl: Duration,
    ) -> Result<(), Error> {
        let key = Self::key(session, slot);
        let value = serde_json::to_value(record).map_err(Error::store)?;
        self.inner
            .put_dyn(&key, value, ttl)
            .await
            .map_err(Error::store)
    }

    pub(crate) async fn remove(&self, session: &SessionId, slot: &str) -> Result<(), Error> {
        let key = Self::key(session, slot);
        self.inner.delete_dyn(&key).await.map_err(Error::store)
    }
}

struct Entry {
    record: JsonValue,
    expires_at: OffsetDateTime,
}

/// In-process TTL store. Suitable for single-instance deployments and tests.
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(clock::system())
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let now = self.clock.now();
        let mut expired = false;
        let out = {
            let map = self.entries.read();
            match map.get(key) {
                Some(entry) if entry.expires_at > now => Some(entry.record.clone()),
                Some(_) => {
                    expired = true;
                    None
                }
                None => None,
            }
        };
        if expired {
            self.entries.write().remove(key);
        }
        Ok(out)
    }

    async fn put(&self, key: &str, record: JsonValue, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| format!("record lifetime out of range: {ttl}"))?;
        let mut entries = self.entries.write();
        // Abandoned sessions are never read again; sweep them here.
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(key.to_owned(), Entry { record, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}
