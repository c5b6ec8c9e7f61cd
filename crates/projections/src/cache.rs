//! Read-through / write-through cache in front of the read model store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::Result;
use crate::read_model::{AnalyticsPeriod, ListOrders, OrderAnalytics, OrderReadModel, ReadModelStore};

/// How long a cached record stays valid.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Cache key for an order.
pub fn cache_key(id: &AggregateId) -> String {
    format!("order:{id}")
}

/// A TTL cache of read-model records.
#[async_trait]
pub trait ReadModelCache: Send + Sync {
    async fn get(&self, id: &AggregateId) -> Result<Option<OrderReadModel>>;

    async fn set(&self, record: &OrderReadModel) -> Result<()>;

    async fn invalidate(&self, id: &AggregateId) -> Result<()>;

    /// Drops every cached order.
    async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl<T: ReadModelCache + ?Sized> ReadModelCache for Arc<T> {
    async fn get(&self, id: &AggregateId) -> Result<Option<OrderReadModel>> {
        (**self).get(id).await
    }

    async fn set(&self, record: &OrderReadModel) -> Result<()> {
        (**self).set(record).await
    }

    async fn invalidate(&self, id: &AggregateId) -> Result<()> {
        (**self).invalidate(id).await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }
}

/// Process-local cache. Expired entries are dropped on read.
#[derive(Clone)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, (OrderReadModel, Instant)>>>,
    ttl: Duration,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

#[async_trait]
impl ReadModelCache for InMemoryCache {
    async fn get(&self, id: &AggregateId) -> Result<Option<OrderReadModel>> {
        let key = cache_key(id);
        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some((record, expires_at)) if *expires_at > Instant::now() => {
                    return Ok(Some(record.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.entries.write().await.remove(&key);
        Ok(None)
    }

    async fn set(&self, record: &OrderReadModel) -> Result<()> {
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .write()
            .await
            .insert(cache_key(&record.id), (record.clone(), expires_at));
        Ok(())
    }

    async fn invalidate(&self, id: &AggregateId) -> Result<()> {
        self.entries.write().await.remove(&cache_key(id));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(feature = "redis")]
pub use self::redis_cache::RedisCache;

#[cfg(feature = "redis")]
mod redis_cache {
    use std::time::Duration;

    use async_trait::async_trait;
    use common::AggregateId;
    use redis::AsyncCommands;
    use redis::aio::ConnectionManager;

    use super::{DEFAULT_CACHE_TTL, ReadModelCache, cache_key};

    const KEY_PATTERN: &str = "order:*";
    use crate::read_model::OrderReadModel;
    use crate::{ProjectionError, Result};

    /// Redis-backed cache. Records are stored as JSON under `order:{id}`
    /// with `SET EX`.
    #[derive(Clone)]
    pub struct RedisCache {
        conn_manager: ConnectionManager,
        ttl: Duration,
    }

    impl RedisCache {
        /// Connects to `redis_url` with the default TTL.
        pub async fn connect(redis_url: &str) -> Result<Self> {
            Self::connect_with_ttl(redis_url, DEFAULT_CACHE_TTL).await
        }

        pub async fn connect_with_ttl(redis_url: &str, ttl: Duration) -> Result<Self> {
            let client = redis::Client::open(redis_url).map_err(|e| {
                ProjectionError::Cache(format!("Failed to create Redis client: {e}"))
            })?;
            let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
                ProjectionError::Cache(format!("Failed to connect to Redis: {e}"))
            })?;
            Ok(Self { conn_manager, ttl })
        }
    }

    #[async_trait]
    impl ReadModelCache for RedisCache {
        async fn get(&self, id: &AggregateId) -> Result<Option<OrderReadModel>> {
            let mut conn = self.conn_manager.clone();
            let cached: Option<String> = conn
                .get(cache_key(id))
                .await
                .map_err(|e| ProjectionError::Cache(format!("GET failed: {e}")))?;

            match cached {
                Some(json) => match serde_json::from_str(&json) {
                    Ok(record) => Ok(Some(record)),
                    Err(e) => {
                        // Stale layout from an older build; treat as a miss.
                        tracing::warn!(order_id = %id, error = %e, "Discarding unreadable cache entry");
                        Ok(None)
                    }
                },
                None => Ok(None),
            }
        }

        async fn set(&self, record: &OrderReadModel) -> Result<()> {
            let mut conn = self.conn_manager.clone();
            let json = serde_json::to_string(record)?;
            let _: () = conn
                .set_ex(cache_key(&record.id), json, self.ttl.as_secs())
                .await
                .map_err(|e| ProjectionError::Cache(format!("SET failed: {e}")))?;
            Ok(())
        }

        async fn invalidate(&self, id: &AggregateId) -> Result<()> {
            let mut conn = self.conn_manager.clone();
            let _: () = conn
                .del(cache_key(id))
                .await
                .map_err(|e| ProjectionError::Cache(format!("DEL failed: {e}")))?;
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            let mut conn = self.conn_manager.clone();
            let mut cursor: u64 = 0;
            let mut removed = 0usize;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(KEY_PATTERN)
                    .arg("COUNT")
                    .arg(500)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| ProjectionError::Cache(format!("SCAN failed: {e}")))?;

                if !keys.is_empty() {
                    removed += keys.len();
                    let _: () = conn
                        .del(keys)
                        .await
                        .map_err(|e| ProjectionError::Cache(format!("DEL failed: {e}")))?;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            tracing::debug!(removed, "Cleared cached orders");
            Ok(())
        }
    }
}

/// A read model store fronted by a cache.
///
/// Reads of a single order try the cache first and fill it on a miss.
/// Writes go to the store, then to the cache. Cache failures are logged and
/// never fail the operation; the store stays the source of truth.
#[derive(Clone)]
pub struct CachedReadModel<S, C> {
    store: S,
    cache: C,
}

impl<S, C> CachedReadModel<S, C>
where
    S: ReadModelStore,
    C: ReadModelCache,
{
    pub fn new(store: S, cache: C) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    async fn refresh(&self, record: &OrderReadModel) {
        if let Err(e) = self.cache.set(record).await {
            tracing::warn!(order_id = %record.id, error = %e, "Cache write failed, invalidating");
            if let Err(e) = self.cache.invalidate(&record.id).await {
                tracing::error!(order_id = %record.id, error = %e, "Cache invalidation failed");
            }
        }
    }
}

#[async_trait]
impl<S, C> ReadModelStore for CachedReadModel<S, C>
where
    S: ReadModelStore,
    C: ReadModelCache,
{
    async fn get(&self, id: &AggregateId) -> Result<Option<OrderReadModel>> {
        match self.cache.get(id).await {
            Ok(Some(record)) => {
                metrics::counter!("read_model_cache_hits_total").increment(1);
                return Ok(Some(record));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(order_id = %id, error = %e, "Cache read failed"),
        }
        metrics::counter!("read_model_cache_misses_total").increment(1);

        let record = self.store.get(id).await?;
        if let Some(record) = &record {
            self.refresh(record).await;
        }
        Ok(record)
    }

    async fn upsert(&self, record: &OrderReadModel) -> Result<bool> {
        let applied = self.store.upsert(record).await?;
        if applied {
            self.refresh(record).await;
        }
        Ok(applied)
    }

    async fn delete(&self, id: &AggregateId) -> Result<bool> {
        let deleted = self.store.delete(id).await?;
        if let Err(e) = self.cache.invalidate(id).await {
            tracing::warn!(order_id = %id, error = %e, "Cache invalidation failed");
        }
        Ok(deleted)
    }

    async fn list(&self, query: &ListOrders) -> Result<Vec<OrderReadModel>> {
        self.store.list(query).await
    }

    async fn analytics(&self, period: AnalyticsPeriod) -> Result<OrderAnalytics> {
        self.store.analytics(period).await
    }

    /// Clears the store, then the cache. A cache that cannot be cleared
    /// fails the call, since its stale entries would shadow a rebuild.
    async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        self.cache.clear().await
    }
}
