use crate::markets::{Markets, PriceQuery};
use crate::models::{PriceBar, Resolution};
use async_trait::async_trait;
use broker_core::error::ApiError;
use chrono::NaiveDateTime;
use moka::future::Cache;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Generic keyed store behind the caches of this crate.
#[async_trait]
pub trait KeyedStore<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V>;
    async fn put(&self, key: K, value: V);
    async fn remove(&self, key: &K);
}

/// In-memory store with bounded capacity and optional time to live.
#[derive(Clone)]
pub struct MemoryStore<K, V> {
    inner: Cache<K, V>,
}

impl<K, V> MemoryStore<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(capacity);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner: builder.build(),
        }
    }
}

#[async_trait]
impl<K, V> KeyedStore<K, V> for MemoryStore<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    async fn put(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    async fn remove(&self, key: &K) {
        self.inner.invalidate(key).await;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PriceKey {
    pub epic: String,
    pub resolution: Resolution,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl PriceKey {
    pub fn new(epic: &str, query: &PriceQuery) -> Self {
        Self {
            epic: epic.to_owned(),
            resolution: query.resolution,
            from: query.from,
            to: query.to,
        }
    }
}

pub type PriceSeries = Arc<Vec<PriceBar>>;

/// Fully drained price histories keyed by epic, resolution and window.
/// Failed or partial runs are never stored.
pub struct PriceCache<S = MemoryStore<PriceKey, PriceSeries>> {
    store: S,
}

impl PriceCache {
    pub fn in_memory(capacity: u64, ttl: Option<Duration>) -> Self {
        Self::new(MemoryStore::new(capacity, ttl))
    }
}

impl<S> PriceCache<S>
where
    S: KeyedStore<PriceKey, PriceSeries>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn prices(
        &self,
        markets: &Markets<'_>,
        epic: &str,
        query: PriceQuery,
    ) -> Result<PriceSeries, ApiError> {
        let key = PriceKey::new(epic, &query);
        if let Some(hit) = self.store.get(&key).await {
            tracing::debug!(epic, resolution = %query.resolution, "price cache hit");
            return Ok(hit);
        }
        let bars = Arc::new(markets.all_prices(epic, query).await?);
        self.store.put(key, bars.clone()).await;
        Ok(bars)
    }

    pub async fn invalidate(&self, epic: &str, query: &PriceQuery) {
        self.store.remove(&PriceKey::new(epic, query)).await;
    }
}
