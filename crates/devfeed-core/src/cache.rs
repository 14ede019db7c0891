//! Read-through cache for scores and feed pages.
//!
//! Values are stored as JSON strings under typed [`CacheKey`]s with a
//! per-kind TTL. Keys tied to an entity register themselves in an
//! invalidation group (`item:{id}` or `user:{id}`), so a mutation can drop
//! everything derived from that entity without pattern scans.
//!
//! A failing backend never fails a read: errors are logged and the value is
//! computed from the store instead.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),

    #[error("cache value could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key/value backend with TTLs and invalidation groups.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` for `ttl` and add `key` to each of `groups`.
    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        groups: &[String],
    ) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Drop every key registered in `group`. Returns how many were removed.
    async fn delete_group(&self, group: &str) -> Result<usize, CacheError>;
}

/// Cached values, by what they are derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Score {
        item_id: String,
    },
    PersonalFeed {
        user_id: String,
        page: u32,
        page_size: u32,
    },
    GenericFeed {
        page: u32,
        page_size: u32,
    },
    FilteredFeed {
        filter_hash: String,
        page: u32,
        page_size: u32,
    },
}

impl CacheKey {
    pub fn storage_key(&self) -> String {
        match self {
            CacheKey::Score { item_id } => format!("item:{}:score", item_id),
            CacheKey::PersonalFeed {
                user_id,
                page,
                page_size,
            } => format!("feed:user:{}:p{}:s{}", user_id, page, page_size),
            CacheKey::GenericFeed { page, page_size } => {
                format!("feed:generic:p{}:s{}", page, page_size)
            }
            CacheKey::FilteredFeed {
                filter_hash,
                page,
                page_size,
            } => format!("feed:filtered:{}:p{}:s{}", filter_hash, page, page_size),
        }
    }

    /// Invalidation groups this key belongs to.
    pub fn groups(&self) -> Vec<String> {
        match self {
            CacheKey::Score { item_id } => vec![Entity::Item(item_id.clone()).group()],
            CacheKey::PersonalFeed { user_id, .. } => vec![Entity::User(user_id.clone()).group()],
            CacheKey::GenericFeed { .. } | CacheKey::FilteredFeed { .. } => Vec::new(),
        }
    }

    pub fn is_feed(&self) -> bool {
        !matches!(self, CacheKey::Score { .. })
    }
}

/// Something whose change makes derived cache entries stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entity {
    Item(String),
    User(String),
}

impl Entity {
    pub fn group(&self) -> String {
        match self {
            Entity::Item(id) => format!("item:{}", id),
            Entity::User(id) => format!("user:{}", id),
        }
    }
}

/// TTLs per value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub feed: Duration,
    pub score: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            feed: Duration::from_secs(300),
            score: Duration::from_secs(900),
        }
    }
}

/// Typed front end over a [`CacheBackend`].
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    ttls: CacheTtls,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttls: CacheTtls) -> Self {
        Self { backend, ttls }
    }

    /// In-process cache with default TTLs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()), CacheTtls::default())
    }

    pub fn ttl_for(&self, key: &CacheKey) -> Duration {
        if key.is_feed() {
            self.ttls.feed
        } else {
            self.ttls.score
        }
    }

    /// Return the cached value for `key`, or compute, store, and return it.
    ///
    /// Errors from `compute` propagate and nothing is cached. Backend and
    /// decoding errors are logged and treated as a miss.
    pub async fn get_cached<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let storage_key = key.storage_key();

        match self.backend.get(&storage_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    debug!(key = %storage_key, "cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key = %storage_key, error = %e, "discarding undecodable cache entry")
                }
            },
            Ok(None) => debug!(key = %storage_key, "cache miss"),
            Err(e) => {
                warn!(key = %storage_key, error = %e, "cache read failed, computing directly")
            }
        }

        let value = compute().await?;

        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = self
                    .backend
                    .set(&storage_key, raw, ttl, &key.groups())
                    .await
                {
                    warn!(key = %storage_key, error = %e, "cache write failed");
                }
            }
            Err(e) => warn!(key = %storage_key, error = %e, "cache value not serializable"),
        }

        Ok(value)
    }

    /// Drop specific keys.
    pub async fn invalidate(&self, keys: &[CacheKey]) {
        for key in keys {
            let storage_key = key.storage_key();
            if let Err(e) = self.backend.delete(&storage_key).await {
                warn!(key = %storage_key, error = %e, "cache delete failed");
            }
        }
    }

    /// Drop every entry derived from the given entities. Returns the number
    /// of entries removed.
    pub async fn invalidate_entities(&self, entities: &[Entity]) -> usize {
        let mut removed = 0;
        for entity in entities {
            let group = entity.group();
            match self.backend.delete_group(&group).await {
                Ok(n) => removed += n,
                Err(e) => warn!(group = %group, error = %e, "cache group invalidation failed"),
            }
        }
        debug!(removed, "cache entries invalidated");
        removed
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
    groups: Vec<String>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, Entry>,
    groups: HashMap<String, HashSet<String>>,
    /// Min-heap of write deadlines. A key re-set before its deadline leaves
    /// a stale heap slot that is skipped when popped.
    expiry: BinaryHeap<Reverse<(Instant, String)>>,
}

impl MemoryInner {
    /// Remove `key` and unlink it from every group it registered in.
    fn remove(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        for group in &entry.groups {
            if let Some(keys) = self.groups.get_mut(group) {
                keys.remove(key);
                if keys.is_empty() {
                    self.groups.remove(group);
                }
            }
        }
        true
    }

    /// Drop every entry whose deadline has passed.
    fn purge_expired(&mut self, now: Instant) {
        while let Some(Reverse((deadline, _))) = self.expiry.peek() {
            if *deadline > now {
                break;
            }
            let Some(Reverse((deadline, key))) = self.expiry.pop() else {
                break;
            };
            if self
                .entries
                .get(&key)
                .is_some_and(|e| e.expires_at == deadline)
            {
                self.remove(&key);
            }
        }
    }
}

/// Hit/miss counters for [`MemoryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    /// Invalidation groups with at least one live key.
    pub groups: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Process-local backend. Expired entries are dropped when read and swept
/// on every write.
#[derive(Default)]
pub struct MemoryCache {
    inner: RwLock<MemoryInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, groups) = self
            .inner
            .read()
            .map(|i| (i.entries.len(), i.groups.len()))
            .unwrap_or((0, 0));
        CacheStats {
            entries,
            groups,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn poisoned() -> CacheError {
        CacheError::Backend("memory cache lock poisoned".into())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        {
            let inner = self.inner.read().map_err(|_| Self::poisoned())?;
            match inner.entries.get(key) {
                Some(entry) if !entry.is_expired() => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
            }
        }

        // Expired: remove under the write lock.
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        if inner.entries.get(key).is_some_and(Entry::is_expired) {
            inner.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        groups: &[String],
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = now + ttl;
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        inner.purge_expired(now);
        inner.remove(key);
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                groups: groups.to_vec(),
            },
        );
        inner.expiry.push(Reverse((expires_at, key.to_string())));
        for group in groups {
            inner
                .groups
                .entry(group.clone())
                .or_default()
                .insert(key.to_string());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        inner.remove(key);
        Ok(())
    }

    async fn delete_group(&self, group: &str) -> Result<usize, CacheError> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        let keys = inner.groups.remove(group).unwrap_or_default();
        let mut removed = 0;
        for key in keys {
            if inner.remove(&key) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set(
            &self,
            _: &str,
            _: String,
            _: Duration,
            _: &[String],
        ) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn delete_group(&self, _group: &str) -> Result<usize, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    fn score_key(id: &str) -> CacheKey {
        CacheKey::Score {
            item_id: id.to_string(),
        }
    }

    fn feed_key(user: &str, page: u32) -> CacheKey {
        CacheKey::PersonalFeed {
            user_id: user.to_string(),
            page,
            page_size: 20,
        }
    }

    #[test]
    fn test_storage_keys_and_groups() {
        assert_eq!(score_key("p1").storage_key(), "item:p1:score");
        assert_eq!(score_key("p1").groups(), vec!["item:p1".to_string()]);
        assert_eq!(feed_key("u1", 2).storage_key(), "feed:user:u1:p2:s20");
        assert_eq!(feed_key("u1", 2).groups(), vec!["user:u1".to_string()]);
        assert!(CacheKey::GenericFeed {
            page: 1,
            page_size: 20
        }
        .groups()
        .is_empty());
    }

    #[test]
    fn test_ttl_by_key_kind() {
        let cache = Cache::in_memory();
        assert_eq!(cache.ttl_for(&score_key("a")), Duration::from_secs(900));
        assert_eq!(cache.ttl_for(&feed_key("u", 1)), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_get_cached_computes_once() {
        let cache = Cache::in_memory();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let v: Result<u32, CacheError> = cache
                .get_cached(&score_key("a"), Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(v.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = Cache::in_memory();
        let key = score_key("a");
        let first: Result<u32, CacheError> = cache
            .get_cached(&key, Duration::from_secs(60), || async { Ok(1) })
            .await;
        assert_eq!(first.unwrap(), 1);

        cache.invalidate(std::slice::from_ref(&key)).await;
        let second: Result<u32, CacheError> = cache
            .get_cached(&key, Duration::from_secs(60), || async { Ok(2) })
            .await;
        assert_eq!(second.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_entity_invalidation_drops_all_user_pages() {
        let backend = Arc::new(MemoryCache::new());
        let cache = Cache::new(backend.clone(), CacheTtls::default());
        for page in 1..=3 {
            let _: Result<u32, CacheError> = cache
                .get_cached(&feed_key("u1", page), Duration::from_secs(60), || async {
                    Ok(page)
                })
                .await;
        }
        let _: Result<u32, CacheError> = cache
            .get_cached(&feed_key("u2", 1), Duration::from_secs(60), || async { Ok(9) })
            .await;

        let removed = cache
            .invalidate_entities(&[Entity::User("u1".into())])
            .await;
        assert_eq!(removed, 3);
        assert_eq!(backend.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let backend = MemoryCache::new();
        backend
            .set("k", "1".into(), Duration::from_millis(10), &[])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(backend.get("k").await.unwrap().is_none());
        assert_eq!(backend.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_writes_sweep_expired_entries_and_groups() {
        let backend = MemoryCache::new();
        for i in 0..5000 {
            let group = vec![format!("user:u{}", i)];
            backend
                .set(&format!("k{}", i), "1".into(), Duration::from_millis(1), &group)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend
            .set("fresh", "1".into(), Duration::from_secs(60), &[])
            .await
            .unwrap();

        let stats = backend.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.groups, 0);
    }

    #[tokio::test]
    async fn test_reset_key_keeps_later_deadline() {
        let backend = MemoryCache::new();
        backend
            .set("k", "old".into(), Duration::from_millis(1), &[])
            .await
            .unwrap();
        backend
            .set("k", "new".into(), Duration::from_secs(60), &[])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        backend
            .set("other", "1".into(), Duration::from_secs(60), &[])
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_delete_unlinks_key_from_group() {
        let backend = MemoryCache::new();
        let groups = vec!["item:a".to_string()];
        backend
            .set("score:a", "1".into(), Duration::from_secs(60), &groups)
            .await
            .unwrap();
        assert_eq!(backend.stats().groups, 1);

        backend.delete("score:a").await.unwrap();
        let stats = backend.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.groups, 0);
        assert_eq!(backend.delete_group("item:a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broken_backend_falls_through_to_compute() {
        let cache = Cache::new(Arc::new(BrokenBackend), CacheTtls::default());
        let v: Result<String, CacheError> = cache
            .get_cached(&score_key("a"), Duration::from_secs(60), || async {
                Ok("fresh".to_string())
            })
            .await;
        assert_eq!(v.unwrap(), "fresh");
        assert_eq!(cache.invalidate_entities(&[Entity::Item("a".into())]).await, 0);
    }

    #[tokio::test]
    async fn test_compute_errors_are_not_cached() {
        let cache = Cache::in_memory();
        let key = score_key("a");
        let failed: Result<u32, String> = cache
            .get_cached(&key, Duration::from_secs(60), || async { Err("store down".to_string()) })
            .await;
        assert!(failed.is_err());

        let ok: Result<u32, String> = cache
            .get_cached(&key, Duration::from_secs(60), || async { Ok(5) })
            .await;
        assert_eq!(ok.unwrap(), 5);
    }
}
