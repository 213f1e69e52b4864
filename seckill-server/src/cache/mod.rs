//! Cache Client
//!
//! 通用缓存查询，三种策略：
//!
//! | 方法 | 解决的问题 | 做法 |
//! |------|-----------|------|
//! | [`CacheClient::get`] | 缓存穿透 | 不存在的行写入空值哨兵，短 TTL |
//! | [`CacheClient::get_with_mutex`] | 缓存击穿 | 互斥锁，只有一个调用方回源 |
//! | [`CacheClient::get_with_logical_expiry`] | 缓存击穿 (热点) | 逻辑过期，返回旧值，后台重建 |
//!
//! Keys are `prefix + id`. Values are JSON; the logical-expiry strategy wraps
//! them in [`LogicalEntry`].

mod entry;

pub use entry::{ABSENT_SENTINEL, LogicalEntry};

use crate::kv::KvStore;
use crate::lock::{DistributedLock, KvLock};
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{AppError, AppResult, ErrorCode};
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

/// Cache client tuning
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL of the "confirmed absent" sentinel
    pub null_ttl: Duration,
    /// Lease of the rebuild mutex
    pub mutex_ttl: Duration,
    /// Sleep between mutex attempts
    pub retry_backoff: Duration,
    /// Give up waiting for the rebuild mutex after this long
    pub mutex_wait: Duration,
    /// Concurrent logical-expiry rebuilds
    pub rebuild_workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            null_ttl: Duration::from_secs(2 * 60),
            mutex_ttl: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(50),
            mutex_wait: Duration::from_secs(5),
            rebuild_workers: 10,
        }
    }
}

/// What the store holds for a key
enum Lookup<V> {
    Hit(V),
    /// Sentinel: the row does not exist
    Absent,
    Miss,
}

/// Read-through cache over the shared store
pub struct CacheClient {
    store: Arc<dyn KvStore>,
    config: CacheConfig,
    rebuild_permits: Arc<Semaphore>,
    rebuilds: TaskTracker,
}

impl CacheClient {
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self {
            rebuild_permits: Arc::new(Semaphore::new(config.rebuild_workers)),
            rebuilds: TaskTracker::new(),
            store,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ========== Writes ==========

    /// Store `value` as JSON under `prefix + id` with a store TTL
    pub async fn put<V: Serialize>(
        &self,
        prefix: &str,
        id: impl Display,
        value: &V,
        ttl: Duration,
    ) -> AppResult<()> {
        self.write_plain(&format!("{}{}", prefix, id), value, ttl).await
    }

    /// Store `value` under `prefix + id` wrapped with a logical expiry, no store TTL
    pub async fn put_with_logical_expiry<V: Serialize>(
        &self,
        prefix: &str,
        id: impl Display,
        value: V,
        ttl: Duration,
    ) -> AppResult<()> {
        write_logical(self.store.as_ref(), &format!("{}{}", prefix, id), value, ttl).await
    }

    /// Evict `prefix + id`
    pub async fn invalidate(&self, prefix: &str, id: impl Display) -> AppResult<()> {
        self.store.del(&format!("{}{}", prefix, id)).await?;
        Ok(())
    }

    // ========== Reads ==========

    /// Pass-through read that caches absence
    ///
    /// A missing row is cached as [`ABSENT_SENTINEL`] for `null_ttl`, so
    /// repeated lookups of a bogus id stop reaching the loader.
    pub async fn get<V, ID, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> AppResult<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        ID: Display,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = AppResult<Option<V>>>,
    {
        let key = format!("{}{}", prefix, id);
        match self.lookup(&key).await? {
            Lookup::Hit(v) => return Ok(Some(v)),
            Lookup::Absent => return Ok(None),
            Lookup::Miss => {}
        }
        let loaded = loader(id).await?;
        self.write_loaded(&key, loaded.as_ref(), ttl).await?;
        Ok(loaded)
    }

    /// Pass-through read where only the mutex holder rebuilds
    ///
    /// Waiters sleep `retry_backoff` and re-read until the cache is filled,
    /// the mutex frees up, or `mutex_wait` runs out
    /// ([`ErrorCode::CacheRebuildTimeout`]).
    pub async fn get_with_mutex<V, ID, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> AppResult<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        ID: Display,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = AppResult<Option<V>>>,
    {
        let key = format!("{}{}", prefix, id);
        let deadline = Instant::now() + self.config.mutex_wait;

        loop {
            match self.lookup(&key).await? {
                Lookup::Hit(v) => return Ok(Some(v)),
                Lookup::Absent => return Ok(None),
                Lookup::Miss => {}
            }

            let lock = KvLock::new(self.store.clone(), &key);
            if lock.try_lock(self.config.mutex_ttl).await? {
                let held = HeldMutex::new(lock);
                let result = self.rebuild_locked(&key, id, loader, ttl).await;
                held.release().await;
                return result;
            }

            if Instant::now() + self.config.retry_backoff > deadline {
                return Err(AppError::new(ErrorCode::CacheRebuildTimeout).with_detail("key", key));
            }
            tokio::time::sleep(self.config.retry_backoff).await;
        }
    }

    /// Hot-key read that never blocks on the loader
    ///
    /// Keys must be preloaded with [`Self::put_with_logical_expiry`]; a miss
    /// returns `None`. A stale entry is returned as is while one caller
    /// schedules a rebuild on the client's pool. When the pool is saturated
    /// the rebuild is skipped and retried by a later read.
    pub async fn get_with_logical_expiry<V, ID, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> AppResult<Option<V>>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        ID: Display + Send + 'static,
        F: FnOnce(ID) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<Option<V>>> + Send + 'static,
    {
        let key = format!("{}{}", prefix, id);
        let Some(entry) = self.lookup_logical::<V>(&key).await? else {
            return Ok(None);
        };
        if !entry.is_expired() {
            return Ok(Some(entry.data));
        }

        let lock = KvLock::new(self.store.clone(), &key);
        if !lock.try_lock(self.config.mutex_ttl).await? {
            return Ok(Some(entry.data));
        }
        let held = HeldMutex::new(lock);

        // 拿到锁后再查一次，别人可能刚重建完
        match self.lookup_logical::<V>(&key).await {
            Ok(Some(fresh)) if !fresh.is_expired() => {
                held.release().await;
                return Ok(Some(fresh.data));
            }
            Ok(None) => {
                held.release().await;
                return Ok(None);
            }
            Err(e) => {
                held.release().await;
                return Err(e);
            }
            Ok(Some(_)) => {}
        }

        let Ok(permit) = self.rebuild_permits.clone().try_acquire_owned() else {
            tracing::debug!(key = %key, "Rebuild pool saturated, serving stale entry");
            held.release().await;
            return Ok(Some(entry.data));
        };

        let store = self.store.clone();
        self.rebuilds.spawn(async move {
            let _permit = permit;
            let loaded = AssertUnwindSafe(async move { loader(id).await })
                .catch_unwind()
                .await;
            match loaded {
                Ok(Ok(Some(value))) => {
                    if let Err(e) = write_logical(store.as_ref(), &key, value, ttl).await {
                        tracing::warn!(key = %key, error = %e, "Cache rebuild write failed");
                    }
                }
                Ok(Ok(None)) => {
                    if let Err(e) = store.del(&key).await {
                        tracing::warn!(key = %key, error = %e, "Cache eviction failed");
                    }
                }
                Ok(Err(e)) => tracing::warn!(key = %key, error = %e, "Cache rebuild loader failed"),
                Err(_) => tracing::error!(key = %key, "Cache rebuild loader panicked"),
            }
            held.release().await;
        });

        Ok(Some(entry.data))
    }

    /// Wait for in-flight rebuilds
    pub async fn shutdown(&self) {
        self.rebuilds.close();
        self.rebuilds.wait().await;
        self.rebuilds.reopen();
    }

    // ========== Internals ==========

    async fn lookup<V: DeserializeOwned>(&self, key: &str) -> AppResult<Lookup<V>> {
        match self.store.get(key).await? {
            None => Ok(Lookup::Miss),
            Some(raw) if raw == ABSENT_SENTINEL => Ok(Lookup::Absent),
            Some(raw) => Ok(Lookup::Hit(decode(key, &raw)?)),
        }
    }

    async fn lookup_logical<V: DeserializeOwned>(&self, key: &str) -> AppResult<Option<LogicalEntry<V>>> {
        match self.store.get(key).await? {
            None => Ok(None),
            Some(raw) if raw == ABSENT_SENTINEL => Ok(None),
            Some(raw) => Ok(Some(decode(key, &raw)?)),
        }
    }

    /// Mutex held: double-check, then load and fill
    async fn rebuild_locked<V, ID, F, Fut>(
        &self,
        key: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> AppResult<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = AppResult<Option<V>>>,
    {
        match self.lookup(key).await? {
            Lookup::Hit(v) => return Ok(Some(v)),
            Lookup::Absent => return Ok(None),
            Lookup::Miss => {}
        }
        let loaded = loader(id).await?;
        self.write_loaded(key, loaded.as_ref(), ttl).await?;
        Ok(loaded)
    }

    async fn write_plain<V: Serialize>(&self, key: &str, value: &V, ttl: Duration) -> AppResult<()> {
        let json = serde_json::to_string(value)?;
        self.store.set(key, &json, Some(ttl)).await?;
        Ok(())
    }

    async fn write_loaded<V: Serialize>(&self, key: &str, value: Option<&V>, ttl: Duration) -> AppResult<()> {
        match value {
            Some(v) => self.write_plain(key, v, ttl).await,
            None => {
                self.store
                    .set(key, ABSENT_SENTINEL, Some(self.config.null_ttl))
                    .await?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("config", &self.config)
            .field("rebuilds_in_flight", &self.rebuilds.len())
            .finish()
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> AppResult<T> {
    serde_json::from_str(raw).map_err(|e| {
        AppError::with_message(ErrorCode::CacheDecodeFailed, e.to_string()).with_detail("key", key)
    })
}

async fn write_logical<V: Serialize>(store: &dyn KvStore, key: &str, value: V, ttl: Duration) -> AppResult<()> {
    let json = serde_json::to_string(&LogicalEntry::new(value, ttl))?;
    store.set(key, &json, None).await?;
    Ok(())
}

async fn release(lock: &KvLock) {
    if let Err(e) = lock.unlock().await {
        tracing::warn!(key = %lock.key(), error = %e, "Failed to release cache mutex");
    }
}

/// Rebuild mutex held by this client
///
/// Dropped without [`HeldMutex::release`] (caller cancelled, loader
/// panicked), it hands the release to the runtime instead of leaving the
/// key locked until its lease runs out.
struct HeldMutex {
    lock: Option<KvLock>,
}

impl HeldMutex {
    fn new(lock: KvLock) -> Self {
        Self { lock: Some(lock) }
    }

    async fn release(mut self) {
        if let Some(lock) = &self.lock {
            release(lock).await;
        }
        self.lock = None;
    }
}

impl Drop for HeldMutex {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { release(&lock).await });
            }
            Err(_) => {
                tracing::warn!(key = %lock.key(), "No runtime to release cache mutex, leaving it to expire");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PREFIX: &str = "cache:shop:";

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Shop {
        id: u64,
        name: String,
    }

    fn shop(id: u64) -> Shop {
        Shop {
            id,
            name: format!("shop-{}", id),
        }
    }

    fn client_with(config: CacheConfig) -> (Arc<MemoryStore>, CacheClient) {
        let store = Arc::new(MemoryStore::new());
        let client = CacheClient::new(store.clone(), config);
        (store, client)
    }

    fn client() -> (Arc<MemoryStore>, CacheClient) {
        client_with(CacheConfig::default())
    }

    type ShopFuture = std::pin::Pin<Box<dyn Future<Output = AppResult<Option<Shop>>> + Send>>;

    /// Loader that counts calls and finds ids below 100
    fn counting_loader(calls: &Arc<AtomicUsize>, delay: Duration) -> impl FnOnce(u64) -> ShopFuture + Send + 'static {
        let calls = calls.clone();
        move |id: u64| -> ShopFuture {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok((id < 100).then(|| shop(id)))
            })
        }
    }

    #[tokio::test]
    async fn test_get_loads_once_then_hits() {
        let (_, client) = client();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = client
            .get(PREFIX, 1u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();
        let second = client
            .get(PREFIX, 1u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(first, Some(shop(1)));
        assert_eq!(second, Some(shop(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_reloads_after_ttl() {
        let (_, client) = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_millis(30);

        client.get(PREFIX, 2u64, counting_loader(&calls, Duration::ZERO), ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        client.get(PREFIX, 2u64, counting_loader(&calls, Duration::ZERO), ttl).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_caches_absence() {
        let (store, client) = client_with(CacheConfig {
            null_ttl: Duration::from_millis(40),
            ..CacheConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        for _ in 0..5 {
            let found = client.get(PREFIX, 404u64, counting_loader(&calls, Duration::ZERO), ttl).await.unwrap();
            assert_eq!(found, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("cache:shop:404").await.unwrap().as_deref(), Some(ABSENT_SENTINEL));

        // sentinel expires, next read goes back to the loader
        tokio::time::sleep(Duration::from_millis(80)).await;
        client.get(PREFIX, 404u64, counting_loader(&calls, Duration::ZERO), ttl).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_propagates_loader_error_without_caching() {
        let (store, client) = client();
        let result: AppResult<Option<Shop>> = client
            .get(PREFIX, 3u64, |_| async { Err(AppError::database("down")) }, Duration::from_secs(60))
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::DatabaseError);
        assert_eq!(store.get("cache:shop:3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_an_error() {
        let (store, client) = client();
        store.set("cache:shop:4", "{not json", None).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let err = client
            .get(PREFIX, 4u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CacheDecodeFailed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_mutex_single_loader_under_concurrency() {
        let (store, client) = client();
        let client = Arc::new(client);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let client = client.clone();
            let loader = counting_loader(&calls, Duration::from_millis(100));
            handles.push(tokio::spawn(async move {
                client.get_with_mutex(PREFIX, 7u64, loader, Duration::from_secs(60)).await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), Some(shop(7)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // mutex released
        assert_eq!(store.get("lock:cache:shop:7").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mutex_caches_absence() {
        let (_, client) = client();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let found = client
                .get_with_mutex(PREFIX, 500u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
                .await
                .unwrap();
            assert_eq!(found, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_missing_id_loaded_once_under_concurrency() {
        let (_, client) = client();
        let client = Arc::new(client);
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let client = client.clone();
                let loader = counting_loader(&calls, Duration::from_millis(50));
                tokio::spawn(async move {
                    client.get_with_mutex(PREFIX, 999u64, loader, Duration::from_secs(60)).await
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mutex_wait_times_out() {
        let (store, client) = client_with(CacheConfig {
            retry_backoff: Duration::from_millis(10),
            mutex_wait: Duration::from_millis(100),
            ..CacheConfig::default()
        });
        let holder = KvLock::new(store.clone(), "cache:shop:8");
        assert!(holder.try_lock(Duration::from_secs(10)).await.unwrap());

        let calls = Arc::new(AtomicUsize::new(0));
        let err = client
            .get_with_mutex(PREFIX, 8u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CacheRebuildTimeout);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mutex_releases_lock_on_loader_error() {
        let (store, client) = client();
        let result: AppResult<Option<Shop>> = client
            .get_with_mutex(PREFIX, 9u64, |_| async { Err(AppError::database("down")) }, Duration::from_secs(60))
            .await;
        assert!(result.is_err());
        assert_eq!(store.get("lock:cache:shop:9").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_caller_releases_mutex() {
        let (store, client) = client_with(CacheConfig {
            retry_backoff: Duration::from_millis(10),
            mutex_wait: Duration::from_millis(500),
            ..CacheConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        // 调用方超时放弃，回源还没结束
        let slow = client.get_with_mutex(PREFIX, 10u64, counting_loader(&calls, Duration::from_secs(1)), Duration::from_secs(60));
        assert!(tokio::time::timeout(Duration::from_millis(50), slow).await.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("lock:cache:shop:10").await.unwrap(), None);

        let found = client
            .get_with_mutex(PREFIX, 10u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(found, Some(shop(10)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_put_then_get_hits_same_key() {
        let (store, client) = client();
        client.put(PREFIX, 6u64, &shop(6), Duration::from_secs(60)).await.unwrap();
        assert!(store.get("cache:shop:6").await.unwrap().is_some());

        let calls = Arc::new(AtomicUsize::new(0));
        let found = client
            .get(PREFIX, 6u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(found, Some(shop(6)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_logical_miss_returns_none_without_loading() {
        let (_, client) = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let found = client
            .get_with_logical_expiry(PREFIX, 1u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(found, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_logical_fresh_entry_served_directly() {
        let (_, client) = client();
        client
            .put_with_logical_expiry(PREFIX, 1u64, shop(1), Duration::from_secs(60))
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let found = client
            .get_with_logical_expiry(PREFIX, 1u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(found, Some(shop(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_logical_stale_entry_rebuilt_in_background() {
        let (store, client) = client();
        let stale = Shop {
            id: 1,
            name: "old".into(),
        };
        client
            .put_with_logical_expiry(PREFIX, 1u64, stale.clone(), Duration::ZERO)
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let served = client
            .get_with_logical_expiry(PREFIX, 1u64, counting_loader(&calls, Duration::from_millis(20)), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(served, Some(stale));

        client.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("lock:cache:shop:1").await.unwrap(), None);

        let fresh = client
            .get_with_logical_expiry(PREFIX, 1u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(fresh, Some(shop(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logical_rebuild_skipped_when_pool_saturated() {
        let (store, client) = client_with(CacheConfig {
            rebuild_workers: 0,
            ..CacheConfig::default()
        });
        client
            .put_with_logical_expiry(PREFIX, 2u64, shop(2), Duration::ZERO)
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let served = client
            .get_with_logical_expiry(PREFIX, 2u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(served, Some(shop(2)));

        client.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get("lock:cache:shop:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_panicking_rebuild_releases_mutex() {
        let (store, client) = client();
        client
            .put_with_logical_expiry(PREFIX, 3u64, shop(3), Duration::ZERO)
            .await
            .unwrap();

        let exploding = |id: u64| -> ShopFuture {
            Box::pin(async move {
                if id > 0 {
                    panic!("loader exploded");
                }
                let none: AppResult<Option<Shop>> = Ok(None);
                none
            })
        };
        let served = client
            .get_with_logical_expiry(PREFIX, 3u64, exploding, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(served, Some(shop(3)));

        client.shutdown().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("lock:cache:shop:3").await.unwrap(), None);

        // 下一次读取可以重新触发重建
        let calls = Arc::new(AtomicUsize::new(0));
        client
            .get_with_logical_expiry(PREFIX, 3u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();
        client.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logical_rebuild_evicts_vanished_row() {
        let (store, client) = client();
        client
            .put_with_logical_expiry(PREFIX, 200u64, shop(200), Duration::ZERO)
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        client
            .get_with_logical_expiry(PREFIX, 200u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();
        client.shutdown().await;

        assert_eq!(store.get("cache:shop:200").await.unwrap(), None);
        let after = client
            .get_with_logical_expiry(PREFIX, 200u64, counting_loader(&calls, Duration::ZERO), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(after, None);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let (_, client) = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);
        client.get(PREFIX, 5u64, counting_loader(&calls, Duration::ZERO), ttl).await.unwrap();
        client.invalidate(PREFIX, 5u64).await.unwrap();
        client.get(PREFIX, 5u64, counting_loader(&calls, Duration::ZERO), ttl).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
