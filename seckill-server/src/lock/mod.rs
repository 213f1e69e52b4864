//! Distributed Lock
//!
//! 基于共享 KV 的互斥锁：`SET NX PX` 加锁，脚本比对 token 后删除解锁。
//! 锁不会阻塞或重试，调用方自行决定拿不到锁时怎么办。

use crate::kv::keys::LOCK_KEY_PREFIX;
use crate::kv::{KvStore, StoreScript};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::AppResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Process-wide instance id, prefix of every holder token
static INSTANCE_ID: LazyLock<String> = LazyLock::new(|| uuid::Uuid::new_v4().simple().to_string());

static ACQUISITION_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_token() -> String {
    let seq = ACQUISITION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", *INSTANCE_ID, seq)
}

/// Named lock with a lease
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// One attempt; `true` when this handle now holds the lock
    async fn try_lock(&self, ttl: Duration) -> AppResult<bool>;

    /// Release if still held by this handle. Releasing a lock that expired
    /// or was taken over by someone else is a no-op.
    async fn unlock(&self) -> AppResult<()>;
}

/// [`DistributedLock`] over a [`KvStore`]
pub struct KvLock {
    store: Arc<dyn KvStore>,
    key: String,
    token: Mutex<Option<String>>,
}

impl KvLock {
    pub fn new(store: Arc<dyn KvStore>, name: impl AsRef<str>) -> Self {
        Self {
            store,
            key: format!("{}{}", LOCK_KEY_PREFIX, name.as_ref()),
            token: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for KvLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvLock")
            .field("key", &self.key)
            .field("held", &self.token.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl DistributedLock for KvLock {
    async fn try_lock(&self, ttl: Duration) -> AppResult<bool> {
        let token = next_token();
        let acquired = self.store.set_nx(&self.key, &token, ttl).await?;
        if acquired {
            *self.token.lock() = Some(token);
        }
        Ok(acquired)
    }

    async fn unlock(&self) -> AppResult<()> {
        // token is forgotten only after the script ran, so an interrupted
        // release can be retried
        let held = self.token.lock().clone();
        let Some(token) = held else {
            return Ok(());
        };
        let released = self
            .store
            .eval(StoreScript::Unlock, &[self.key.clone()], &[token])
            .await?;
        *self.token.lock() = None;
        if released == 0 {
            tracing::debug!(key = %self.key, "Lock already expired or taken over");
        }
        Ok(())
    }
}
