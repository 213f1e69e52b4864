//! KV Store facade
//!
//! 对共享键值存储的薄封装。所有跨进程的共享状态（库存、一人一单集合、
//! 分布式锁、序列号、订单流）都经由这里的 [`KvStore`] 访问。
//!
//! # 实现
//!
//! | 类型 | 说明 |
//! |------|------|
//! | [`RedisStore`] | 生产环境后端 (redis) |
//! | [`MemoryStore`] | 进程内后端，语义与 Redis 一致，用于测试和单机演示 |
//!
//! Scripts are a closed set ([`StoreScript`]); every backend must run each
//! one atomically.

pub mod keys;
mod memory;
mod redis_store;
mod script;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use script::{ADMITTED, DUPLICATE_ORDER, OUT_OF_STOCK, StoreScript};

use async_trait::async_trait;
use shared::AppError;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// KV store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("WRONGTYPE operation against key {0}")]
    WrongType(String),

    #[error("Value at {0} is not an integer or out of range")]
    NotInteger(String),

    #[error("NOGROUP no consumer group {group} for stream {stream}")]
    NoGroup { stream: String, group: String },

    #[error("Script {script} failed: {reason}")]
    Script { script: &'static str, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::store(e.to_string())
    }
}

/// Where a consumer-group read starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// Entries never delivered to any consumer of the group (`>`)
    New,
    /// This consumer's pending list: delivered but not acknowledged (`0`)
    Pending,
}

/// One stream entry as delivered to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Stream id (`<millis>-<seq>`)
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Shared key-value store contract
///
/// Semantics follow Redis: missing keys read as absent, TTL expiry is
/// observed by every subsequent command, scripts are indivisible.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    // ========== Strings ==========

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// SET, with an optional expiry (none = persist)
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// SET NX PX; returns whether the key was written
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// DEL; returns whether a key was removed
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// INCR; missing keys start at 0
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    // ========== Scripts ==========

    /// Run a script atomically and return its integer reply
    async fn eval(&self, script: StoreScript, keys: &[String], args: &[String]) -> StoreResult<i64>;

    // ========== Sorted sets ==========

    /// ZADD; returns whether the member is new
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// ZRANGE by rank, inclusive; negative indexes count from the end
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    // ========== Bitmaps ==========

    /// SETBIT; returns the previous bit
    async fn setbit(&self, key: &str, offset: u64, value: bool) -> StoreResult<bool>;

    async fn getbit(&self, key: &str, offset: u64) -> StoreResult<bool>;

    async fn bitcount(&self, key: &str) -> StoreResult<u64>;

    // ========== Streams ==========

    /// XGROUP CREATE ... 0 MKSTREAM; returns false when the group already exists
    async fn xgroup_create(&self, stream: &str, group: &str) -> StoreResult<bool>;

    /// XADD with an auto-generated id
    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> StoreResult<String>;

    /// XREADGROUP; `block` only applies to [`ReadFrom::New`]
    async fn xread_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
        block: Option<Duration>,
    ) -> StoreResult<Vec<StreamEntry>>;

    /// XACK; returns how many entries left the pending list
    async fn xack(&self, stream: &str, group: &str, ids: &[String]) -> StoreResult<u64>;
}
