//! ID Generator
//!
//! 全局唯一、趋势递增的 64 位 ID：
//!
//! ```text
//! | 1 bit 符号 | 31 bit 秒级时间戳 (自 2022-01-01) | 32 bit 当日序列号 |
//! ```
//!
//! 序列号来自共享 KV 的 `INCR icr:<业务>:<yyyy:MM:dd>`，按天分桶，
//! 多实例之间不会冲突。

use crate::kv::KvStore;
use crate::kv::keys::ID_COUNTER_PREFIX;
use chrono::{DateTime, Utc};
use shared::{AppError, AppResult, ErrorCode};
use std::sync::Arc;

/// 2022-01-01T00:00:00Z
pub const BEGIN_TIMESTAMP: i64 = 1_640_995_200;

/// Width of the sequence component
pub const COUNT_BITS: u32 = 32;

/// Counter-backed id generator
#[derive(Clone)]
pub struct IdWorker {
    store: Arc<dyn KvStore>,
}

impl IdWorker {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Next id for a business key, e.g. `"order"`
    pub async fn next_id(&self, business_key: &str) -> AppResult<u64> {
        self.next_id_at(business_key, Utc::now()).await
    }

    async fn next_id_at(&self, business_key: &str, now: DateTime<Utc>) -> AppResult<u64> {
        let timestamp = now.timestamp() - BEGIN_TIMESTAMP;
        if timestamp < 0 {
            return Err(AppError::with_message(
                ErrorCode::ValueOutOfRange,
                "Clock is before the id epoch",
            ));
        }

        let key = counter_key(business_key, now);
        let seq = self.store.incr(&key).await?;
        if seq <= 0 || seq > u32::MAX as i64 {
            return Err(AppError::with_message(
                ErrorCode::ValueOutOfRange,
                format!("Daily sequence exhausted for {}", business_key),
            )
            .with_detail("key", key)
            .with_detail("seq", seq));
        }

        Ok(((timestamp as u64) << COUNT_BITS) | seq as u64)
    }

    /// Creation time of an id, in epoch millis (second precision)
    pub fn timestamp_millis(id: u64) -> i64 {
        ((id >> COUNT_BITS) as i64 + BEGIN_TIMESTAMP) * 1000
    }
}

fn counter_key(business_key: &str, now: DateTime<Utc>) -> String {
    format!("{}{}:{}", ID_COUNTER_PREFIX, business_key, now.format("%Y:%m:%d"))
}
