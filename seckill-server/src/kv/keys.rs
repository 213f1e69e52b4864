//! Key layout of the shared store
//!
//! | Key | Type | Purpose |
//! |-----|------|---------|
//! | `cache:voucher:<id>` | string | cached voucher row |
//! | `lock:<name>` | string | lock holder token |
//! | `icr:<business>:<yyyy:MM:dd>` | string (int) | daily id sequence |
//! | `seckill:stock:<voucherId>` | string (int) | admission stock |
//! | `seckill:order:<voucherId>` | set | users already admitted |
//! | `stream.orders` | stream | admitted orders awaiting persistence |

use std::time::Duration;

/// Prefix of every lock key
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Prefix of the id worker's daily counters
pub const ID_COUNTER_PREFIX: &str = "icr:";

/// Cached voucher rows
pub const CACHE_VOUCHER_KEY: &str = "cache:voucher:";
pub const CACHE_VOUCHER_TTL: Duration = Duration::from_secs(30 * 60);

/// Admission stock counter
pub const SECKILL_STOCK_KEY: &str = "seckill:stock:";

/// Set of user ids already admitted for a voucher
pub const SECKILL_ORDER_KEY: &str = "seckill:order:";

/// Default order stream
pub const ORDER_STREAM_KEY: &str = "stream.orders";

/// Business key of order ids
pub const ORDER_ID_BUSINESS_KEY: &str = "order";

/// Per-user persistence lock name
pub fn order_lock_name(user_id: u64) -> String {
    format!("order:{}", user_id)
}

pub fn stock_key(voucher_id: u64) -> String {
    format!("{}{}", SECKILL_STOCK_KEY, voucher_id)
}

pub fn order_set_key(voucher_id: u64) -> String {
    format!("{}{}", SECKILL_ORDER_KEY, voucher_id)
}
