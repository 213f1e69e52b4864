//! Atomic store-side scripts
//!
//! The Lua sources are what [`super::RedisStore`] sends; [`super::MemoryStore`]
//! executes the same steps natively while holding its state lock.

/// Seckill reply: stock reserved, order queued
pub const ADMITTED: i64 = 0;
/// Seckill reply: no stock left (or voucher never published)
pub const OUT_OF_STOCK: i64 = 1;
/// Seckill reply: user already admitted for this voucher
pub const DUPLICATE_ORDER: i64 = 2;

/// KEYS[1] lock key, ARGV[1] caller token.
/// Returns 1 when the key was deleted, 0 otherwise.
const UNLOCK_LUA: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
end
return 0
"#;

/// KEYS[1] stock key, KEYS[2] admitted-user set, KEYS[3] order stream.
/// ARGV[1] voucher id, ARGV[2] user id, ARGV[3] order id.
const SECKILL_LUA: &str = r#"
local stock = tonumber(redis.call('get', KEYS[1]))
if stock == nil or stock <= 0 then
    return 1
end
if redis.call('sismember', KEYS[2], ARGV[2]) == 1 then
    return 2
end
redis.call('incrby', KEYS[1], -1)
redis.call('sadd', KEYS[2], ARGV[2])
redis.call('xadd', KEYS[3], '*', 'userId', ARGV[2], 'voucherId', ARGV[1], 'id', ARGV[3])
return 0
"#;

/// Scripts the store must run indivisibly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreScript {
    /// Compare-and-delete of a lock key
    Unlock,
    /// Stock check, one-order-per-user check, reservation and enqueue
    Seckill,
}

impl StoreScript {
    pub fn name(&self) -> &'static str {
        match self {
            StoreScript::Unlock => "unlock",
            StoreScript::Seckill => "seckill",
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            StoreScript::Unlock => UNLOCK_LUA,
            StoreScript::Seckill => SECKILL_LUA,
        }
    }

    /// Number of KEYS the script expects
    pub fn key_count(&self) -> usize {
        match self {
            StoreScript::Unlock => 1,
            StoreScript::Seckill => 3,
        }
    }

    /// Number of ARGV entries the script expects
    pub fn arg_count(&self) -> usize {
        match self {
            StoreScript::Unlock => 1,
            StoreScript::Seckill => 3,
        }
    }
}
