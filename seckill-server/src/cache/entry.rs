use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Empty payload: the row is known not to exist
pub const ABSENT_SENTINEL: &str = "";

/// Value wrapper for logical expiry
///
/// Stored without a store TTL; staleness is judged by `expire_time`
/// (epoch millis) on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalEntry<V> {
    pub data: V,
    pub expire_time: i64,
}

impl<V> LogicalEntry<V> {
    pub fn new(data: V, ttl: Duration) -> Self {
        Self {
            data,
            expire_time: shared::util::now_millis() + ttl.as_millis() as i64,
        }
    }

    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expire_time <= now_millis
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(shared::util::now_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_entry_wire_format() {
        let entry = LogicalEntry {
            data: 5u32,
            expire_time: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"data":5,"expireTime":1700000000000}"#);
        assert!(entry.is_expired_at(1_700_000_000_000));
        assert!(!entry.is_expired_at(1_699_999_999_999));
    }

    #[test]
    fn test_zero_ttl_is_immediately_stale() {
        assert!(LogicalEntry::new("x", Duration::ZERO).is_expired());
        assert!(!LogicalEntry::new("x", Duration::from_secs(60)).is_expired());
    }
}
