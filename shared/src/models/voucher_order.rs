//! Voucher Order Model

use serde::{Deserialize, Serialize};

/// A granted seckill order
///
/// Produced by the admission step, carried through the order stream and
/// finally persisted by the order consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherOrder {
    /// Order id issued by the id worker
    pub id: u64,
    pub voucher_id: u64,
    pub user_id: u64,
    /// Creation time (Unix millis)
    pub created_at: i64,
}
