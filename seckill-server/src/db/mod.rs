//! Durable store
//!
//! 秒杀券与订单的持久化。队列里的订单最终都落到这里；KV 里的库存和
//! 一人一单集合只是准入层的快速判断，以这里的数据为准。

mod storage;

pub use storage::{StorageError, StorageResult, StorageStats, VoucherStorage};

use shared::AppResult;
use shared::models::{SeckillVoucher, VoucherOrder};

/// Result of an idempotent order insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOrderOutcome {
    /// Row written, durable stock decremented
    Created,
    /// An order with this id is already stored (redelivery)
    AlreadyPersisted,
    /// The user already owns an order for this voucher
    Duplicate,
    /// Durable stock is exhausted
    OutOfStock,
    /// No such voucher row
    VoucherMissing,
}

impl CreateOrderOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOrderOutcome::Created)
    }
}

/// Voucher and order persistence
///
/// Calls are synchronous and each one is its own transaction.
pub trait VoucherRepository: Send + Sync + 'static {
    fn get_voucher(&self, voucher_id: u64) -> AppResult<Option<SeckillVoucher>>;

    /// Insert or replace a voucher row
    fn save_voucher(&self, voucher: &SeckillVoucher) -> AppResult<()>;

    /// `stock = stock - 1 WHERE stock > 0`; false when nothing changed
    fn decrement_stock(&self, voucher_id: u64) -> AppResult<bool>;

    fn get_order(&self, order_id: u64) -> AppResult<Option<VoucherOrder>>;

    /// Orders a user holds for a voucher (0 or 1)
    fn count_user_orders(&self, user_id: u64, voucher_id: u64) -> AppResult<u64>;

    fn count_voucher_orders(&self, voucher_id: u64) -> AppResult<u64>;

    /// Persist an admitted order
    ///
    /// The id check, the one-per-user check, the stock decrement and the
    /// insert happen in one transaction, so replaying the same order is
    /// harmless.
    fn create_voucher_order(&self, order: &VoucherOrder) -> AppResult<CreateOrderOutcome>;
}
