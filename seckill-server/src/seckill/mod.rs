//! Seckill admission pipeline
//!
//! 两段式下单：
//!
//! 1. [`VoucherOrderService::seckill_voucher`]：在共享 KV 中用一个原子脚本
//!    完成"库存 > 0 且用户未下单 → 扣库存、记录用户、写入订单流"，立即返回。
//! 2. [`OrderConsumer`]：从订单流按消费组读取，逐条落库并 ACK；失败的消息
//!    留在 pending list 中，由恢复流程重放。
//!
//! [`SeckillPipeline`] 负责消费者的启动与停止。

mod consumer;
mod pipeline;
mod service;

pub use consumer::{ConsumerConfig, OrderConsumer};
pub use pipeline::SeckillPipeline;
pub use service::VoucherOrderService;

use shared::{ApiResponse, ErrorCode};
use std::fmt;

/// Why an admission request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    VoucherNotFound,
    NotStarted,
    Ended,
    OutOfStock,
    DuplicateOrder,
}

impl RejectReason {
    pub fn code(&self) -> ErrorCode {
        match self {
            RejectReason::VoucherNotFound => ErrorCode::VoucherNotFound,
            RejectReason::NotStarted => ErrorCode::SeckillNotStarted,
            RejectReason::Ended => ErrorCode::SeckillEnded,
            RejectReason::OutOfStock => ErrorCode::OutOfStock,
            RejectReason::DuplicateOrder => ErrorCode::DuplicateOrder,
        }
    }

    /// Caller-facing message
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::VoucherNotFound => "Voucher does not exist",
            RejectReason::NotStarted => "Seckill has not started",
            RejectReason::Ended => "Seckill has ended",
            RejectReason::OutOfStock => "Out of stock",
            RejectReason::DuplicateOrder => "Each user may order this voucher only once",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Result of one admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeckillOutcome {
    /// Stock reserved and order queued; persistence follows asynchronously
    Admitted { order_id: u64 },
    Rejected(RejectReason),
}

impl SeckillOutcome {
    pub fn order_id(&self) -> Option<u64> {
        match self {
            SeckillOutcome::Admitted { order_id } => Some(*order_id),
            SeckillOutcome::Rejected(_) => None,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, SeckillOutcome::Admitted { .. })
    }
}

impl From<SeckillOutcome> for ApiResponse<u64> {
    fn from(outcome: SeckillOutcome) -> Self {
        match outcome {
            SeckillOutcome::Admitted { order_id } => ApiResponse::success(order_id),
            SeckillOutcome::Rejected(reason) => ApiResponse::fail(reason.code(), reason.message()),
        }
    }
}
