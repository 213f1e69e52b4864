//! Seckill Voucher Model (秒杀券)

use serde::{Deserialize, Serialize};

/// Where a voucher's sale window stands at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleWindow {
    NotStarted,
    Active,
    Ended,
}

/// Seckill voucher row - the durable record behind `seckill:stock:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillVoucher {
    pub voucher_id: u64,
    /// Display title
    pub title: String,
    /// Remaining durable stock (never negative)
    pub stock: i32,
    /// Sale start (Unix millis)
    pub begin_time: i64,
    /// Sale end (Unix millis)
    pub end_time: i64,
}

impl SeckillVoucher {
    /// Sale window status at `now_millis`; `begin_time` inclusive, `end_time` exclusive
    pub fn window_at(&self, now_millis: i64) -> SaleWindow {
        if now_millis < self.begin_time {
            SaleWindow::NotStarted
        } else if now_millis >= self.end_time {
            SaleWindow::Ended
        } else {
            SaleWindow::Active
        }
    }
}
