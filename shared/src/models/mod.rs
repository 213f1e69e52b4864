//! Data models
//!
//! Shared between the seckill server and its callers.
//! All IDs are `u64`; timestamps are Unix millis.

pub mod user;
pub mod voucher;
pub mod voucher_order;

// Re-exports
pub use user::*;
pub use voucher::*;
pub use voucher_order::*;
