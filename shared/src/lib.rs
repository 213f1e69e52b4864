//! Shared types for the seckill workspace
//!
//! Common types used across crates: domain models, the unified error
//! system, response structures and time utilities.

pub mod error;
pub mod models;
pub mod util;

// Re-exports
pub use error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
pub use serde::{Deserialize, Serialize};
