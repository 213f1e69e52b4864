//! Unified error system
//!
//! This module provides:
//! - [`ErrorCode`]: Standardized error codes for all error types
//! - [`ErrorCategory`]: Classification of errors by domain
//! - [`AppError`]: Rich error type with codes, messages, and details
//! - [`ApiResponse`]: Unified caller-facing response format
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 1xxx: Cache errors
//! - 4xxx: Seckill errors
//! - 9xxx: System errors
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorCode, ApiResponse};
//!
//! let err = AppError::new(ErrorCode::OutOfStock);
//! let err = AppError::store("connection refused").with_detail("key", "seckill:stock:1");
//! let response = ApiResponse::<()>::error(&err);
//! assert_eq!(response.code, Some(9003));
//! ```

mod category;
mod codes;
mod types;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
pub use types::{ApiResponse, AppError, AppResult};
