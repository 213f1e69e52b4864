//! Unified error codes for the seckill core
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Cache errors
//! - 4xxx: Seckill / order errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Invalid format
    InvalidFormat = 6,
    /// Value out of range
    ValueOutOfRange = 8,

    // ==================== 1xxx: Cache ====================
    /// Cached payload could not be decoded
    CacheDecodeFailed = 1001,
    /// Waiting for the rebuild mutex exceeded the deadline
    CacheRebuildTimeout = 1002,

    // ==================== 4xxx: Seckill ====================
    /// Voucher does not exist
    VoucherNotFound = 4001,
    /// Seckill has not started yet
    SeckillNotStarted = 4002,
    /// Seckill has already ended
    SeckillEnded = 4003,
    /// Voucher stock exhausted
    OutOfStock = 4004,
    /// User already holds an order for this voucher
    DuplicateOrder = 4005,
    /// Queued order entry could not be decoded
    MalformedOrderEntry = 4007,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Durable store error
    DatabaseError = 9002,
    /// Shared KV store unreachable or failed
    StoreUnavailable = 9003,
    /// Serialization / deserialization failure
    SerializationError = 9004,
    /// Operation already running
    AlreadyRunning = 9005,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::ValueOutOfRange => "Value is out of range",

            // Cache
            ErrorCode::CacheDecodeFailed => "Cached value could not be decoded",
            ErrorCode::CacheRebuildTimeout => "Timed out waiting for cache rebuild",

            // Seckill
            ErrorCode::VoucherNotFound => "Voucher not found",
            ErrorCode::SeckillNotStarted => "Seckill has not started",
            ErrorCode::SeckillEnded => "Seckill has ended",
            ErrorCode::OutOfStock => "Out of stock",
            ErrorCode::DuplicateOrder => "Only one order per user is allowed",
            ErrorCode::MalformedOrderEntry => "Queued order entry is malformed",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::StoreUnavailable => "Shared store unavailable",
            ErrorCode::SerializationError => "Serialization error",
            ErrorCode::AlreadyRunning => "Already running",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),
            5 => Ok(ErrorCode::InvalidRequest),
            6 => Ok(ErrorCode::InvalidFormat),
            8 => Ok(ErrorCode::ValueOutOfRange),

            // Cache
            1001 => Ok(ErrorCode::CacheDecodeFailed),
            1002 => Ok(ErrorCode::CacheRebuildTimeout),

            // Seckill
            4001 => Ok(ErrorCode::VoucherNotFound),
            4002 => Ok(ErrorCode::SeckillNotStarted),
            4003 => Ok(ErrorCode::SeckillEnded),
            4004 => Ok(ErrorCode::OutOfStock),
            4005 => Ok(ErrorCode::DuplicateOrder),
            4007 => Ok(ErrorCode::MalformedOrderEntry),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::StoreUnavailable),
            9004 => Ok(ErrorCode::SerializationError),
            9005 => Ok(ErrorCode::AlreadyRunning),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
