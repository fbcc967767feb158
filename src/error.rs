use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TradingError>;

/// Error codes for categorizing errors
///
/// The engine itself never inspects these; they exist so the API layer can
/// map core failures onto response codes without string-matching messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ErrorCode {
    // Authorization errors (2xxx)
    #[serde(rename = "AUTHZ_2002")]
    ResourceAccessDenied,

    // Validation errors (3xxx)
    #[serde(rename = "VAL_3001")]
    InvalidInput,

    // Resource errors (4xxx)
    #[serde(rename = "RES_4001")]
    NotFound,
    #[serde(rename = "RES_4003")]
    Conflict,

    // Business logic errors (5xxx)
    #[serde(rename = "BIZ_5001")]
    InsufficientBalance,
    #[serde(rename = "BIZ_5003")]
    TradingNotAllowed,

    // Internal errors (9xxx)
    #[serde(rename = "INT_9999")]
    InternalServerError,
}

impl ErrorCode {
    /// Get numeric code
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::ResourceAccessDenied => 2002,
            ErrorCode::InvalidInput => 3001,
            ErrorCode::NotFound => 4001,
            ErrorCode::Conflict => 4003,
            ErrorCode::InsufficientBalance => 5001,
            ErrorCode::TradingNotAllowed => 5003,
            ErrorCode::InternalServerError => 9999,
        }
    }
}

/// Typed failures surfaced by the trading core.
///
/// Validation and authorization failures propagate to the caller untouched;
/// collaborator outages (ledger mirror, price oracle) are recovered locally
/// and never appear here.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TradingError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TradingError::NotFound(_) => ErrorCode::NotFound,
            TradingError::InvalidState(_) => ErrorCode::TradingNotAllowed,
            TradingError::InvalidInput(_) => ErrorCode::InvalidInput,
            TradingError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            TradingError::Unauthorized(_) => ErrorCode::ResourceAccessDenied,
            TradingError::Conflict(_) => ErrorCode::Conflict,
            TradingError::Internal(_) => ErrorCode::InternalServerError,
        }
    }
}
