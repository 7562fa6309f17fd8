use serde::{Deserialize, Serialize};
use std::fmt;

use cashu::Amount;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WalletError {
    // Funds and proofs
    InsufficientFunds { needed: Amount, available: Amount },
    AlreadySpent(String),
    InvalidProof(String),
    ConditionUnmet(String),

    // Token handling
    DecodeError(String),
    UnsupportedUnit(String),

    // Mint communication
    MintUnavailable(String),
    MintError { code: u32, detail: String },
    InvalidResponse(String),

    // Cryptographic errors
    CryptoError(String),
    InvalidKey(String),

    // Storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Validation errors
    ValidationError(String),
    InvalidAmount(String),

    // Application errors
    NotInitialized,
    NotFound(String),

    // Generic errors
    Unknown(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::InsufficientFunds { needed, available } => write!(
                f,
                "Insufficient funds: need {} sats, have {} sats",
                needed, available
            ),
            WalletError::AlreadySpent(msg) => write!(f, "Token already spent: {}", msg),
            WalletError::InvalidProof(msg) => write!(f, "Invalid proof: {}", msg),
            WalletError::ConditionUnmet(msg) => {
                write!(f, "Spending condition not satisfied: {}", msg)
            }

            WalletError::DecodeError(msg) => write!(f, "Invalid token: {}", msg),
            // Surfaced verbatim so the caller sees the offending unit name.
            WalletError::UnsupportedUnit(unit) => {
                write!(f, "unsupported unit: {}. only 'sat' is supported", unit)
            }

            WalletError::MintUnavailable(msg) => write!(f, "Mint unavailable: {}", msg),
            WalletError::MintError { code, detail } => {
                write!(f, "Mint error {}: {}", code, detail)
            }
            WalletError::InvalidResponse(msg) => write!(f, "Invalid mint response: {}", msg),

            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            WalletError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),

            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            WalletError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            WalletError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            WalletError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),

            WalletError::NotInitialized => write!(f, "Wallet not initialized"),
            WalletError::NotFound(msg) => write!(f, "Not found: {}", msg),

            WalletError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

impl WalletError {
    /// Whether retrying the same call later can succeed without user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, WalletError::MintUnavailable(_))
    }
}

pub type WalletResult<T> = Result<T, WalletError>;

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => WalletError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                WalletError::PermissionDenied(error.to_string())
            }
            _ => WalletError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::ValidationError(format!("JSON error: {}", error))
    }
}

impl From<cashu::amount::Error> for WalletError {
    fn from(error: cashu::amount::Error) -> Self {
        WalletError::InvalidAmount(error.to_string())
    }
}

impl From<cashu::mint_url::Error> for WalletError {
    fn from(error: cashu::mint_url::Error) -> Self {
        WalletError::ValidationError(format!("Invalid mint URL: {}", error))
    }
}

impl From<cashu::nuts::nut00::Error> for WalletError {
    fn from(error: cashu::nuts::nut00::Error) -> Self {
        WalletError::InvalidProof(error.to_string())
    }
}

impl From<cashu::nuts::nut01::Error> for WalletError {
    fn from(error: cashu::nuts::nut01::Error) -> Self {
        WalletError::InvalidKey(error.to_string())
    }
}

impl From<cashu::nuts::nut11::Error> for WalletError {
    fn from(error: cashu::nuts::nut11::Error) -> Self {
        WalletError::ConditionUnmet(error.to_string())
    }
}

impl From<cashu::nuts::nut13::Error> for WalletError {
    fn from(error: cashu::nuts::nut13::Error) -> Self {
        WalletError::CryptoError(error.to_string())
    }
}

impl From<cashu::dhke::Error> for WalletError {
    fn from(error: cashu::dhke::Error) -> Self {
        WalletError::CryptoError(error.to_string())
    }
}

impl From<heed::Error> for WalletError {
    fn from(error: heed::Error) -> Self {
        WalletError::StorageError(error.to_string())
    }
}

impl From<hex::FromHexError> for WalletError {
    fn from(error: hex::FromHexError) -> Self {
        WalletError::ValidationError(format!("Invalid hex: {}", error))
    }
}
