//! # Error Types for the Ark Engine
//!
//! Every construction, parsing and submission path in the engine reports
//! failures through [`ArkError`]. The variants follow the protocol's error
//! taxonomy: format errors, argument/invariant errors, insufficient funds,
//! double-spend races and operator inconsistencies.

use bitcoin::{Amount, OutPoint};
use thiserror::Error;

/// Main error type for all engine operations
#[derive(Debug, Error)]
pub enum ArkError {
    /// Malformed address, contract string, script, note or PSBT field
    #[error("Invalid {what}: {message}")]
    InvalidFormat { what: &'static str, message: String },

    /// Missing key material, inconsistent timelocks, dust/anchor budget violations
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Coin selection cannot meet the target
    #[error("Insufficient funds: required {required}, available {available} (short by {shortfall})")]
    InsufficientFunds {
        required: Amount,
        available: Amount,
        shortfall: Amount,
    },

    /// Another spend attempt currently holds the advisory lock for this outpoint
    #[error("Outpoint already locked by a concurrent spend: {outpoint}")]
    AlreadyLocked { outpoint: OutPoint },

    /// The outpoint is already spent, by the operator's account or within the same request
    #[error("Outpoint already spent: {outpoint}")]
    AlreadySpent { outpoint: OutPoint },

    /// Operator-advertised parameters failed a cross-check
    #[error("Operator protocol inconsistency: {message}")]
    ProtocolInconsistency { message: String },

    /// The wallet signer refused or failed to produce a signature
    #[error("Signing failed: {message}")]
    Signing { message: String },

    /// Transport failure reaching the operator, propagated unchanged
    #[error("Transport failure: {message}")]
    Transport { message: String },

    /// The operation was cancelled before submission
    #[error("Operation cancelled")]
    Cancelled,

    /// PSBT structure errors
    #[error("PSBT error: {source}")]
    Psbt {
        #[from]
        source: bitcoin::psbt::Error,
    },

    /// Taproot signature hash computation errors
    #[error("Sighash computation failed: {source}")]
    Sighash {
        #[from]
        source: bitcoin::sighash::TaprootError,
    },

    /// Taproot tree construction errors
    #[error("Taproot tree construction failed: {source}")]
    TaprootBuilder {
        #[from]
        source: bitcoin::taproot::TaprootBuilderError,
    },
}

/// Result type alias for engine operations
pub type ArkResult<T> = Result<T, ArkError>;

impl ArkError {
    /// Create a format error for the named kind of input
    pub fn format(what: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            what,
            message: message.into(),
        }
    }

    /// Create an argument/invariant error
    pub fn argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an operator inconsistency error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolInconsistency {
            message: message.into(),
        }
    }

    /// Create a signing error
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Build an insufficient-funds error from the target and what is available
    pub fn insufficient_funds(required: Amount, available: Amount) -> Self {
        Self::InsufficientFunds {
            required,
            available,
            shortfall: required.checked_sub(available).unwrap_or(Amount::ZERO),
        }
    }

    /// Check if the caller may retry this operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArkError::AlreadyLocked { .. } | ArkError::AlreadySpent { .. } | ArkError::Transport { .. }
        )
    }

    /// Check if this error signals a misconfigured or malicious operator
    pub fn is_fatal_protocol(&self) -> bool {
        matches!(self, ArkError::ProtocolInconsistency { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let format_err = ArkError::format("address", "bad prefix");
        assert!(matches!(format_err, ArkError::InvalidFormat { what: "address", .. }));
        assert_eq!(format_err.to_string(), "Invalid address: bad prefix");

        let protocol_err = ArkError::protocol("exit delay mismatch");
        assert!(protocol_err.is_fatal_protocol());
        assert!(!protocol_err.is_retryable());
    }

    #[test]
    fn test_insufficient_funds_shortfall() {
        let err = ArkError::insufficient_funds(Amount::from_sat(1_000), Amount::from_sat(400));
        match err {
            ArkError::InsufficientFunds { shortfall, .. } => {
                assert_eq!(shortfall, Amount::from_sat(600))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_classification() {
        let locked = ArkError::AlreadyLocked {
            outpoint: OutPoint::null(),
        };
        assert!(locked.is_retryable());
        assert!(ArkError::transport("connection reset").is_retryable());
        assert!(!ArkError::Cancelled.is_retryable());
    }
}
