//! Error types for relay runs
//!
//! Every variant carries enough context (addresses, amount, attempt count)
//! for an operator to pick the run up by hand. The engine never rolls back:
//! funds already moved stay with their current holder.

use crate::wallet::WalletError;
use thiserror::Error;

/// Fatal outcome of a relay run
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RelayError {
    /// Preflight found the holder short of amount plus fee reserve.
    /// No send was attempted.
    #[error(
        "Insufficient funds at {address}: balance {balance} < required {required} (fee {fee})"
    )]
    InsufficientFunds {
        address: String,
        balance: f64,
        required: f64,
        fee: f64,
    },

    /// A hop or leg kept being rejected by the ledger until the attempt
    /// budget ran out.
    #[error("Failed to send {amount} from {from} to {to} after {attempts} attempts: {last_error}")]
    RelayExhausted {
        from: String,
        to: String,
        amount: f64,
        attempts: u32,
        last_error: String,
    },

    /// The session capability itself failed. Not retried.
    #[error("Session failure on {address}: {message}")]
    Session { address: String, message: String },

    #[error("Invalid relay path: {0}")]
    InvalidPath(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RelayError {
    /// Wrap a wallet failure that happened outside the retry executor
    /// (session open, balance or fee query).
    pub fn from_wallet(address: &str, error: WalletError) -> Self {
        // Reads are never retried, so a rejected read is as fatal as a broken channel
        let message = match error {
            WalletError::Session(message) | WalletError::Transaction(message) => message,
        };
        RelayError::Session {
            address: address.to_string(),
            message,
        }
    }

    /// Source and destination of the failed hop, when the error names one
    pub fn hop(&self) -> Option<(&str, &str)> {
        match self {
            RelayError::RelayExhausted { from, to, .. } => Some((from.as_str(), to.as_str())),
            _ => None,
        }
    }

    /// Attempts spent on the failed hop
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RelayError::RelayExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Whether anything may have moved before this error was raised
    pub fn is_pre_run(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidPath(_) | RelayError::InvalidAmount(_) | RelayError::Configuration(_)
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_names_hop() {
        let err = RelayError::RelayExhausted {
            from: "m1".into(),
            to: "m2".into(),
            amount: 1.0,
            attempts: 5,
            last_error: "rejected".into(),
        };
        assert_eq!(err.hop(), Some(("m1", "m2")));
        assert_eq!(err.attempts(), Some(5));
        let msg = err.to_string();
        assert!(msg.contains("m1") && msg.contains("m2") && msg.contains("5 attempts"));
    }

    #[test]
    fn test_session_error_mapping() {
        let err = RelayError::from_wallet("src", WalletError::Session("logged out".into()));
        assert_eq!(
            err,
            RelayError::Session {
                address: "src".into(),
                message: "logged out".into()
            }
        );
        assert!(err.hop().is_none());
        assert!(!err.is_pre_run());
    }

    #[test]
    fn test_pre_run_errors() {
        assert!(RelayError::InvalidAmount(-1.0).is_pre_run());
        assert!(RelayError::InvalidPath("no middlemen".into()).is_pre_run());
    }
}
