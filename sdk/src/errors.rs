use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletError {
    // Validation errors, raised before any remote call
    MissingIdentifier,
    ConflictingOptions(String),
    MissingPassphrase(String),
    InvalidNetwork(String),
    InvalidKey(String),
    ValidationError(String),
    InvalidOptions(Vec<WalletError>),

    // Cryptographic errors
    CryptoError(String),
    DecryptionError,
    ChecksumMismatch { expected: String, actual: String },

    // Remote service errors
    NetworkError(String),
    InsufficientFee(String),
    ServerRejected { status: u16, message: String },
    InvalidResponse(String),

    // Session and storage errors
    Locked,
    PermissionDenied(String),
    StorageError(String),
}

impl WalletError {
    /// True for errors caused by bad local input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WalletError::MissingIdentifier
                | WalletError::ConflictingOptions(_)
                | WalletError::MissingPassphrase(_)
                | WalletError::InvalidNetwork(_)
                | WalletError::InvalidKey(_)
                | WalletError::ValidationError(_)
                | WalletError::InvalidOptions(_)
        )
    }

    /// Collapse a list of validation problems into a single error.
    pub fn from_issues(mut issues: Vec<WalletError>) -> Option<WalletError> {
        match issues.len() {
            0 => None,
            1 => issues.pop(),
            _ => Some(WalletError::InvalidOptions(issues)),
        }
    }
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::MissingIdentifier => write!(f, "Identifier is required"),
            WalletError::ConflictingOptions(msg) => write!(f, "Conflicting options: {}", msg),
            WalletError::MissingPassphrase(msg) => write!(f, "Missing passphrase: {}", msg),
            WalletError::InvalidNetwork(msg) => write!(f, "Unknown network: {}", msg),
            WalletError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            WalletError::InvalidOptions(issues) => {
                write!(f, "Invalid options:")?;
                for issue in issues {
                    write!(f, " [{}]", issue)?;
                }
                Ok(())
            }

            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            WalletError::DecryptionError => write!(f, "Decryption failed"),
            WalletError::ChecksumMismatch { expected, actual } => write!(
                f,
                "Checksum [{}] does not match [{}], most likely due to incorrect password",
                actual, expected
            ),

            WalletError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            WalletError::InsufficientFee(msg) => write!(f, "Insufficient fee: {}", msg),
            WalletError::ServerRejected { status, message } => {
                write!(f, "Server rejected request ({}): {}", status, message)
            }
            WalletError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),

            WalletError::Locked => write!(f, "Wallet is locked"),
            WalletError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

pub type WalletResult<T> = Result<T, WalletError>;

// Helper macro for easy error creation
#[macro_export]
macro_rules! wallet_error {
    ($variant:ident, $msg:expr) => {
        $crate::errors::WalletError::$variant($msg.to_string())
    };
    ($variant:ident) => {
        $crate::errors::WalletError::$variant
    };
}

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_issue_is_not_wrapped() {
        let err = WalletError::from_issues(vec![WalletError::MissingIdentifier]).unwrap();
        assert_eq!(err, WalletError::MissingIdentifier);
        assert!(WalletError::from_issues(Vec::new()).is_none());
    }

    #[test]
    fn multiple_issues_are_collected() {
        let err = WalletError::from_issues(vec![
            WalletError::MissingIdentifier,
            wallet_error!(ConflictingOptions, "mnemonic and seed"),
        ])
        .unwrap();
        assert!(matches!(&err, WalletError::InvalidOptions(issues) if issues.len() == 2));
        assert!(err.is_validation());
        assert!(err.to_string().contains("mnemonic and seed"));
    }

    #[test]
    fn decryption_error_carries_no_detail() {
        assert_eq!(WalletError::DecryptionError.to_string(), "Decryption failed");
        assert!(!WalletError::DecryptionError.is_validation());
    }
}
