use crate::errors::{WalletError, WalletResult};
use regex::Regex;

/// Highest amount representable in satoshi (21M BTC).
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Input validation utilities for values sent to the co-signing service
pub struct InputValidator {
    // Compiled regex patterns for performance
    identifier_pattern: Regex,
    address_pattern: Regex,
    path_pattern: Regex,
    token_pattern: Regex,

    // Blacklisted patterns for security
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let identifier_pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]{0,127}$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid identifier regex: {}", e)))?;

        // base58 legacy/P2SH, bech32 segwit, cashaddr with optional prefix
        let address_pattern = Regex::new(
            r"^(?:[1-9A-HJ-NP-Za-km-z]{25,35}|(?i:(?:bc|tb|bcrt)1[02-9ac-hj-np-z]{8,87})|(?i:(?:bitcoincash:|bchtest:|bchreg:)?[qp][02-9ac-hj-np-z]{41}))$",
        )
        .map_err(|e| WalletError::ValidationError(format!("Invalid address regex: {}", e)))?;

        let path_pattern = Regex::new(r"^[mM](?:/\d+'?)*$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid path regex: {}", e)))?;

        let token_pattern = Regex::new(r"^\d{6,8}$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid token regex: {}", e)))?;

        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"\.\./",
        ]
        .iter()
        .map(|pattern| {
            Regex::new(pattern)
                .map_err(|e| WalletError::ValidationError(format!("Invalid pattern: {}", e)))
        })
        .collect::<WalletResult<Vec<_>>>()?;

        Ok(InputValidator {
            identifier_pattern,
            address_pattern,
            path_pattern,
            token_pattern,
            malicious_patterns,
        })
    }

    /// Validate a wallet identifier. It is interpolated into request paths.
    pub fn validate_identifier(&self, identifier: &str) -> WalletResult<()> {
        if identifier.is_empty() {
            return Err(WalletError::MissingIdentifier);
        }
        self.check_basic_security(identifier)?;

        if !self.identifier_pattern.is_match(identifier) {
            return Err(WalletError::ValidationError(
                "Identifier contains invalid characters".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a payment address
    pub fn validate_address(&self, address: &str) -> WalletResult<()> {
        self.check_basic_security(address)?;

        if address.is_empty() {
            return Err(WalletError::ValidationError(
                "Address cannot be empty".to_string(),
            ));
        }

        if !self.address_pattern.is_match(address) {
            return Err(WalletError::ValidationError(format!(
                "Address format is invalid: {}",
                address
            )));
        }

        Ok(())
    }

    /// Validate an output value in satoshi
    pub fn validate_amount(&self, value: u64) -> WalletResult<()> {
        if value == 0 {
            return Err(WalletError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }

        if value > MAX_MONEY {
            return Err(WalletError::ValidationError("Amount too large".to_string()));
        }

        Ok(())
    }

    /// Validate a derivation path handed to the service for cosigning.
    /// Only public (`M/...`) paths are accepted.
    pub fn validate_cosign_path(&self, path: &str) -> WalletResult<()> {
        if !self.path_pattern.is_match(path) {
            return Err(WalletError::ValidationError(format!(
                "Invalid derivation path: {}",
                path
            )));
        }
        if !path.starts_with('M') {
            return Err(WalletError::ValidationError(format!(
                "Path {} is not a public derivation path",
                path
            )));
        }
        Ok(())
    }

    pub fn validate_two_factor_token(&self, token: &str) -> WalletResult<()> {
        if !self.token_pattern.is_match(token) {
            return Err(WalletError::ValidationError(
                "Two-factor token must be 6 to 8 digits".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate a hex encoded transaction
    pub fn validate_raw_transaction(&self, raw: &str) -> WalletResult<()> {
        if raw.is_empty() || raw.len() % 2 != 0 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(WalletError::ValidationError(
                "Raw transaction must be non-empty hex".to_string(),
            ));
        }
        Ok(())
    }

    /// Check for basic security issues in any input
    fn check_basic_security(&self, input: &str) -> WalletResult<()> {
        if input.len() > 1000 {
            return Err(WalletError::ValidationError("Input too long".to_string()));
        }

        if input.chars().any(|c| c.is_control()) {
            return Err(WalletError::ValidationError(
                "Input contains control characters".to_string(),
            ));
        }

        let lowered = input.to_lowercase();
        for pattern in &self.malicious_patterns {
            if pattern.is_match(&lowered) {
                return Err(WalletError::ValidationError(
                    "Input contains potentially malicious content".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        let validator = InputValidator::new().unwrap();
        assert!(validator.validate_identifier("w1").is_ok());
        assert!(validator.validate_identifier("my-wallet_2.main").is_ok());
        assert_eq!(
            validator.validate_identifier("").unwrap_err(),
            WalletError::MissingIdentifier
        );
        assert!(validator.validate_identifier("../admin").is_err());
        assert!(validator.validate_identifier("a/b").is_err());
        assert!(validator.validate_identifier("tab\there").is_err());
    }

    #[test]
    fn addresses() {
        let validator = InputValidator::new().unwrap();
        assert!(validator
            .validate_address("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2")
            .is_ok());
        assert!(validator
            .validate_address("2N2JD6wb56AfK4tfmM6PwdVmoYk2dCKf4Br")
            .is_ok());
        assert!(validator
            .validate_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq")
            .is_ok());
        assert!(validator
            .validate_address("bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a")
            .is_ok());
        assert!(validator.validate_address("").is_err());
        assert!(validator.validate_address("0x0000000000000000000000000000000000000000").is_err());
    }

    #[test]
    fn amounts_and_paths() {
        let validator = InputValidator::new().unwrap();
        assert!(validator.validate_amount(10_000).is_ok());
        assert!(validator.validate_amount(0).is_err());
        assert!(validator.validate_amount(MAX_MONEY + 1).is_err());

        assert!(validator.validate_cosign_path("M/9999'/0/5").is_ok());
        assert!(validator.validate_cosign_path("m/0'/0/5").is_err());
        assert!(validator.validate_cosign_path("M/x").is_err());
    }

    #[test]
    fn tokens_and_transactions() {
        let validator = InputValidator::new().unwrap();
        assert!(validator.validate_two_factor_token("123456").is_ok());
        assert!(validator.validate_two_factor_token("12ab56").is_err());
        assert!(validator.validate_raw_transaction("0100").is_ok());
        assert!(validator.validate_raw_transaction("010").is_err());
        assert!(validator.validate_raw_transaction("zz").is_err());
    }
}
