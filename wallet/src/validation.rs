use crate::errors::{WalletError, WalletResult};
use crate::protocol::Amount;
use regex::Regex;

/// Longest memo carried in an outgoing token.
pub const MAX_MEMO_LEN: usize = 256;
/// Largest amount accepted from callers, in sats (21M BTC).
pub const MAX_SEND_SATS: u64 = 2_100_000_000_000_000;

/// Input validation for values arriving from the presentation layer
pub struct InputValidator {
    mint_url_pattern: Regex,
    amount_pattern: Regex,
    token_pattern: Regex,
    pubkey_pattern: Regex,
    private_key_pattern: Regex,

    // Blacklisted patterns for security
    malicious_patterns: Vec<Regex>,
}

fn compile(pattern: &str) -> WalletResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| WalletError::ValidationError(format!("Invalid regex {}: {}", pattern, e)))
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"vbscript:",
            r"onload=",
            r"onerror=",
        ]
        .iter()
        .map(|pattern| compile(pattern))
        .collect::<WalletResult<Vec<_>>>()?;

        Ok(InputValidator {
            mint_url_pattern: compile(r"^https?://[A-Za-z0-9.\-]+(:\d{1,5})?(/[A-Za-z0-9._~\-/]*)?$")?,
            amount_pattern: compile(r"^\d{1,19}$")?,
            token_pattern: compile(r"^(cashu:)?cashu[AB][A-Za-z0-9_\-+/=]+$")?,
            pubkey_pattern: compile(r"^((02|03)[0-9a-fA-F]{64}|[0-9a-fA-F]{64})$")?,
            private_key_pattern: compile(r"^[0-9a-fA-F]{64}$")?,
            malicious_patterns,
        })
    }

    /// Validate a mint base URL
    pub fn validate_mint_url(&self, url: &str) -> WalletResult<()> {
        let url = url.trim();
        self.check_basic_security(url)?;

        if url.is_empty() {
            return Err(WalletError::ValidationError(
                "Mint URL cannot be empty".to_string(),
            ));
        }

        if !self.mint_url_pattern.is_match(url) {
            return Err(WalletError::ValidationError(
                "Mint URL format is invalid".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a send amount given in whole sats
    pub fn validate_amount(&self, amount: &str) -> WalletResult<Amount> {
        let amount = amount.trim();
        self.check_basic_security(amount)?;

        if !self.amount_pattern.is_match(amount) {
            return Err(WalletError::InvalidAmount(
                "Amount must be a whole number of sats".to_string(),
            ));
        }

        let parsed = amount
            .parse::<u64>()
            .map(Amount::from)
            .map_err(|e| WalletError::InvalidAmount(format!("Invalid amount: {}", e)))?;
        self.validate_amount_value(parsed)?;
        Ok(parsed)
    }

    pub fn validate_amount_value(&self, amount: Amount) -> WalletResult<()> {
        if amount == Amount::ZERO {
            return Err(WalletError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        if u64::from(amount) > MAX_SEND_SATS {
            return Err(WalletError::InvalidAmount("Amount too large".to_string()));
        }

        Ok(())
    }

    pub fn validate_memo(&self, memo: &str) -> WalletResult<()> {
        self.check_basic_security(memo)?;

        if memo.chars().count() > MAX_MEMO_LEN {
            return Err(WalletError::ValidationError("Memo too long".to_string()));
        }

        if memo.chars().any(|c| c.is_control()) {
            return Err(WalletError::ValidationError(
                "Memo contains control characters".to_string(),
            ));
        }

        Ok(())
    }

    /// Cheap shape check before a full decode; catches pasted garbage.
    pub fn validate_token(&self, token: &str) -> WalletResult<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(WalletError::DecodeError("Token is empty".to_string()));
        }

        if !self.token_pattern.is_match(token) {
            return Err(WalletError::DecodeError(
                "Token must start with cashuA or cashuB".to_string(),
            ));
        }

        Ok(())
    }

    /// Compressed or x-only hex key to lock proofs to
    pub fn validate_lock_pubkey(&self, pubkey: &str) -> WalletResult<()> {
        if !self.pubkey_pattern.is_match(pubkey.trim()) {
            return Err(WalletError::InvalidKey(
                "Lock key must be 64 or 66 hex characters".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_private_key(&self, key: &str) -> WalletResult<()> {
        if !self.private_key_pattern.is_match(key.trim()) {
            return Err(WalletError::InvalidKey(
                "Unlocking key must be 64 hex characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Check for basic security issues in any input
    fn check_basic_security(&self, input: &str) -> WalletResult<()> {
        if input.len() > 1000 {
            return Err(WalletError::ValidationError("Input too long".to_string()));
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
