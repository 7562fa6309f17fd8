use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::protocol::{token_unit, Token};

/// What the presentation layer shows when a token is pasted, before the
/// user decides to redeem it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPreview {
    pub mint: String,
    pub unit: String,
    pub amount: u64,
    #[serde(default)]
    pub memo: Option<String>,
}

impl TokenPreview {
    pub fn from_token(token: &Token) -> WalletResult<Self> {
        Ok(Self {
            mint: token
                .mint_url()
                .map_err(|e| WalletError::DecodeError(e.to_string()))?
                .to_string(),
            unit: token_unit(token).to_string(),
            amount: u64::from(token.value()?),
            memo: token.memo().clone(),
        })
    }
}

/// Balances keyed by mint URL, as returned to callers.
pub type BalanceMap = BTreeMap<String, u64>;
