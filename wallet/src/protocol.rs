//! Cashu wire types come from the `cashu` crate; this module adds the
//! parsing of caller input and the receive-side unlocking of P2PK proofs.
use std::str::FromStr;

pub use cashu::amount::SplitTarget;
pub use cashu::mint_url::MintUrl;
pub use cashu::nuts::nut10::Secret as Nut10Secret;
pub use cashu::nuts::{
    BlindSignature, BlindedMessage, CheckStateRequest, CheckStateResponse, Conditions,
    CurrencyUnit, Id, KeySet, KeySetInfo, Keys, KeysResponse, KeysetResponse, MintInfo,
    PreMintSecrets, Proof, ProofState, Proofs, ProofsMethods, PublicKey, RestoreRequest,
    RestoreResponse, SecretKey, SigFlag, SpendingConditions, State, SwapRequest, SwapResponse,
    Token, TokenV3,
};
pub use cashu::secret::Secret;
pub use cashu::Amount;

use crate::errors::{WalletError, WalletResult};

const TOKEN_URI_PREFIX: &str = "cashu:";

/// Parse a lock key given as compressed (66 hex) or x-only (64 hex). An
/// x-only key is widened with the even prefix.
pub fn parse_lock_pubkey(raw: &str) -> WalletResult<PublicKey> {
    let hex_key = raw.trim().to_ascii_lowercase();
    let hex_key = if hex_key.len() == 64 {
        format!("02{}", hex_key)
    } else {
        hex_key
    };
    PublicKey::from_hex(&hex_key)
        .map_err(|e| WalletError::InvalidKey(format!("Invalid lock pubkey: {}", e)))
}

pub fn parse_signing_key(raw: &str) -> WalletResult<SecretKey> {
    SecretKey::from_hex(raw.trim())
        .map_err(|e| WalletError::InvalidKey(format!("Invalid unlocking key: {}", e)))
}

/// Decode a `cashuA`/`cashuB` token, tolerating a `cashu:` URI prefix and
/// whitespace introduced by chat clients.
pub fn decode_token(raw: &str) -> WalletResult<Token> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let encoded = compact
        .strip_prefix(TOKEN_URI_PREFIX)
        .unwrap_or(&compact);
    Token::from_str(encoded).map_err(|e| WalletError::DecodeError(e.to_string()))
}

/// Unit a token is denominated in; legacy tokens without one are sats.
pub fn token_unit(token: &Token) -> CurrencyUnit {
    token.unit().unwrap_or(CurrencyUnit::Sat)
}

/// Legacy `cashuA` encoding of `token`, for receivers that predate V4.
/// `keysets` resolves the short key-set ids a V4 token carries.
pub fn encode_token_v3(token: &Token, keysets: &[KeySetInfo]) -> WalletResult<String> {
    let mint_url = token
        .mint_url()
        .map_err(|e| WalletError::DecodeError(e.to_string()))?;
    let legacy = TokenV3::new(
        mint_url,
        token.proofs(keysets)?,
        token.memo().clone(),
        Some(token_unit(token)),
    )?;
    Ok(legacy.to_string())
}

/// Sign a P2PK locked proof with whichever of `signing_keys` the lock
/// accepts, then check the witness the way the mint will. Plain secrets
/// pass through untouched.
pub fn unlock_proof(proof: &mut Proof, signing_keys: &[SecretKey], now: u64) -> WalletResult<()> {
    let nut10 = match Nut10Secret::try_from(proof.secret.clone()) {
        Ok(nut10) => nut10,
        Err(_) => return Ok(()),
    };
    let (data, conditions) = match SpendingConditions::try_from(nut10) {
        Ok(SpendingConditions::P2PKConditions { data, conditions }) => (data, conditions),
        Ok(SpendingConditions::HTLCConditions { .. }) => {
            return Err(WalletError::ConditionUnmet(
                "HTLC locked proofs require a preimage".to_string(),
            ))
        }
        Err(e) => return Err(WalletError::ConditionUnmet(e.to_string())),
    };

    let mut signers = vec![data];
    if let Some(conditions) = &conditions {
        if conditions.sig_flag == SigFlag::SigAll {
            return Err(WalletError::ConditionUnmet(
                "SIG_ALL locked proofs are not supported".to_string(),
            ));
        }
        signers.extend(conditions.pubkeys.iter().flatten().copied());
        let expired = conditions.locktime.is_some_and(|locktime| now >= locktime);
        if expired {
            signers.extend(conditions.refund_keys.iter().flatten().copied());
        }
    }

    let signers: Vec<_> = signers.iter().map(|key| key.x_only_public_key()).collect();
    for key in signing_keys {
        if signers.contains(&key.public_key().x_only_public_key()) {
            proof.sign_p2pk(key.clone())?;
        }
    }

    proof.verify_p2pk().map_err(|e| {
        WalletError::ConditionUnmet(format!(
            "no supplied key can unlock proof of {} locked to {}: {}",
            proof.amount, data, e
        ))
    })
}
