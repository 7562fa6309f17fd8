//! Receive engine: redeem a token into fresh proofs owned by this wallet.
use std::collections::BTreeSet;

use super::{unix_now, Wallet};
use crate::amount::{output_amounts, sub_amounts};
use crate::errors::{WalletError, WalletResult};
use crate::protocol::{
    token_unit, unlock_proof, Amount, Id, Proof, Proofs, ProofsMethods, SecretKey, SplitTarget,
    Token,
};

#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// Private keys tried against P2PK locked proofs.
    pub signing_keys: Vec<SecretKey>,
    pub amount_split_target: SplitTarget,
}

impl Wallet {
    /// Swap the token's proofs for new ones and credit them. Returns the
    /// amount credited, which is the token value less the mint's input fee.
    pub async fn receive(&self, token: &Token, options: ReceiveOptions) -> WalletResult<Amount> {
        let token_mint = token
            .mint_url()
            .map_err(|e| WalletError::DecodeError(e.to_string()))?;
        if token_mint != self.mint_url {
            return Err(WalletError::ValidationError(format!(
                "Token is from {}, wallet is bound to {}",
                token_mint, self.mint_url
            )));
        }
        let unit = token_unit(token);
        if unit != self.unit {
            return Err(WalletError::UnsupportedUnit(unit.to_string()));
        }

        let _guard = self.writer.lock().await;

        let proofs = self.token_proofs(token).await?;
        if proofs.is_empty() {
            return Err(WalletError::DecodeError("Token carries no proofs".to_string()));
        }

        let now = unix_now();
        let mut inputs: Vec<Proof> = Vec::with_capacity(proofs.len());
        for mut proof in proofs {
            self.verify_dleq(&proof).await?;
            unlock_proof(&mut proof, &options.signing_keys, now)?;
            proof.dleq = None;
            inputs.push(proof);
        }

        let total = inputs.total_amount()?;
        let fee = self.input_fee(&inputs)?;
        let amount = sub_amounts(total, fee).unwrap_or(Amount::ZERO);
        if amount == Amount::ZERO {
            return Err(WalletError::InvalidAmount(format!(
                "Token value {} does not cover fee {}",
                total, fee
            )));
        }

        let keyset = self.active_keyset().await?;
        let amounts = output_amounts(amount, &options.amount_split_target)?;
        let outputs = self.deterministic_outputs(keyset.id, amounts).await?;
        let proofs = self.swap(inputs, &outputs).await?;
        self.ledger.credit(proofs).await?;

        log::info!("Received {} from {} (fee {})", amount, self.mint_url, fee);
        Ok(amount)
    }

    /// Proofs of `token` with full key-set ids, refreshing key-sets once when
    /// the token names one this wallet has not seen.
    async fn token_proofs(&self, token: &Token) -> WalletResult<Proofs> {
        let known = self.store.get_mint_keysets(&self.mint_url)?;
        if let Ok(proofs) = token.proofs(&known) {
            let ids: BTreeSet<Id> = proofs.iter().map(|p| p.keyset_id).collect();
            if ids.iter().all(|id| known.iter().any(|k| &k.id == id)) {
                return Ok(proofs);
            }
        }

        self.refresh_keysets().await?;
        let known = self.store.get_mint_keysets(&self.mint_url)?;
        token
            .proofs(&known)
            .map_err(|e| WalletError::DecodeError(format!("Token key-sets unknown to mint: {}", e)))
    }

    /// NUT-12 check of a DLEQ proof the sender attached.
    async fn verify_dleq(&self, proof: &Proof) -> WalletResult<()> {
        if proof.dleq.is_none() {
            return Ok(());
        }
        let keys = self.keys_for(&proof.keyset_id).await?;
        let mint_key = keys.amount_key(proof.amount).ok_or_else(|| {
            WalletError::InvalidProof(format!(
                "Key-set {} has no key for amount {}",
                proof.keyset_id, proof.amount
            ))
        })?;
        proof
            .verify_dleq(mint_key)
            .map_err(|e| WalletError::InvalidProof(format!("DLEQ check failed: {}", e)))
    }
}
