//! Proof state checks (NUT-07) and seed recovery (NUT-09).
use super::Wallet;
use crate::amount::add_amounts;
use crate::errors::{WalletError, WalletResult};
use crate::protocol::{
    Amount, CheckStateRequest, PreMintSecrets, Proof, ProofsMethods, PublicKey, RestoreRequest,
    State,
};
use cashu::dhke::construct_proofs;

/// Outputs sent to the restore endpoint per request.
const RESTORE_BATCH_SIZE: u32 = 100;
/// Consecutive empty batches after which a key-set is considered exhausted.
const EMPTY_BATCHES_BEFORE_STOP: u32 = 3;

impl Wallet {
    /// Drop ledger proofs the mint reports as spent; returns their total.
    pub async fn check_proofs_spent(&self) -> WalletResult<Amount> {
        let _guard = self.writer.lock().await;
        let proofs = self.ledger.proofs()?;
        let spent = self.filter_by_state(proofs, State::Spent).await?;
        if spent.is_empty() {
            return Ok(Amount::ZERO);
        }

        let amount = spent.total_amount()?;
        self.ledger.debit(&spent).await?;
        log::info!(
            "Removed {} spent proofs worth {} from {}",
            spent.len(),
            amount,
            self.mint_url
        );
        Ok(amount)
    }

    /// Proofs among `proofs` whose mint-side state is `wanted`. Always asks the
    /// mint, even for an empty set, so an unreachable mint surfaces here.
    async fn filter_by_state(&self, proofs: Vec<Proof>, wanted: State) -> WalletResult<Vec<Proof>> {
        let ys = ProofYs::ys(&proofs)?;
        let response = self
            .connector
            .post_check_state(CheckStateRequest { ys: ys.clone() })
            .await?;

        Ok(proofs
            .into_iter()
            .zip(ys)
            .filter(|(_, y)| {
                response
                    .states
                    .iter()
                    .any(|entry| &entry.y == y && entry.state == wanted)
            })
            .map(|(proof, _)| proof)
            .collect())
    }

    /// Recover proofs derived from the seed for every active key-set of this
    /// unit. Unspent ones are credited and counters are moved past the last
    /// output the mint recognized. Returns the recovered amount.
    pub async fn restore(&self) -> WalletResult<Amount> {
        let _guard = self.writer.lock().await;
        let keysets = self.refresh_keysets().await?;
        let mut recovered = Amount::ZERO;

        for keyset in keysets
            .into_iter()
            .filter(|k| k.active && k.unit == self.unit)
        {
            let keys = self.keys_for(&keyset.id).await?;
            let mut start = 0u32;
            let mut next_counter = 0u32;
            let mut empty_batches = 0;
            let mut restored = Vec::new();

            while empty_batches < EMPTY_BATCHES_BEFORE_STOP {
                let last = start.checked_add(RESTORE_BATCH_SIZE - 1).ok_or_else(|| {
                    WalletError::StorageError(format!("Restore counter overflow for {}", keyset.id))
                })?;
                let premints =
                    PreMintSecrets::restore_batch(keyset.id, self.seed.seed_bytes(), start, last)?;
                let messages = premints.blinded_messages();
                let response = self
                    .connector
                    .post_restore(RestoreRequest {
                        outputs: messages.clone(),
                    })
                    .await?;

                if response.signatures.is_empty() {
                    empty_batches += 1;
                } else {
                    empty_batches = 0;
                    let mut rs = Vec::with_capacity(response.outputs.len());
                    let mut secrets = Vec::with_capacity(response.outputs.len());
                    for output in &response.outputs {
                        let index = messages
                            .iter()
                            .position(|m| m.blinded_secret == output.blinded_secret)
                            .ok_or_else(|| {
                                WalletError::InvalidResponse(format!(
                                    "{} restored an output the wallet did not send",
                                    self.mint_url
                                ))
                            })?;
                        let premint = &premints.secrets[index];
                        rs.push(premint.r.clone());
                        secrets.push(premint.secret.clone());
                        next_counter = next_counter.max(start + index as u32 + 1);
                    }
                    restored.extend(construct_proofs(response.signatures, rs, secrets, &keys)?);
                }
                start = start.saturating_add(messages.len() as u32);
            }

            if restored.is_empty() {
                continue;
            }
            let unspent = self.filter_by_state(restored, State::Unspent).await?;
            let amount = unspent.total_amount()?;
            self.ledger.credit(unspent).await?;
            let id = keyset.id;
            self.store
                .blocking(move |store| store.advance_keyset_counter(&id, next_counter))
                .await?;
            log::info!(
                "Restored {} from key-set {} of {} (counter {})",
                amount,
                keyset.id,
                self.mint_url,
                next_counter
            );
            recovered = add_amounts(recovered, amount)?;
        }
        Ok(recovered)
    }
}

/// Y values of `proofs`, as sent in a state check.
trait ProofYs {
    fn ys(&self) -> WalletResult<Vec<PublicKey>>;
}

impl ProofYs for Vec<Proof> {
    fn ys(&self) -> WalletResult<Vec<PublicKey>> {
        self.iter().map(|proof| Ok(proof.y()?)).collect()
    }
}
