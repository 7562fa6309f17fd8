use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::WalletResult;
use crate::protocol::{Amount, CurrencyUnit, MintUrl, Proof, ProofsMethods};
use crate::storage::WalletStore;

/// Unspent proofs of one (mint, unit), backed by the shared store.
#[derive(Debug, Clone)]
pub struct ProofLedger {
    store: Arc<WalletStore>,
    mint_url: MintUrl,
    unit: CurrencyUnit,
}

impl ProofLedger {
    pub fn new(store: Arc<WalletStore>, mint_url: MintUrl, unit: CurrencyUnit) -> Self {
        Self {
            store,
            mint_url,
            unit,
        }
    }

    pub fn proofs(&self) -> WalletResult<Vec<Proof>> {
        self.store.get_proofs(&self.mint_url, &self.unit)
    }

    /// Derived on every call; balances are never cached.
    pub fn total_balance(&self) -> WalletResult<Amount> {
        Ok(self.proofs()?.total_amount()?)
    }

    pub async fn credit(&self, proofs: Vec<Proof>) -> WalletResult<()> {
        self.apply(proofs, &[]).await
    }

    pub async fn debit(&self, proofs: &[Proof]) -> WalletResult<()> {
        self.apply(Vec::new(), proofs).await
    }

    /// Credit and debit in one durable transaction, run on the blocking pool.
    pub async fn apply(&self, credit: Vec<Proof>, debit: &[Proof]) -> WalletResult<()> {
        if credit.is_empty() && debit.is_empty() {
            return Ok(());
        }
        let removed = debit
            .iter()
            .map(|proof| Ok(proof.y()?.to_hex()))
            .collect::<WalletResult<Vec<_>>>()?;
        log::debug!(
            "Ledger {} {}: +{} proofs, -{} proofs",
            self.mint_url,
            self.unit,
            credit.len(),
            removed.len()
        );
        let (mint_url, unit) = (self.mint_url.clone(), self.unit.clone());
        self.store
            .blocking(move |store| store.update_proofs(&mint_url, &unit, credit, &removed))
            .await
    }

    /// Count of held proofs per denomination.
    pub fn denominations(&self) -> WalletResult<BTreeMap<Amount, usize>> {
        let mut counts = BTreeMap::new();
        for proof in self.proofs()? {
            *counts.entry(proof.amount).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
