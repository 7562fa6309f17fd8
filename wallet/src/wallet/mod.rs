//! A wallet bound to one (mint, unit): key-set cache, ledger and the swap
//! exchange the spend, receive and restore engines build on.
pub mod ledger;
pub mod receive;
pub mod restore;
pub mod selection;
pub mod send;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use cashu::dhke::construct_proofs;
use tokio::sync::Mutex;

use crate::amount::{fee_for_inputs, output_amounts, split_towards_count, MAX_OUTPUTS};
use crate::errors::{WalletError, WalletResult};
use crate::mint_client::MintConnector;
use crate::protocol::{
    encode_token_v3, Amount, CurrencyUnit, Id, KeySetInfo, Keys, MintInfo, MintUrl,
    PreMintSecrets, Proof, SplitTarget, SwapRequest, Token,
};
use crate::seed::WalletSeed;
use crate::storage::WalletStore;

pub use ledger::ProofLedger;
pub use receive::ReceiveOptions;
pub use send::{PreparedSend, SendKind, SendOptions};

/// Highest per-input fee a key-set may charge, in parts per thousand.
const MAX_INPUT_FEE_PPK: u64 = 1000;

/// Per-wallet tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletOptions {
    /// Preferred proofs per denomination when minting change.
    pub target_proof_count: Option<usize>,
}

pub struct Wallet {
    mint_url: MintUrl,
    unit: CurrencyUnit,
    seed: Arc<WalletSeed>,
    store: Arc<WalletStore>,
    connector: Arc<dyn MintConnector>,
    options: WalletOptions,
    ledger: ProofLedger,
    /// Serializes send, receive and restore on this wallet.
    writer: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("mint_url", &self.mint_url)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

impl Wallet {
    pub fn new(
        mint_url: MintUrl,
        unit: CurrencyUnit,
        seed: Arc<WalletSeed>,
        store: Arc<WalletStore>,
        connector: Arc<dyn MintConnector>,
        options: WalletOptions,
    ) -> Self {
        let ledger = ProofLedger::new(Arc::clone(&store), mint_url.clone(), unit.clone());
        Self {
            mint_url,
            unit,
            seed,
            store,
            connector,
            options,
            ledger,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn mint_url(&self) -> &MintUrl {
        &self.mint_url
    }

    pub fn unit(&self) -> &CurrencyUnit {
        &self.unit
    }

    pub fn ledger(&self) -> &ProofLedger {
        &self.ledger
    }

    pub fn options(&self) -> &WalletOptions {
        &self.options
    }

    pub fn total_balance(&self) -> WalletResult<Amount> {
        self.ledger.total_balance()
    }

    /// `cashuA` form of a token from this wallet's mint.
    pub fn encode_legacy(&self, token: &Token) -> WalletResult<String> {
        encode_token_v3(token, &self.store.get_mint_keysets(&self.mint_url)?)
    }

    /// Mint info as last stored, without network access.
    pub fn mint_info(&self) -> WalletResult<Option<MintInfo>> {
        self.store.get_mint(&self.mint_url)
    }

    pub async fn refresh_mint_info(&self) -> WalletResult<MintInfo> {
        let info = self.connector.get_mint_info().await?;
        let mint_url = self.mint_url.clone();
        let stored = info.clone();
        self.store
            .blocking(move |store| store.add_mint(&mint_url, Some(stored)))
            .await?;
        Ok(info)
    }

    /// Fetch key-sets and the keys of any active key-set for this unit that
    /// are not yet cached. Key-sets charging more than one unit per input
    /// are dropped.
    pub async fn refresh_keysets(&self) -> WalletResult<Vec<KeySetInfo>> {
        let advertised = self.connector.get_mint_keysets().await?;
        let keysets: Vec<KeySetInfo> = advertised
            .into_iter()
            .filter(|keyset| {
                let sane = keyset.input_fee_ppk <= MAX_INPUT_FEE_PPK;
                if !sane {
                    log::warn!(
                        "{} key-set {} charges {} ppk per input, ignoring it",
                        self.mint_url,
                        keyset.id,
                        keyset.input_fee_ppk
                    );
                }
                sane
            })
            .collect();

        let mint_url = self.mint_url.clone();
        let stored = keysets.clone();
        self.store
            .blocking(move |store| {
                store.add_mint(&mint_url, None)?;
                store.add_mint_keysets(&mint_url, stored)
            })
            .await?;

        for keyset in keysets
            .iter()
            .filter(|k| k.active && k.unit == self.unit)
        {
            if self.store.get_keys(&keyset.id)?.is_none() {
                self.fetch_keys(&keyset.id).await?;
            }
        }
        log::debug!("{} advertises {} key-sets", self.mint_url, keysets.len());
        Ok(keysets)
    }

    async fn fetch_keys(&self, id: &Id) -> WalletResult<Keys> {
        let keyset = self.connector.get_mint_keyset(id).await?;
        if keyset.id != *id {
            return Err(WalletError::InvalidResponse(format!(
                "{} answered key-set {} for {}",
                self.mint_url, keyset.id, id
            )));
        }
        keyset.verify_id().map_err(|e| {
            WalletError::InvalidResponse(format!("Key-set {} failed id check: {}", id, e))
        })?;
        let keys = keyset.keys.clone();
        self.store
            .blocking(move |store| store.add_keys(keyset))
            .await?;
        Ok(keys)
    }

    /// Keys for `id`, fetched and verified on first use.
    pub async fn keys_for(&self, id: &Id) -> WalletResult<Keys> {
        match self.store.get_keys(id)? {
            Some(keys) => Ok(keys),
            None => self.fetch_keys(id).await,
        }
    }

    /// Cheapest active key-set for this unit, refreshing once if none is known.
    pub async fn active_keyset(&self) -> WalletResult<KeySetInfo> {
        if let Some(keyset) = self.pick_active_keyset()? {
            return Ok(keyset);
        }
        self.refresh_keysets().await?;
        self.pick_active_keyset()?.ok_or_else(|| {
            WalletError::NotFound(format!(
                "{} has no active key-set for unit {}",
                self.mint_url, self.unit
            ))
        })
    }

    fn pick_active_keyset(&self) -> WalletResult<Option<KeySetInfo>> {
        Ok(self
            .store
            .get_mint_keysets(&self.mint_url)?
            .into_iter()
            .filter(|k| k.active && k.unit == self.unit)
            .min_by_key(|k| k.input_fee_ppk))
    }

    /// Input fee for spending `proofs`, from their key-sets' `input_fee_ppk`.
    pub fn input_fee(&self, proofs: &[Proof]) -> WalletResult<Amount> {
        let mut per_keyset: BTreeMap<Id, usize> = BTreeMap::new();
        for proof in proofs {
            *per_keyset.entry(proof.keyset_id).or_insert(0) += 1;
        }
        let inputs = per_keyset
            .into_iter()
            .map(|(id, count)| {
                let fee_ppk = self
                    .store
                    .get_keyset_by_id(&id)?
                    .map(|k| k.input_fee_ppk)
                    .unwrap_or(0);
                Ok((fee_ppk, count))
            })
            .collect::<WalletResult<Vec<(u64, usize)>>>()?;
        fee_for_inputs(&inputs)
    }

    /// Deterministic outputs for `amounts`. The counters are reserved in the
    /// store before the outputs exist, so a crash after the mint signs can be
    /// recovered by restore.
    async fn deterministic_outputs(
        &self,
        keyset_id: Id,
        amounts: Vec<Amount>,
    ) -> WalletResult<PreMintSecrets> {
        if amounts.is_empty() {
            return Ok(PreMintSecrets::new(keyset_id));
        }
        if amounts.len() > MAX_OUTPUTS {
            return Err(WalletError::InvalidAmount(format!(
                "{} outputs exceed the limit of {}",
                amounts.len(),
                MAX_OUTPUTS
            )));
        }
        let total = Amount::try_sum(amounts.iter().copied())?;
        let count = amounts.len() as u32;
        let start = self
            .store
            .blocking(move |store| store.increment_keyset_counter(&keyset_id, count))
            .await?;
        Ok(PreMintSecrets::from_seed(
            keyset_id,
            start,
            self.seed.seed_bytes(),
            total,
            &SplitTarget::Values(amounts),
        )?)
    }

    /// Burn `inputs` for new proofs over `outputs`.
    async fn swap(&self, inputs: Vec<Proof>, outputs: &PreMintSecrets) -> WalletResult<Vec<Proof>> {
        let keys = self.keys_for(&outputs.keyset_id).await?;
        let request = SwapRequest::new(inputs, outputs.blinded_messages());
        let response = self.connector.post_swap(request).await?;
        Ok(construct_proofs(
            response.signatures,
            outputs.rs(),
            outputs.secrets(),
            &keys,
        )?)
    }

    /// Split amounts for change, following `target_proof_count` when set.
    fn change_amounts(&self, change: Amount) -> WalletResult<Vec<Amount>> {
        match self.options.target_proof_count {
            Some(target) if target > 0 => {
                let parts = split_towards_count(change, &self.ledger.denominations()?, target);
                if parts.len() <= MAX_OUTPUTS {
                    return Ok(parts);
                }
                log::debug!("Change of {} falls back to a plain split", change);
                output_amounts(change, &SplitTarget::default())
            }
            _ => output_amounts(change, &SplitTarget::default()),
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
