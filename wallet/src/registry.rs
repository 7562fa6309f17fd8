//! One wallet per (mint, unit), all derived from the process seed.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};

use crate::errors::{WalletError, WalletResult};
use crate::mint_client::ConnectorFactory;
use crate::protocol::{CurrencyUnit, MintUrl};
use crate::seed::SeedManager;
use crate::storage::WalletStore;
use crate::wallet::{Wallet, WalletOptions};

type WalletKey = (MintUrl, CurrencyUnit);

pub struct WalletRegistry {
    seeds: Arc<SeedManager>,
    store_path: PathBuf,
    store: OnceCell<Arc<WalletStore>>,
    connectors: ConnectorFactory,
    refresh_timeout: Duration,
    /// Held across construction, so creation is serialized while use of
    /// already built wallets is not.
    wallets: Mutex<HashMap<WalletKey, Arc<Wallet>>>,
}

impl std::fmt::Debug for WalletRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRegistry")
            .field("store_path", &self.store_path)
            .field("refresh_timeout", &self.refresh_timeout)
            .finish_non_exhaustive()
    }
}

impl WalletRegistry {
    pub fn new(
        seeds: Arc<SeedManager>,
        store_path: impl Into<PathBuf>,
        connectors: ConnectorFactory,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            seeds,
            store_path: store_path.into(),
            store: OnceCell::new(),
            connectors,
            refresh_timeout,
            wallets: Mutex::new(HashMap::new()),
        }
    }

    /// Shared database handle, opened on first use.
    pub async fn store(&self) -> WalletResult<Arc<WalletStore>> {
        let store = self
            .store
            .get_or_try_init(|| async {
                let path = self.store_path.clone();
                let store = tokio::task::spawn_blocking(move || WalletStore::open(path))
                    .await
                    .map_err(|e| WalletError::Unknown(format!("Store open task failed: {}", e)))??;
                Ok::<_, WalletError>(Arc::new(store))
            })
            .await?;
        Ok(Arc::clone(store))
    }

    pub fn seeds(&self) -> &Arc<SeedManager> {
        &self.seeds
    }

    /// Cached wallet for `(mint_url, unit)`, constructing it on first use.
    /// `options` only apply to a wallet built by this call.
    pub async fn resolve(
        &self,
        mint_url: &MintUrl,
        unit: &CurrencyUnit,
        options: WalletOptions,
    ) -> WalletResult<Arc<Wallet>> {
        let key = (mint_url.clone(), unit.clone());
        let mut wallets = self.wallets.lock().await;
        if let Some(wallet) = wallets.get(&key) {
            return Ok(Arc::clone(wallet));
        }

        let seed = self.seeds.get_or_init().await?;
        let store = self.store().await?;
        let connector = (self.connectors)(mint_url)?;
        let wallet = Arc::new(Wallet::new(
            mint_url.clone(),
            unit.clone(),
            seed,
            store,
            connector,
            options,
        ));

        if let Err(e) = self.warm_up(&wallet).await {
            log::warn!("Refresh of {} failed, continuing offline: {}", mint_url, e);
        }

        log::info!("Created wallet for {} ({})", mint_url, unit);
        wallets.insert(key, Arc::clone(&wallet));
        Ok(wallet)
    }

    /// Best-effort refresh of mint info and key-sets, bounded by the
    /// refresh timeout.
    async fn warm_up(&self, wallet: &Wallet) -> WalletResult<()> {
        let refresh = async {
            wallet.refresh_mint_info().await?;
            wallet.refresh_keysets().await?;
            Ok::<_, WalletError>(())
        };
        tokio::time::timeout(self.refresh_timeout, refresh)
            .await
            .map_err(|_| {
                WalletError::MintUnavailable(format!(
                    "{} did not answer within {:?}",
                    wallet.mint_url(),
                    self.refresh_timeout
                ))
            })?
    }
}
