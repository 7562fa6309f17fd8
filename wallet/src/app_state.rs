use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use secrecy::SecretString;

use crate::api::types::TokenPreview;
use crate::config_store::{ConfigStore, Environment, WalletConfig};
use crate::errors::{WalletError, WalletResult};
use crate::mint_client::{http_connector_factory, ConnectorFactory};
use crate::protocol::{
    decode_token, parse_lock_pubkey, parse_signing_key, token_unit, Amount, CurrencyUnit,
    MintInfo, MintUrl, SpendingConditions, Token,
};
use crate::registry::WalletRegistry;
use crate::seed::SeedManager;
use crate::storage::{SecurePrefs, WalletPaths, KEY_DEFAULT_MINT};
use crate::wallet::{ReceiveOptions, SendOptions, Wallet, WalletOptions};

/// The only unit the action surface accepts.
const WALLET_UNIT: CurrencyUnit = CurrencyUnit::Sat;

/// Everything a running wallet process owns: on-disk layout, configuration,
/// encrypted prefs and the wallet registry.
#[derive(Debug)]
pub struct WalletContext {
    paths: WalletPaths,
    config_store: ConfigStore,
    config: WalletConfig,
    environment: Environment,
    prefs: Arc<SecurePrefs>,
    registry: WalletRegistry,
}

impl WalletContext {
    /// Open the wallet under `root_dir`, talking to mints over HTTP.
    pub fn initialize(root_dir: PathBuf, passphrase: &SecretString) -> WalletResult<Self> {
        let environment = Environment::from_env();
        let paths = WalletPaths::new(&root_dir)?;
        paths.ensure_directories()?;
        let config_store = ConfigStore::from_paths(&paths);
        let config = load_config(&config_store, environment)?;
        let connectors = http_connector_factory(config.network.clone());
        Self::assemble(paths, config_store, config, environment, passphrase, connectors)
    }

    /// Open the wallet with a caller-supplied way of reaching mints.
    pub fn initialize_with_connector(
        root_dir: PathBuf,
        passphrase: &SecretString,
        connectors: ConnectorFactory,
    ) -> WalletResult<Self> {
        let environment = Environment::from_env();
        let paths = WalletPaths::new(&root_dir)?;
        paths.ensure_directories()?;
        let config_store = ConfigStore::from_paths(&paths);
        let config = load_config(&config_store, environment)?;
        Self::assemble(paths, config_store, config, environment, passphrase, connectors)
    }

    fn assemble(
        paths: WalletPaths,
        config_store: ConfigStore,
        config: WalletConfig,
        environment: Environment,
        passphrase: &SecretString,
        connectors: ConnectorFactory,
    ) -> WalletResult<Self> {
        let prefs = Arc::new(SecurePrefs::from_paths(&paths, passphrase, config.kdf)?);
        let seeds = Arc::new(SeedManager::new(Arc::clone(&prefs)));
        let registry = WalletRegistry::new(
            seeds,
            paths.database_dir(),
            connectors,
            config.network.refresh_timeout(),
        );
        log::info!(
            "Wallet context ready at {} ({})",
            paths.root_dir().display(),
            environment.as_str()
        );

        Ok(Self {
            paths,
            config_store,
            config,
            environment,
            prefs,
            registry,
        })
    }

    pub fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn registry(&self) -> &WalletRegistry {
        &self.registry
    }

    fn wallet_options(&self) -> WalletOptions {
        WalletOptions {
            target_proof_count: self.config.wallet.target_proof_count,
        }
    }

    pub async fn wallet(&self, mint_url: &MintUrl) -> WalletResult<Arc<Wallet>> {
        self.registry
            .resolve(mint_url, &WALLET_UNIT, self.wallet_options())
            .await
    }

    pub fn default_mint(&self) -> Option<MintUrl> {
        let raw = self.prefs.get(KEY_DEFAULT_MINT)?;
        match MintUrl::from_str(&raw) {
            Ok(url) => Some(url),
            Err(e) => {
                log::warn!("Ignoring stored default mint {}: {}", raw, e);
                None
            }
        }
    }

    fn require_default_mint(&self) -> WalletResult<MintUrl> {
        self.default_mint()
            .ok_or_else(|| WalletError::NotFound("No default mint is set".to_string()))
    }

    fn mint_or_default(&self, mint_url: Option<&str>) -> WalletResult<MintUrl> {
        match mint_url {
            Some(raw) => Ok(MintUrl::from_str(raw)?),
            None => self.require_default_mint(),
        }
    }

    /// Persist the default mint and build its wallet so the first send does
    /// not pay for the refresh.
    pub async fn set_default_mint(&self, mint_url: &str) -> WalletResult<MintUrl> {
        let url = MintUrl::from_str(mint_url)?;
        self.prefs
            .set_blocking(KEY_DEFAULT_MINT, &url.to_string())
            .await?;
        self.wallet(&url).await?;
        log::info!("Default mint set to {}", url);
        Ok(url)
    }

    /// Balance at `mint_url`, or at the default mint. Zero when neither is
    /// known.
    pub async fn get_balance(&self, mint_url: Option<&str>) -> WalletResult<Amount> {
        let url = match mint_url {
            Some(raw) => MintUrl::from_str(raw)?,
            None => match self.default_mint() {
                Some(url) => url,
                None => return Ok(Amount::ZERO),
            },
        };
        self.wallet(&url).await?.total_balance()
    }

    /// Balance per stored mint after pruning proofs the mint reports spent.
    /// A mint that cannot be reached is left out rather than failing the
    /// whole call; only failures other than an outage are logged as warnings.
    pub async fn get_all_balances(&self) -> WalletResult<BTreeMap<MintUrl, Amount>> {
        let store = self.registry.store().await?;
        let mut balances = BTreeMap::new();
        for mint_url in store.get_mints()?.into_keys() {
            let balance = async {
                let wallet = self.wallet(&mint_url).await?;
                wallet.check_proofs_spent().await?;
                wallet.total_balance()
            };
            let balance = balance.await;
            match balance {
                Ok(balance) => {
                    balances.insert(mint_url, balance);
                }
                Err(e) if e.is_transient() => {
                    log::info!("Skipping balance of unreachable {}: {}", mint_url, e)
                }
                Err(e) => log::warn!("Skipping balance of {}: {}", mint_url, e),
            }
        }
        Ok(balances)
    }

    /// Send from the default mint, optionally locking the proofs to a key.
    pub async fn send(
        &self,
        amount: Amount,
        memo: Option<String>,
        lock_to_pubkey: Option<&str>,
    ) -> WalletResult<Token> {
        let mint_url = self.require_default_mint()?;
        let conditions = lock_to_pubkey
            .map(parse_lock_pubkey)
            .transpose()?
            .map(|pubkey| SpendingConditions::new_p2pk(pubkey, None));

        let options = SendOptions {
            conditions,
            include_fee: self.config.wallet.include_fee,
            max_proofs: self.config.wallet.max_proofs,
            ..SendOptions::default()
        };
        let wallet = self.wallet(&mint_url).await?;
        let prepared = wallet.prepare_send(amount, options).await?;
        prepared.confirm(memo).await
    }

    /// Redeem an encoded token into the wallet of its mint.
    pub async fn receive(&self, token: &str, unlocking_key: Option<&str>) -> WalletResult<Amount> {
        let token = decode_token(token)?;
        let unit = token_unit(&token);
        if unit != WALLET_UNIT {
            return Err(WalletError::UnsupportedUnit(unit.to_string()));
        }
        let mint_url = token
            .mint_url()
            .map_err(|e| WalletError::DecodeError(e.to_string()))?;
        let signing_keys = unlocking_key
            .map(parse_signing_key)
            .transpose()?
            .into_iter()
            .collect();

        let wallet = self.wallet(&mint_url).await?;
        wallet
            .receive(
                &token,
                ReceiveOptions {
                    signing_keys,
                    ..ReceiveOptions::default()
                },
            )
            .await
    }

    pub async fn list_mints(&self) -> WalletResult<BTreeMap<MintUrl, Option<MintInfo>>> {
        self.registry.store().await?.get_mints()
    }

    pub async fn peek_mnemonic(&self) -> WalletResult<String> {
        self.registry.seeds().peek_mnemonic().await
    }

    /// Install a recovered mnemonic before any wallet has been used.
    pub fn import_mnemonic(&self, phrase: &str) -> WalletResult<()> {
        self.registry.seeds().import(phrase)?;
        log::info!("Imported wallet seed");
        Ok(())
    }

    pub fn decode_token_preview(&self, token: &str) -> WalletResult<TokenPreview> {
        TokenPreview::from_token(&decode_token(token)?)
    }

    pub async fn restore(&self, mint_url: Option<&str>) -> WalletResult<Amount> {
        let url = self.mint_or_default(mint_url)?;
        self.wallet(&url).await?.restore().await
    }

    pub async fn check_spent(&self, mint_url: Option<&str>) -> WalletResult<Amount> {
        let url = self.mint_or_default(mint_url)?;
        self.wallet(&url).await?.check_proofs_spent().await
    }
}

fn load_config(store: &ConfigStore, environment: Environment) -> WalletResult<WalletConfig> {
    let mut config = store.load_or_default(environment)?;
    config.apply_env_overrides();
    Ok(config)
}

/// Context shared between the action surface and background tasks.
pub type SharedWalletContext = Arc<WalletContext>;
