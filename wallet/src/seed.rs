//! Process-wide wallet seed, generated once and kept in the encrypted prefs.
use std::sync::Arc;

use bip39::{Language, Mnemonic};
use rand::{rngs::OsRng, RngCore};
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

use crate::errors::{WalletError, WalletResult};
use crate::storage::{SecurePrefs, KEY_MNEMONIC};

const MNEMONIC_WORDS: usize = 12;

/// Mnemonic plus the BIP39 seed every per-mint keychain derives from.
pub struct WalletSeed {
    mnemonic: Zeroizing<String>,
    seed: Zeroizing<[u8; 64]>,
}

impl std::fmt::Debug for WalletSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WalletSeed(..)")
    }
}

impl WalletSeed {
    pub fn from_mnemonic(phrase: &str) -> WalletResult<Self> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase.trim())
            .map_err(|e| WalletError::ValidationError(format!("Invalid mnemonic: {}", e)))?;
        Ok(Self {
            seed: Zeroizing::new(mnemonic.to_seed("")),
            mnemonic: Zeroizing::new(mnemonic.to_string()),
        })
    }

    pub fn generate() -> WalletResult<Self> {
        let mut entropy = Zeroizing::new([0u8; MNEMONIC_WORDS / 3 * 4]);
        OsRng
            .try_fill_bytes(&mut entropy[..])
            .map_err(|e| WalletError::CryptoError(format!("Failed to generate entropy: {}", e)))?;
        let mnemonic = Mnemonic::from_entropy(&entropy[..])
            .map_err(|e| WalletError::CryptoError(format!("Failed to create mnemonic: {}", e)))?;
        Self::from_mnemonic(&mnemonic.to_string())
    }

    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub fn seed_bytes(&self) -> &[u8; 64] {
        &self.seed
    }
}

/// Loads the seed from prefs on first use, generating and persisting one if
/// none exists. Concurrent first callers share a single initialization.
#[derive(Debug)]
pub struct SeedManager {
    prefs: Arc<SecurePrefs>,
    seed: OnceCell<Arc<WalletSeed>>,
}

impl SeedManager {
    pub fn new(prefs: Arc<SecurePrefs>) -> Self {
        Self {
            prefs,
            seed: OnceCell::new(),
        }
    }

    pub async fn get_or_init(&self) -> WalletResult<Arc<WalletSeed>> {
        let seed = self
            .seed
            .get_or_try_init(|| async {
                match self.prefs.get(KEY_MNEMONIC) {
                    Some(phrase) => {
                        let phrase = Zeroizing::new(phrase);
                        WalletSeed::from_mnemonic(&phrase).map(Arc::new)
                    }
                    None => {
                        let seed = WalletSeed::generate()?;
                        self.prefs.set_blocking(KEY_MNEMONIC, seed.mnemonic()).await?;
                        log::info!("Generated new wallet seed");
                        Ok(Arc::new(seed))
                    }
                }
            })
            .await?;
        Ok(Arc::clone(seed))
    }

    /// Install a recovered mnemonic. Refused once a seed exists, since the
    /// seed is never rotated.
    pub fn import(&self, phrase: &str) -> WalletResult<Arc<WalletSeed>> {
        if self.seed.initialized() || self.prefs.contains(KEY_MNEMONIC) {
            return Err(WalletError::ValidationError(
                "A wallet seed already exists".to_string(),
            ));
        }
        let seed = Arc::new(WalletSeed::from_mnemonic(phrase)?);
        self.prefs.set(KEY_MNEMONIC, seed.mnemonic())?;
        self.seed
            .set(Arc::clone(&seed))
            .map_err(|_| WalletError::ValidationError("A wallet seed already exists".to_string()))?;
        Ok(seed)
    }

    pub async fn peek_mnemonic(&self) -> WalletResult<String> {
        Ok(self.get_or_init().await?.mnemonic().to_string())
    }
}
