//! Encrypted key-value preferences holding the wallet seed and default mint.
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use blake3::Hasher as Blake3;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::WalletPaths;
use crate::config_store::KdfConfig;
use crate::errors::{WalletError, WalletResult};

pub const KEY_MNEMONIC: &str = "mnemonic";
pub const KEY_DEFAULT_MINT: &str = "default_mint_url";

const PREFS_MAGIC: &[u8; 8] = b"CASHUPRF";
const PREFS_VERSION: u16 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const BACKUPS_TO_KEEP: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PrefsFile {
    magic: [u8; 8],
    version: u16,
    nonce: [u8; NONCE_LEN],
    kdf: KdfParameters,
    checksum: [u8; 32],
    ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KdfParameters {
    m_cost_kib: u32,
    t_cost: u32,
    p_cost: u32,
    salt: [u8; SALT_LEN],
}

/// Decrypted state kept for the lifetime of the handle so the KDF runs once.
struct Unlocked {
    kdf: KdfParameters,
    key: Zeroizing<[u8; KEY_LEN]>,
    entries: BTreeMap<String, Zeroizing<String>>,
}

/// Passphrase-protected key-value store (Argon2id + AES-256-GCM).
pub struct SecurePrefs {
    path: PathBuf,
    wallet_paths: Option<WalletPaths>,
    state: Mutex<Unlocked>,
}

impl std::fmt::Debug for SecurePrefs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurePrefs")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SecurePrefs {
    /// Open the preferences file at `path`, creating an empty one if missing.
    /// A wrong passphrase or a tampered file fails with a crypto or
    /// validation error.
    pub fn open(
        path: impl AsRef<Path>,
        passphrase: &SecretString,
        kdf: KdfConfig,
    ) -> WalletResult<Self> {
        Self::open_inner(path.as_ref().to_path_buf(), None, passphrase, kdf)
    }

    /// Open the preferences file from the wallet layout; updates snapshot the
    /// previous file into the backup directory.
    pub fn from_paths(
        paths: &WalletPaths,
        passphrase: &SecretString,
        kdf: KdfConfig,
    ) -> WalletResult<Self> {
        Self::open_inner(
            paths.prefs_file().to_path_buf(),
            Some(paths.clone()),
            passphrase,
            kdf,
        )
    }

    fn open_inner(
        path: PathBuf,
        wallet_paths: Option<WalletPaths>,
        passphrase: &SecretString,
        kdf: KdfConfig,
    ) -> WalletResult<Self> {
        let unlocked = if path.exists() {
            let file = read_prefs_file(&path)?;
            let key = derive_key(passphrase, &file.kdf)?;
            let nonce = Nonce::assume_unique_for_key(file.nonce);
            let plaintext = decrypt_aes_gcm(&key, nonce, &file.ciphertext)?;
            if blake3_checksum(&plaintext) != file.checksum {
                return Err(WalletError::ValidationError(
                    "Preferences integrity verification failed".to_string(),
                ));
            }
            let raw: BTreeMap<String, String> = serde_json::from_slice(&plaintext)?;
            Unlocked {
                kdf: file.kdf,
                key,
                entries: raw
                    .into_iter()
                    .map(|(k, v)| (k, Zeroizing::new(v)))
                    .collect(),
            }
        } else {
            let mut salt = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            let kdf = KdfParameters {
                m_cost_kib: kdf.m_cost_kib,
                t_cost: kdf.t_cost,
                p_cost: kdf.p_cost,
                salt,
            };
            let key = derive_key(passphrase, &kdf)?;
            log::info!("Creating preferences file at {}", path.display());
            Unlocked {
                kdf,
                key,
                entries: BTreeMap::new(),
            }
        };

        let prefs = Self {
            path,
            wallet_paths,
            state: Mutex::new(unlocked),
        };
        if !prefs.path.exists() {
            prefs.persist(&prefs.state.lock())?;
        }
        Ok(prefs)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .entries
            .get(key)
            .map(|value| value.as_str().to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Store `value` under `key`; durable before returning.
    pub fn set(&self, key: &str, value: &str) -> WalletResult<()> {
        let mut state = self.state.lock();
        let previous = state
            .entries
            .insert(key.to_string(), Zeroizing::new(value.to_string()));
        if let Err(err) = self.persist(&state) {
            match previous {
                Some(old) => state.entries.insert(key.to_string(), old),
                None => state.entries.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    /// [`SecurePrefs::set`] on the blocking pool, for callers on the runtime.
    pub async fn set_blocking(self: &Arc<Self>, key: &str, value: &str) -> WalletResult<()> {
        let prefs = Arc::clone(self);
        let key = key.to_string();
        let value = Zeroizing::new(value.to_string());
        tokio::task::spawn_blocking(move || prefs.set(&key, &value))
            .await
            .map_err(|e| WalletError::Unknown(format!("Prefs write task failed: {}", e)))?
    }

    pub fn remove(&self, key: &str) -> WalletResult<()> {
        let mut state = self.state.lock();
        if let Some(old) = state.entries.remove(key) {
            if let Err(err) = self.persist(&state) {
                state.entries.insert(key.to_string(), old);
                return Err(err);
            }
        }
        Ok(())
    }

    fn persist(&self, state: &Unlocked) -> WalletResult<()> {
        self.snapshot_existing()?;

        let plain: BTreeMap<&str, &str> = state
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let json = Zeroizing::new(serde_json::to_vec(&plain)?);
        let checksum = blake3_checksum(&json);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = encrypt_aes_gcm(
            &state.key,
            Nonce::assume_unique_for_key(nonce_bytes),
            &json,
        )?;

        let file = PrefsFile {
            magic: *PREFS_MAGIC,
            version: PREFS_VERSION,
            nonce: nonce_bytes,
            kdf: state.kdf.clone(),
            checksum,
            ciphertext,
        };
        write_atomic(&self.path, &serde_json::to_vec(&file)?)
    }

    fn snapshot_existing(&self) -> WalletResult<()> {
        if let Some(paths) = &self.wallet_paths {
            if self.path.exists() {
                paths.create_prefs_backup()?;
                paths.prune_old_backups(BACKUPS_TO_KEEP)?;
            }
        }
        Ok(())
    }
}

fn read_prefs_file(path: &Path) -> WalletResult<PrefsFile> {
    let bytes = fs::read(path)?;
    let file: PrefsFile = serde_json::from_slice(&bytes)?;

    if &file.magic != PREFS_MAGIC {
        return Err(WalletError::ValidationError(
            "Invalid preferences magic marker".to_string(),
        ));
    }
    if file.version != PREFS_VERSION {
        return Err(WalletError::ValidationError(format!(
            "Unsupported preferences version: {}",
            file.version
        )));
    }
    Ok(file)
}

fn derive_key(
    passphrase: &SecretString,
    params: &KdfParameters,
) -> WalletResult<Zeroizing<[u8; KEY_LEN]>> {
    let argon_params = Params::new(
        params.m_cost_kib,
        params.t_cost,
        params.p_cost,
        Some(KEY_LEN),
    )
    .map_err(|e| WalletError::CryptoError(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(
            passphrase.expose_secret().as_bytes(),
            &params.salt,
            key.as_mut(),
        )
        .map_err(|e| WalletError::CryptoError(format!("KDF failed: {e}")))?;
    Ok(key)
}

fn encrypt_aes_gcm(
    key: &Zeroizing<[u8; KEY_LEN]>,
    nonce: Nonce,
    plaintext: &[u8],
) -> WalletResult<Vec<u8>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;
    Ok(in_out)
}

fn decrypt_aes_gcm(
    key: &Zeroizing<[u8; KEY_LEN]>,
    nonce: Nonce,
    ciphertext: &[u8],
) -> WalletResult<Zeroizing<Vec<u8>>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    if ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err(WalletError::CryptoError(
            "Ciphertext shorter than authentication tag".to_string(),
        ));
    }

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| {
            WalletError::CryptoError("Decryption failure (wrong passphrase?)".to_string())
        })?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

fn blake3_checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake3::new();
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Write to a sibling temp file, fsync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> WalletResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| WalletError::StorageError("Invalid storage path".to_string()))?;
    fs::create_dir_all(dir)?;
    let tmp_path = path.with_extension("new");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
