//! Wallet database on LMDB: one record per proof, key-set, key map, mint and
//! derivation counter, shared by every wallet of the process.
//!
//! Layout (all keys are UTF-8 text):
//! - `proofs`: hex `Y` -> JSON [`ProofRecord`]
//! - `keysets`: key-set id -> JSON [`KeysetRecord`]
//! - `keys`: key-set id -> JSON [`Keys`]
//! - `mints`: mint URL -> JSON `Option<MintInfo>`
//! - `counters`: key-set id -> big-endian `u32`
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::protocol::{CurrencyUnit, Id, KeySet, KeySetInfo, Keys, MintInfo, MintUrl, Proof};

const MAP_SIZE: usize = 256 * 1024 * 1024;
const MAX_DBS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProofRecord {
    mint_url: MintUrl,
    unit: CurrencyUnit,
    proof: Proof,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeysetRecord {
    mint_url: MintUrl,
    info: KeySetInfo,
}

/// Handle to the wallet database. Every mutation is one LMDB write
/// transaction, durable once it returns.
pub struct WalletStore {
    path: PathBuf,
    env: Env,
    proofs: Database<Bytes, Bytes>,
    keysets: Database<Bytes, Bytes>,
    keys: Database<Bytes, Bytes>,
    mints: Database<Bytes, Bytes>,
    counters: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for WalletStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn encode<T: Serialize>(value: &T) -> WalletResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| WalletError::StorageError(format!("Failed to encode record: {}", e)))
}

fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> WalletResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        WalletError::StorageError(format!(
            "Corrupt record {}: {}",
            String::from_utf8_lossy(key),
            e
        ))
    })
}

fn decode_counter(bytes: &[u8]) -> WalletResult<u32> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| WalletError::StorageError("Corrupt derivation counter".to_string()))?;
    Ok(u32::from_be_bytes(raw))
}

impl WalletStore {
    /// Open or create the database directory at `path`.
    pub fn open(path: impl AsRef<Path>) -> WalletResult<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per process for this path
        // and the file is not modified by anything but this handle.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(MAX_DBS)
                .open(&path)?
        };

        let mut wtxn = env.write_txn()?;
        let proofs = env.create_database(&mut wtxn, Some("proofs"))?;
        let keysets = env.create_database(&mut wtxn, Some("keysets"))?;
        let keys = env.create_database(&mut wtxn, Some("keys"))?;
        let mints = env.create_database(&mut wtxn, Some("mints"))?;
        let counters = env.create_database(&mut wtxn, Some("counters"))?;
        wtxn.commit()?;

        let store = Self {
            path,
            env,
            proofs,
            keysets,
            keys,
            mints,
            counters,
        };
        let rtxn = store.env.read_txn()?;
        log::debug!(
            "Opened wallet database with {} proofs across {} mints",
            store.proofs.len(&rtxn)?,
            store.mints.len(&rtxn)?
        );
        drop(rtxn);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the store on the blocking pool. Writes sync to disk
    /// and must stay off the async workers.
    pub async fn blocking<R, F>(self: &Arc<Self>, f: F) -> WalletResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&WalletStore) -> WalletResult<R> + Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| WalletError::Unknown(format!("Store task failed: {}", e)))?
    }

    fn read<T: DeserializeOwned>(
        &self,
        rtxn: &RoTxn,
        db: &Database<Bytes, Bytes>,
        key: &str,
    ) -> WalletResult<Option<T>> {
        db.get(rtxn, key.as_bytes())?
            .map(|bytes| decode(key.as_bytes(), bytes))
            .transpose()
    }

    /// Register a mint, replacing its info when `info` is given.
    pub fn add_mint(&self, mint_url: &MintUrl, info: Option<MintInfo>) -> WalletResult<()> {
        let key = mint_url.to_string();
        let mut wtxn = self.env.write_txn()?;
        let exists = self.mints.get(&wtxn, key.as_bytes())?.is_some();
        if info.is_some() || !exists {
            self.mints.put(&mut wtxn, key.as_bytes(), &encode(&info)?)?;
        }
        wtxn.commit()?;
        Ok(())
    }

    pub fn get_mint(&self, mint_url: &MintUrl) -> WalletResult<Option<MintInfo>> {
        let rtxn = self.env.read_txn()?;
        let info: Option<Option<MintInfo>> = self.read(&rtxn, &self.mints, &mint_url.to_string())?;
        Ok(info.flatten())
    }

    pub fn get_mints(&self) -> WalletResult<BTreeMap<MintUrl, Option<MintInfo>>> {
        let rtxn = self.env.read_txn()?;
        let mut mints = BTreeMap::new();
        for entry in self.mints.iter(&rtxn)? {
            let (key, bytes) = entry?;
            let url = String::from_utf8_lossy(key)
                .parse::<MintUrl>()
                .map_err(|e| WalletError::StorageError(format!("Corrupt mint key: {}", e)))?;
            mints.insert(url, decode(key, bytes)?);
        }
        Ok(mints)
    }

    /// Store key-set descriptors for a mint, replacing any with the same id.
    pub fn add_mint_keysets(
        &self,
        mint_url: &MintUrl,
        keysets: Vec<KeySetInfo>,
    ) -> WalletResult<()> {
        let mut wtxn = self.env.write_txn()?;
        for info in keysets {
            let key = info.id.to_string();
            let record = KeysetRecord {
                mint_url: mint_url.clone(),
                info,
            };
            self.keysets.put(&mut wtxn, key.as_bytes(), &encode(&record)?)?;
        }
        wtxn.commit()?;
        Ok(())
    }

    pub fn get_mint_keysets(&self, mint_url: &MintUrl) -> WalletResult<Vec<KeySetInfo>> {
        let rtxn = self.env.read_txn()?;
        let mut keysets = Vec::new();
        for entry in self.keysets.iter(&rtxn)? {
            let (key, bytes) = entry?;
            let record: KeysetRecord = decode(key, bytes)?;
            if &record.mint_url == mint_url {
                keysets.push(record.info);
            }
        }
        Ok(keysets)
    }

    pub fn get_keyset_by_id(&self, id: &Id) -> WalletResult<Option<KeySetInfo>> {
        let rtxn = self.env.read_txn()?;
        let record: Option<KeysetRecord> = self.read(&rtxn, &self.keysets, &id.to_string())?;
        Ok(record.map(|record| record.info))
    }

    pub fn add_keys(&self, keyset: KeySet) -> WalletResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.keys
            .put(&mut wtxn, keyset.id.to_string().as_bytes(), &encode(&keyset.keys)?)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get_keys(&self, id: &Id) -> WalletResult<Option<Keys>> {
        let rtxn = self.env.read_txn()?;
        self.read(&rtxn, &self.keys, &id.to_string())
    }

    /// Unspent proofs held for (mint, unit).
    pub fn get_proofs(&self, mint_url: &MintUrl, unit: &CurrencyUnit) -> WalletResult<Vec<Proof>> {
        let rtxn = self.env.read_txn()?;
        let mut proofs = Vec::new();
        for entry in self.proofs.iter(&rtxn)? {
            let (key, bytes) = entry?;
            let record: ProofRecord = decode(key, bytes)?;
            if &record.mint_url == mint_url && &record.unit == unit {
                proofs.push(record.proof);
            }
        }
        Ok(proofs)
    }

    /// Add and remove proofs in one transaction. Re-adding a stored proof is
    /// a no-op; removing an unknown `Y` is ignored.
    pub fn update_proofs(
        &self,
        mint_url: &MintUrl,
        unit: &CurrencyUnit,
        added: Vec<Proof>,
        removed_ys: &[String],
    ) -> WalletResult<()> {
        let mut records = Vec::with_capacity(added.len());
        for proof in added {
            let y = proof.y()?.to_hex();
            let record = ProofRecord {
                mint_url: mint_url.clone(),
                unit: unit.clone(),
                proof,
            };
            records.push((y, encode(&record)?));
        }

        let mut wtxn = self.env.write_txn()?;
        for y in removed_ys {
            self.proofs.delete(&mut wtxn, y.as_bytes())?;
        }
        for (y, bytes) in records {
            if self.proofs.get(&wtxn, y.as_bytes())?.is_none() {
                self.proofs.put(&mut wtxn, y.as_bytes(), &bytes)?;
            }
        }
        wtxn.commit()?;
        Ok(())
    }

    /// Reserve `count` derivation counters and return the first one. The
    /// reservation is durable before any output using it is sent.
    pub fn increment_keyset_counter(&self, id: &Id, count: u32) -> WalletResult<u32> {
        let key = id.to_string();
        let mut wtxn = self.env.write_txn()?;
        let start = match self.counters.get(&wtxn, key.as_bytes())? {
            Some(bytes) => decode_counter(bytes)?,
            None => 0,
        };
        let next = start.checked_add(count).ok_or_else(|| {
            WalletError::StorageError(format!("Derivation counter overflow for {}", id))
        })?;
        self.counters
            .put(&mut wtxn, key.as_bytes(), &next.to_be_bytes())?;
        wtxn.commit()?;
        Ok(start)
    }

    /// Move the counter forward to `at_least`; never moves it back.
    pub fn advance_keyset_counter(&self, id: &Id, at_least: u32) -> WalletResult<()> {
        let key = id.to_string();
        let mut wtxn = self.env.write_txn()?;
        let current = match self.counters.get(&wtxn, key.as_bytes())? {
            Some(bytes) => decode_counter(bytes)?,
            None => 0,
        };
        if current < at_least {
            self.counters
                .put(&mut wtxn, key.as_bytes(), &at_least.to_be_bytes())?;
            wtxn.commit()?;
        }
        Ok(())
    }

    pub fn get_keyset_counter(&self, id: &Id) -> WalletResult<u32> {
        let rtxn = self.env.read_txn()?;
        match self.counters.get(&rtxn, id.to_string().as_bytes())? {
            Some(bytes) => decode_counter(bytes),
            None => Ok(0),
        }
    }
}
