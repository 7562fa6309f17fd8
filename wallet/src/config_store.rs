use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::storage::WalletPaths;

const CONFIG_VERSION: u16 = 1;

pub const ENV_ENVIRONMENT: &str = "CASHU_WALLET_ENV";
const ENV_REQUEST_TIMEOUT: &str = "CASHU_REQUEST_TIMEOUT_SECS";
const ENV_TARGET_PROOF_COUNT: &str = "CASHU_TARGET_PROOF_COUNT";
const ENV_LOG_LEVEL: &str = "CASHU_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    /// Read `CASHU_WALLET_ENV`, defaulting to production.
    pub fn from_env() -> Self {
        match std::env::var(ENV_ENVIRONMENT)
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "test" | "testing" => Environment::Test,
            "development" | "dev" => Environment::Development,
            _ => Environment::Production,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Upper bound on the best-effort mint refresh during wallet creation.
    pub refresh_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            refresh_timeout_secs: 10,
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletSettings {
    /// Preferred number of proofs held per denomination when minting change.
    pub target_proof_count: Option<usize>,
    /// Mint enough for the receiver to pay the input fee on redemption.
    pub include_fee: bool,
    pub max_proofs: Option<usize>,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            target_proof_count: Some(3),
            include_fee: true,
            max_proofs: None,
        }
    }
}

/// Argon2 cost for the encrypted preferences file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfConfig {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl KdfConfig {
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            // Fast enough for unit tests; never used for real funds.
            Environment::Test => Self {
                m_cost_kib: 8,
                t_cost: 1,
                p_cost: 1,
            },
            _ => Self {
                m_cost_kib: 64 * 1024,
                t_cost: 3,
                p_cost: 1,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletConfig {
    pub network: NetworkConfig,
    pub wallet: WalletSettings,
    pub kdf: KdfConfig,
    pub log_level: String,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl WalletConfig {
    pub fn new(environment: Environment) -> Self {
        Self {
            network: NetworkConfig::default(),
            wallet: WalletSettings::default(),
            kdf: KdfConfig::for_environment(environment),
            log_level: "info".to_string(),
            environment: environment.as_str().to_string(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Apply `CASHU_*` environment overrides. Unparseable values are ignored
    /// with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(ENV_REQUEST_TIMEOUT) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.network.request_timeout_secs = secs,
                _ => log::warn!("Ignoring invalid {}={}", ENV_REQUEST_TIMEOUT, raw),
            }
        }
        if let Ok(raw) = std::env::var(ENV_TARGET_PROOF_COUNT) {
            match raw.trim().parse::<usize>() {
                Ok(0) => self.wallet.target_proof_count = None,
                Ok(count) => self.wallet.target_proof_count = Some(count),
                Err(_) => log::warn!("Ignoring invalid {}={}", ENV_TARGET_PROOF_COUNT, raw),
            }
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.trim().is_empty() {
                log::debug!("Log level overridden to {}", level.trim());
                self.log_level = level.trim().to_string();
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: WalletConfig,
    modified_at_unix: i64,
}

/// Handles persistence of wallet configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file().to_path_buf(),
        }
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: Environment) -> WalletResult<WalletConfig> {
        if !self.path.exists() {
            let config = WalletConfig::new(environment);
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(WalletError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &WalletConfig) -> WalletResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| WalletError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    pub fn update<F>(&self, environment: Environment, updater: F) -> WalletResult<WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &WalletConfig) -> WalletResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    hasher.update(&serde_json::to_vec(config)?);
    Ok(*hasher.finalize().as_bytes())
}
