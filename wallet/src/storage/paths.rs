use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::errors::{WalletError, WalletResult};

/// Manages filesystem paths used by the wallet backend.
#[derive(Debug, Clone)]
pub struct WalletPaths {
    /// Root directory for wallet data.
    root_dir: PathBuf,
    /// Encrypted preferences (seed, default mint).
    prefs_file: PathBuf,
    /// LMDB directory holding proofs, key-sets and counters.
    database_dir: PathBuf,
    /// Directory for timestamped preference backups.
    backup_dir: PathBuf,
    /// Path to persisted wallet configuration.
    config_file: PathBuf,
}

impl WalletPaths {
    pub const DEFAULT_PREFS_FILENAME: &'static str = "cashu_prefs.vault";
    pub const DEFAULT_DATABASE_DIRNAME: &'static str = "cashu_wallet.lmdb";
    /// Backup file extension appended to timestamped backups.
    pub const BACKUP_EXTENSION: &'static str = "prefs.bak";

    /// Create a new path manager rooted at the provided directory.
    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageError(
                "Wallet root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            prefs_file: root_dir.join(Self::DEFAULT_PREFS_FILENAME),
            database_dir: root_dir.join(Self::DEFAULT_DATABASE_DIRNAME),
            backup_dir: root_dir.join("backups"),
            config_file: root_dir.join("wallet.config"),
            root_dir,
        })
    }

    /// Ensure the directory structure exists, creating missing folders.
    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.backup_dir)?;
        Ok(())
    }

    pub fn prefs_file(&self) -> &Path {
        &self.prefs_file
    }

    pub fn database_dir(&self) -> &Path {
        &self.database_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Copy the preferences file to a timestamped backup and return its path.
    pub fn create_prefs_backup(&self) -> WalletResult<PathBuf> {
        if !self.prefs_file.exists() {
            return Err(WalletError::NotFound(
                "Preferences file does not exist, cannot create backup".to_string(),
            ));
        }
        fs::create_dir_all(&self.backup_dir)?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let backup_filename = format!("cashu_{}.{}", timestamp, Self::BACKUP_EXTENSION);
        let backup_path = self.backup_dir.join(backup_filename);

        fs::copy(&self.prefs_file, &backup_path)?;

        let original_size = fs::metadata(&self.prefs_file)?.len();
        let backup_size = fs::metadata(&backup_path)?.len();
        if original_size != backup_size {
            fs::remove_file(&backup_path)?;
            return Err(WalletError::StorageError(
                "Backup verification failed: size mismatch".to_string(),
            ));
        }

        Ok(backup_path)
    }

    /// List preference backups, newest first.
    pub fn list_backups(&self) -> WalletResult<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            let is_backup = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(Self::BACKUP_EXTENSION))
                .unwrap_or(false);
            if path.is_file() && is_backup {
                backups.push(path);
            }
        }

        // Timestamped names sort chronologically.
        backups.sort();
        backups.reverse();
        Ok(backups)
    }

    /// Delete old backups, keeping only the N most recent.
    pub fn prune_old_backups(&self, keep_count: usize) -> WalletResult<usize> {
        let backups = self.list_backups()?;
        let mut deleted_count = 0;

        for backup_path in backups.iter().skip(keep_count) {
            fs::remove_file(backup_path)?;
            deleted_count += 1;
        }

        Ok(deleted_count)
    }
}
