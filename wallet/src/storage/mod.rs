pub mod database;
pub mod paths;
pub mod prefs;

pub use database::WalletStore;
pub use paths::WalletPaths;
pub use prefs::{SecurePrefs, KEY_DEFAULT_MINT, KEY_MNEMONIC};
