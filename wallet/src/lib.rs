// lib.rs - Core library structure for the Cashu wallet

pub mod actions;
pub mod amount;
pub mod api;
pub mod app_state;
pub mod config_store;
pub mod errors;
pub mod mint_client;
pub mod protocol;
pub mod registry;
pub mod seed;
pub mod storage;
pub mod validation;
pub mod wallet;

// Re-export common types
pub use actions::{dispatch, CashuActions};
pub use api::types::{BalanceMap, TokenPreview};
pub use app_state::{SharedWalletContext, WalletContext};
pub use config_store::{ConfigStore, Environment, KdfConfig, NetworkConfig, WalletConfig};
pub use errors::{WalletError, WalletResult};
pub use mint_client::{ConnectorFactory, HttpMintClient, MintConnector};
pub use protocol::{
    Amount, CurrencyUnit, MintInfo, MintUrl, Proof, SpendingConditions, SplitTarget, Token,
};
pub use registry::WalletRegistry;
pub use seed::{SeedManager, WalletSeed};
pub use storage::{SecurePrefs, WalletPaths, WalletStore};
pub use validation::InputValidator;
pub use wallet::{
    PreparedSend, ProofLedger, ReceiveOptions, SendKind, SendOptions, Wallet, WalletOptions,
};
