//! Command line front end for the Cashu wallet core.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::SecretString;

use cashu_wallet_lib::{
    CashuActions, ConfigStore, Environment, WalletContext, WalletPaths,
};

/// Cashu ecash wallet
#[derive(Debug, Parser)]
#[command(version, about)]
struct Options {
    /// Directory holding prefs, database and config
    #[arg(long, env = "CASHU_WALLET_DIR", default_value = ".cashu-wallet")]
    data_dir: PathBuf,

    /// Passphrase protecting the encrypted prefs
    #[arg(long, env = "CASHU_WALLET_PASSPHRASE", hide_env_values = true)]
    passphrase: String,

    /// Log filter, overrides the configured level (RUST_LOG wins over both)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Set the mint used when none is given
    SetMint { url: String },

    /// Show the balance at one mint (default mint if omitted)
    Balance {
        #[arg(long)]
        mint: Option<String>,
    },

    /// Show balances at every known mint
    Balances,

    /// Create a token from the default mint
    Send {
        amount: u64,

        #[arg(long)]
        memo: Option<String>,

        /// Lock the token to this public key (hex, compressed or x-only)
        #[arg(long)]
        lock: Option<String>,
    },

    /// Redeem a token
    Receive {
        token: String,

        /// Private key (hex) for P2PK locked tokens
        #[arg(long)]
        key: Option<String>,
    },

    /// List known mints and their info
    Mints,

    /// Print the wallet mnemonic
    Seed,

    /// Decode a token without redeeming it
    Preview { token: String },

    /// Recover proofs from the seed, optionally importing a mnemonic first
    Restore {
        #[arg(long)]
        mint: Option<String>,

        #[arg(long)]
        mnemonic: Option<String>,
    },

    /// Drop proofs the mint reports as spent
    Check {
        #[arg(long)]
        mint: Option<String>,
    },
}

fn init_logging(options: &Options) -> anyhow::Result<()> {
    let paths = WalletPaths::new(&options.data_dir)?;
    paths.ensure_directories()?;
    let mut config = ConfigStore::from_paths(&paths).load_or_default(Environment::from_env())?;
    config.apply_env_overrides();

    let level = options
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    init_logging(&options)?;

    let passphrase = SecretString::from(options.passphrase.clone());
    let context = WalletContext::initialize(options.data_dir.clone(), &passphrase)?;
    let actions = CashuActions::new(Arc::new(context))?;

    match options.cmd {
        Command::SetMint { url } => {
            let message = actions.set_default_mint(&url).await.map_err(anyhow::Error::msg)?;
            println!("{}", message);
        }
        Command::Balance { mint } => {
            let balance = actions
                .get_balance(mint.as_deref())
                .await
                .map_err(anyhow::Error::msg)?;
            println!("{} sat", balance);
        }
        Command::Balances => {
            let balances = actions.get_all_balances().await.map_err(anyhow::Error::msg)?;
            if balances.is_empty() {
                println!("No reachable mints with a balance");
            }
            for (mint, balance) in balances {
                println!("{}\t{} sat", mint, balance);
            }
        }
        Command::Send { amount, memo, lock } => {
            let token = actions
                .send(amount, memo, lock.as_deref())
                .await
                .map_err(anyhow::Error::msg)?;
            println!("{}", token);
        }
        Command::Receive { token, key } => {
            let amount = actions
                .receive(&token, key.as_deref())
                .await
                .map_err(anyhow::Error::msg)?;
            println!("Received {} sat", amount);
        }
        Command::Mints => {
            let mints = actions.list_mints().await.map_err(anyhow::Error::msg)?;
            println!("{}", serde_json::to_string_pretty(&mints)?);
        }
        Command::Seed => {
            let mnemonic = actions.peek_seed().await.map_err(anyhow::Error::msg)?;
            println!("{}", mnemonic);
        }
        Command::Preview { token } => {
            let preview = actions
                .decode_token_preview(&token)
                .map_err(anyhow::Error::msg)?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        Command::Restore { mint, mnemonic } => {
            if let Some(phrase) = mnemonic {
                actions.context().import_mnemonic(&phrase)?;
            }
            let amount = actions
                .restore(mint.as_deref())
                .await
                .map_err(anyhow::Error::msg)?;
            println!("Restored {} sat", amount);
        }
        Command::Check { mint } => {
            let amount = actions
                .check_spent(mint.as_deref())
                .await
                .map_err(anyhow::Error::msg)?;
            println!("Removed {} sat of spent proofs", amount);
        }
    }

    Ok(())
}
