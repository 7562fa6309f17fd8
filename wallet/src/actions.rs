//! Action surface used by the chat application. Every action resolves to
//! exactly one `Result<T, String>`; errors are rendered with `Display`.
use std::collections::BTreeMap;
use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::api::types::{BalanceMap, TokenPreview};
use crate::app_state::SharedWalletContext;
use crate::errors::{WalletError, WalletResult};
use crate::protocol::{Amount, MintInfo};
use crate::validation::InputValidator;

fn to_frontend_error(err: WalletError) -> String {
    err.to_string()
}

pub struct CashuActions {
    context: SharedWalletContext,
    validator: InputValidator,
}

impl CashuActions {
    pub fn new(context: SharedWalletContext) -> WalletResult<Self> {
        Ok(Self {
            context,
            validator: InputValidator::new()?,
        })
    }

    pub fn context(&self) -> &SharedWalletContext {
        &self.context
    }

    pub async fn set_default_mint(&self, mint_url: &str) -> Result<String, String> {
        self.validator
            .validate_mint_url(mint_url)
            .map_err(to_frontend_error)?;
        let url = self
            .context
            .set_default_mint(mint_url)
            .await
            .map_err(to_frontend_error)?;
        Ok(format!("Default mint set to {}", url))
    }

    pub fn default_mint(&self) -> Result<Option<String>, String> {
        Ok(self.context.default_mint().map(|url| url.to_string()))
    }

    pub async fn get_balance(&self, mint_url: Option<&str>) -> Result<u64, String> {
        self.context
            .get_balance(mint_url)
            .await
            .map(u64::from)
            .map_err(to_frontend_error)
    }

    pub async fn get_all_balances(&self) -> Result<BalanceMap, String> {
        let balances = self
            .context
            .get_all_balances()
            .await
            .map_err(to_frontend_error)?;
        Ok(balances
            .into_iter()
            .map(|(url, amount)| (url.to_string(), u64::from(amount)))
            .collect())
    }

    /// Returns the encoded `cashuB` token.
    pub async fn send(
        &self,
        amount_sats: u64,
        memo: Option<String>,
        lock_to_pubkey: Option<&str>,
    ) -> Result<String, String> {
        let amount = Amount::from(amount_sats);
        self.validator
            .validate_amount_value(amount)
            .map_err(to_frontend_error)?;
        if let Some(memo) = &memo {
            self.validator.validate_memo(memo).map_err(to_frontend_error)?;
        }
        if let Some(pubkey) = lock_to_pubkey {
            self.validator
                .validate_lock_pubkey(pubkey)
                .map_err(to_frontend_error)?;
        }

        let token = self
            .context
            .send(amount, memo, lock_to_pubkey)
            .await
            .map_err(to_frontend_error)?;
        Ok(token.to_string())
    }

    pub async fn receive(
        &self,
        token: &str,
        unlocking_key_hex: Option<&str>,
    ) -> Result<u64, String> {
        self.validator
            .validate_token(token)
            .map_err(to_frontend_error)?;
        if let Some(key) = unlocking_key_hex {
            self.validator
                .validate_private_key(key)
                .map_err(to_frontend_error)?;
        }
        self.context
            .receive(token, unlocking_key_hex)
            .await
            .map(u64::from)
            .map_err(to_frontend_error)
    }

    pub async fn list_mints(&self) -> Result<BTreeMap<String, Option<MintInfo>>, String> {
        let mints = self.context.list_mints().await.map_err(to_frontend_error)?;
        Ok(mints
            .into_iter()
            .map(|(url, info)| (url.to_string(), info))
            .collect())
    }

    pub async fn peek_seed(&self) -> Result<String, String> {
        self.context.peek_mnemonic().await.map_err(to_frontend_error)
    }

    pub fn decode_token_preview(&self, token: &str) -> Result<TokenPreview, String> {
        self.validator
            .validate_token(token)
            .map_err(to_frontend_error)?;
        self.context
            .decode_token_preview(token)
            .map_err(to_frontend_error)
    }

    pub async fn restore(&self, mint_url: Option<&str>) -> Result<u64, String> {
        self.context
            .restore(mint_url)
            .await
            .map(u64::from)
            .map_err(to_frontend_error)
    }

    pub async fn check_spent(&self, mint_url: Option<&str>) -> Result<u64, String> {
        self.context
            .check_spent(mint_url)
            .await
            .map(u64::from)
            .map_err(to_frontend_error)
    }
}

/// Calls the wrapped callback on drop if the action never completed, so a
/// caller waiting on it always hears back.
struct CallbackGuard<T, F>
where
    F: FnOnce(Result<T, String>),
{
    callback: Option<F>,
    _result: std::marker::PhantomData<fn(T)>,
}

impl<T, F> CallbackGuard<T, F>
where
    F: FnOnce(Result<T, String>),
{
    fn complete(mut self, result: Result<T, String>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl<T, F> Drop for CallbackGuard<T, F>
where
    F: FnOnce(Result<T, String>),
{
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err("action cancelled".to_string()));
        }
    }
}

/// Run `action` on `runtime` and hand its result to `callback` exactly once,
/// including when the task is cancelled or the runtime shuts down.
pub fn dispatch<T, Fut, F>(runtime: &Handle, action: Fut, callback: F) -> JoinHandle<()>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
    F: FnOnce(Result<T, String>) + Send + 'static,
{
    let guard = CallbackGuard {
        callback: Some(callback),
        _result: std::marker::PhantomData,
    };
    runtime.spawn(async move {
        let result = action.await;
        guard.complete(result);
    })
}
