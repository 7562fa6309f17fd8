//! In-process mint for integration tests. Signs with real BDHKE keys, issues
//! DLEQ proofs, tracks spent secrets and answers restore requests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cashu::dhke::{hash_to_curve, sign_message, verify_message};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;

use cashu_wallet_lib::mint_client::{ConnectorFactory, MintConnector};
use cashu_wallet_lib::protocol::{
    BlindSignature, BlindedMessage, CheckStateRequest, CheckStateResponse, Id, KeySet, KeySetInfo,
    Keys, Nut10Secret, PublicKey, RestoreRequest, RestoreResponse, Secret, SecretKey, SwapRequest,
    SwapResponse,
};
use cashu_wallet_lib::{
    Amount, ConfigStore, CurrencyUnit, Environment, MintInfo, MintUrl, Proof, SpendingConditions,
    Token, WalletContext, WalletError, WalletPaths, WalletResult,
};

pub const PASSPHRASE: &str = "correct horse battery staple";
const MAX_ORDER: u32 = 20;

#[derive(Default)]
struct MintState {
    spent: HashSet<PublicKey>,
    issued: HashMap<PublicKey, BlindSignature>,
    offline: bool,
    /// Added before answering the info request.
    info_delay: Option<Duration>,
    swaps: usize,
    check_state_calls: usize,
}

pub struct FakeMint {
    url: MintUrl,
    keyset_id: Id,
    private_keys: BTreeMap<Amount, SecretKey>,
    keys: Keys,
    input_fee_ppk: u64,
    state: Mutex<MintState>,
}

impl FakeMint {
    pub fn new(url: &str) -> Arc<Self> {
        Self::with_fee(url, 0)
    }

    pub fn with_fee(url: &str, input_fee_ppk: u64) -> Arc<Self> {
        let mut private_keys = BTreeMap::new();
        let mut public_keys = BTreeMap::new();
        for order in 0..=MAX_ORDER {
            let amount = Amount::from(1u64 << order);
            let key = SecretKey::generate();
            public_keys.insert(amount, key.public_key());
            private_keys.insert(amount, key);
        }
        let keys = Keys::new(public_keys);
        Arc::new(Self {
            url: MintUrl::from_str(url).unwrap(),
            keyset_id: Id::v1_from_keys(&keys),
            private_keys,
            keys,
            input_fee_ppk,
            state: Mutex::new(MintState::default()),
        })
    }

    pub fn url(&self) -> &MintUrl {
        &self.url
    }

    pub fn set_online(&self, online: bool) {
        self.state.lock().offline = !online;
    }

    /// Make the info endpoint stall for `delay`, as a mint that accepts the
    /// connection but never answers.
    pub fn set_info_delay(&self, delay: Option<Duration>) {
        self.state.lock().info_delay = delay;
    }

    pub fn swap_count(&self) -> usize {
        self.state.lock().swaps
    }

    pub fn check_state_count(&self) -> usize {
        self.state.lock().check_state_calls
    }

    fn ensure_online(&self) -> WalletResult<()> {
        if self.state.lock().offline {
            return Err(WalletError::MintUnavailable(format!(
                "{} timed out",
                self.url
            )));
        }
        Ok(())
    }

    fn private_key(&self, amount: Amount) -> WalletResult<&SecretKey> {
        self.private_keys
            .get(&amount)
            .ok_or_else(|| WalletError::MintError {
                code: 11005,
                detail: format!("no key for amount {}", amount),
            })
    }

    /// `C_ = kB_` with a DLEQ proof.
    fn sign(&self, message: &BlindedMessage) -> WalletResult<BlindSignature> {
        let k = self.private_key(message.amount)?;
        let c = sign_message(k, &message.blinded_secret)?;
        BlindSignature::new(
            message.amount,
            c,
            self.keyset_id,
            &message.blinded_secret,
            k.clone(),
        )
        .map_err(|e| WalletError::CryptoError(e.to_string()))
    }

    fn proof_for_secret(&self, amount: u64, secret: Secret) -> Proof {
        let k = &self.private_keys[&Amount::from(amount)];
        let y = hash_to_curve(secret.as_bytes()).unwrap();
        let c = sign_message(k, &y).unwrap();
        Proof::new(Amount::from(amount), self.keyset_id, secret, c)
    }

    /// Proofs issued out of band, as if paid for over Lightning.
    pub fn issue(&self, amounts: &[u64]) -> Vec<Proof> {
        amounts
            .iter()
            .map(|amount| self.proof_for_secret(*amount, Secret::generate()))
            .collect()
    }

    pub fn issue_token(&self, amounts: &[u64]) -> String {
        Token::new(self.url.clone(), self.issue(amounts), None, CurrencyUnit::Sat).to_string()
    }

    /// Token whose proofs are locked to `pubkey`.
    pub fn issue_locked_token(&self, amounts: &[u64], pubkey: PublicKey) -> String {
        let proofs = amounts
            .iter()
            .map(|amount| {
                let nut10: Nut10Secret = SpendingConditions::new_p2pk(pubkey, None).into();
                self.proof_for_secret(*amount, nut10.try_into().unwrap())
            })
            .collect();
        Token::new(self.url.clone(), proofs, None, CurrencyUnit::Sat).to_string()
    }

    fn verify_input(&self, proof: &Proof) -> WalletResult<PublicKey> {
        if proof.keyset_id != self.keyset_id {
            return Err(WalletError::MintError {
                code: 12001,
                detail: "unknown key-set".to_string(),
            });
        }
        let k = self.private_key(proof.amount)?;
        verify_message(k, proof.c, proof.secret.as_bytes()).map_err(|_| {
            WalletError::MintError {
                code: 10003,
                detail: "proof could not be verified".to_string(),
            }
        })?;
        if Nut10Secret::try_from(proof.secret.clone()).is_ok() {
            proof.verify_p2pk().map_err(|e| WalletError::MintError {
                code: 10001,
                detail: e.to_string(),
            })?;
        }
        Ok(proof.y()?)
    }

    fn keyset_info(&self) -> KeySetInfo {
        serde_json::from_value(json!({
            "id": self.keyset_id,
            "unit": "sat",
            "active": true,
            "input_fee_ppk": self.input_fee_ppk,
        }))
        .unwrap()
    }
}

#[async_trait]
impl MintConnector for FakeMint {
    async fn get_mint_info(&self) -> WalletResult<MintInfo> {
        let delay = self.state.lock().info_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_online()?;
        Ok(MintInfo {
            name: Some("Fake Mint".to_string()),
            motd: Some("testing only".to_string()),
            ..MintInfo::default()
        })
    }

    async fn get_mint_keysets(&self) -> WalletResult<Vec<KeySetInfo>> {
        self.ensure_online()?;
        Ok(vec![self.keyset_info()])
    }

    async fn get_mint_keyset(&self, id: &Id) -> WalletResult<KeySet> {
        self.ensure_online()?;
        if id != &self.keyset_id {
            return Err(WalletError::MintError {
                code: 12001,
                detail: "unknown key-set".to_string(),
            });
        }
        Ok(serde_json::from_value(json!({
            "id": self.keyset_id,
            "unit": "sat",
            "keys": self.keys,
        }))
        .unwrap())
    }

    async fn post_swap(&self, request: SwapRequest) -> WalletResult<SwapResponse> {
        self.ensure_online()?;

        let mut ys = Vec::with_capacity(request.inputs().len());
        for proof in request.inputs() {
            let y = self.verify_input(proof)?;
            if ys.contains(&y) {
                return Err(WalletError::MintError {
                    code: 11007,
                    detail: "duplicate inputs".to_string(),
                });
            }
            ys.push(y);
        }

        let inputs: u64 = request.inputs().iter().map(|p| u64::from(p.amount)).sum();
        let outputs: u64 = request.outputs().iter().map(|o| u64::from(o.amount)).sum();
        let fee = (self.input_fee_ppk * request.inputs().len() as u64).div_ceil(1000);
        if inputs != outputs + fee {
            return Err(WalletError::MintError {
                code: 11002,
                detail: format!("unbalanced: {} in, {} out, fee {}", inputs, outputs, fee),
            });
        }

        let mut state = self.state.lock();
        if ys.iter().any(|y| state.spent.contains(y)) {
            return Err(WalletError::AlreadySpent("Token already spent.".to_string()));
        }
        if request
            .outputs()
            .iter()
            .any(|o| state.issued.contains_key(&o.blinded_secret))
        {
            return Err(WalletError::MintError {
                code: 10002,
                detail: "Blinded message of output already signed".to_string(),
            });
        }

        let signatures = request
            .outputs()
            .iter()
            .map(|o| self.sign(o))
            .collect::<WalletResult<Vec<_>>>()?;
        state.spent.extend(ys);
        for (output, signature) in request.outputs().iter().zip(&signatures) {
            state
                .issued
                .insert(output.blinded_secret, signature.clone());
        }
        state.swaps += 1;
        Ok(SwapResponse { signatures })
    }

    async fn post_check_state(
        &self,
        request: CheckStateRequest,
    ) -> WalletResult<CheckStateResponse> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        state.check_state_calls += 1;
        let states: Vec<_> = request
            .ys
            .iter()
            .map(|y| {
                json!({
                    "Y": y,
                    "state": if state.spent.contains(y) { "SPENT" } else { "UNSPENT" },
                    "witness": null,
                })
            })
            .collect();
        Ok(serde_json::from_value(json!({ "states": states })).unwrap())
    }

    async fn post_restore(&self, request: RestoreRequest) -> WalletResult<RestoreResponse> {
        self.ensure_online()?;
        let state = self.state.lock();
        let mut outputs = Vec::new();
        let mut signatures = Vec::new();
        for output in request.outputs {
            if let Some(signature) = state.issued.get(&output.blinded_secret) {
                signatures.push(signature.clone());
                outputs.push(output);
            }
        }
        Ok(serde_json::from_value(json!({
            "outputs": outputs,
            "signatures": signatures,
        }))
        .unwrap())
    }
}

/// Factory over a fixed set of fake mints; counts how often it is called.
pub fn factory(mints: &[Arc<FakeMint>], calls: Arc<AtomicUsize>) -> ConnectorFactory {
    let mints: Vec<Arc<FakeMint>> = mints.to_vec();
    Arc::new(move |url: &MintUrl| {
        calls.fetch_add(1, Ordering::SeqCst);
        mints
            .iter()
            .find(|mint| mint.url() == url)
            .map(|mint| Arc::clone(mint) as Arc<dyn MintConnector>)
            .ok_or_else(|| WalletError::MintUnavailable(format!("no route to {}", url)))
    })
}

pub fn setup() {
    std::env::set_var("CASHU_WALLET_ENV", "test");
}

pub fn open_context(dir: &TempDir, mints: &[Arc<FakeMint>]) -> Arc<WalletContext> {
    open_context_counting(dir, mints, Arc::new(AtomicUsize::new(0)))
}

/// Context whose wallet creation gives up on a silent mint after
/// `refresh_timeout_secs`.
pub fn open_context_with_refresh_timeout(
    dir: &TempDir,
    mints: &[Arc<FakeMint>],
    refresh_timeout_secs: u64,
) -> Arc<WalletContext> {
    setup();
    let paths = WalletPaths::new(dir.path()).unwrap();
    paths.ensure_directories().unwrap();
    ConfigStore::from_paths(&paths)
        .update(Environment::Test, |config| {
            config.network.refresh_timeout_secs = refresh_timeout_secs;
            Ok(())
        })
        .unwrap();
    open_context(dir, mints)
}

pub fn open_context_counting(
    dir: &TempDir,
    mints: &[Arc<FakeMint>],
    calls: Arc<AtomicUsize>,
) -> Arc<WalletContext> {
    setup();
    let context = WalletContext::initialize_with_connector(
        dir.path().to_path_buf(),
        &SecretString::from(PASSPHRASE.to_string()),
        factory(mints, calls),
    )
    .unwrap();
    Arc::new(context)
}
