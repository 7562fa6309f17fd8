//! HTTP client for the Cashu mint API (NUT-01/02/03/06/07/09).
//!
//! Every request carries the configured request and connect timeouts; a
//! timed-out or unreachable mint surfaces as `MintUnavailable`.
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config_store::NetworkConfig;
use crate::errors::{WalletError, WalletResult};
use crate::protocol::{
    CheckStateRequest, CheckStateResponse, Id, KeySet, KeySetInfo, KeysResponse, KeysetResponse,
    MintInfo, MintUrl, RestoreRequest, RestoreResponse, SwapRequest, SwapResponse,
};

/// Mint error code for inputs that were already redeemed.
pub const CODE_TOKEN_ALREADY_SPENT: u32 = 11001;

/// Error body of a failed mint request.
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    detail: Option<String>,
}

/// Operations a wallet needs from its mint.
#[async_trait]
pub trait MintConnector: Send + Sync {
    async fn get_mint_info(&self) -> WalletResult<MintInfo>;

    async fn get_mint_keysets(&self) -> WalletResult<Vec<KeySetInfo>>;

    async fn get_mint_keyset(&self, id: &Id) -> WalletResult<KeySet>;

    async fn post_swap(&self, request: SwapRequest) -> WalletResult<SwapResponse>;

    async fn post_check_state(&self, request: CheckStateRequest)
        -> WalletResult<CheckStateResponse>;

    async fn post_restore(&self, request: RestoreRequest) -> WalletResult<RestoreResponse>;
}

/// Builds a connector for a mint URL. Swapped out in tests.
pub type ConnectorFactory =
    Arc<dyn Fn(&MintUrl) -> WalletResult<Arc<dyn MintConnector>> + Send + Sync>;

/// Factory producing [`HttpMintClient`]s with shared network settings.
pub fn http_connector_factory(network: NetworkConfig) -> ConnectorFactory {
    Arc::new(move |mint_url: &MintUrl| {
        let client = HttpMintClient::new(mint_url.clone(), &network)?;
        Ok(Arc::new(client) as Arc<dyn MintConnector>)
    })
}

pub struct HttpMintClient {
    client: Client,
    mint_url: MintUrl,
}

impl HttpMintClient {
    pub fn new(mint_url: MintUrl, network: &NetworkConfig) -> WalletResult<Self> {
        let client = Client::builder()
            .timeout(network.request_timeout())
            .connect_timeout(network.connect_timeout())
            .build()
            .map_err(|e| {
                WalletError::MintUnavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, mint_url })
    }

    pub fn mint_url(&self) -> &MintUrl {
        &self.mint_url
    }

    fn endpoint(&self, path: &[&str]) -> WalletResult<String> {
        self.mint_url
            .join_paths(path)
            .map(|url| url.to_string())
            .map_err(|e| WalletError::ValidationError(format!("Bad mint endpoint: {}", e)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &[&str]) -> WalletResult<T> {
        let url = self.endpoint(path)?;
        log::debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&self.mint_url, e))?;
        self.parse(response).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &[&str],
        body: &B,
    ) -> WalletResult<T> {
        let url = self.endpoint(path)?;
        log::debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&self.mint_url, e))?;
        self.parse(response).await
    }

    async fn parse<T: DeserializeOwned>(&self, response: Response) -> WalletResult<T> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&self.mint_url, e))?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| {
                WalletError::InvalidResponse(format!("{} returned malformed JSON: {}", self.mint_url, e))
            });
        }
        Err(status_error(&self.mint_url, status, &body))
    }
}

fn transport_error(mint_url: &MintUrl, error: reqwest::Error) -> WalletError {
    if error.is_timeout() {
        WalletError::MintUnavailable(format!("{} timed out", mint_url))
    } else {
        WalletError::MintUnavailable(format!("{}: {}", mint_url, error))
    }
}

/// Map a non-2xx mint reply onto the wallet error taxonomy.
fn status_error(mint_url: &MintUrl, status: StatusCode, body: &[u8]) -> WalletError {
    if status.is_server_error() && serde_json::from_slice::<ErrorResponse>(body).is_err() {
        return WalletError::MintUnavailable(format!("{} responded with {}", mint_url, status));
    }

    let error: ErrorResponse = serde_json::from_slice(body).unwrap_or_default();
    let detail = error
        .detail
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    match error.code {
        Some(CODE_TOKEN_ALREADY_SPENT) => WalletError::AlreadySpent(detail),
        Some(code) => WalletError::MintError { code, detail },
        None if status.is_server_error() => {
            WalletError::MintUnavailable(format!("{} responded with {}", mint_url, status))
        }
        None => WalletError::MintError {
            code: u32::from(status.as_u16()),
            detail,
        },
    }
}

#[async_trait]
impl MintConnector for HttpMintClient {
    async fn get_mint_info(&self) -> WalletResult<MintInfo> {
        self.get(&["v1", "info"]).await
    }

    async fn get_mint_keysets(&self) -> WalletResult<Vec<KeySetInfo>> {
        let response: KeysetResponse = self.get(&["v1", "keysets"]).await?;
        Ok(response.keysets)
    }

    async fn get_mint_keyset(&self, id: &Id) -> WalletResult<KeySet> {
        let response: KeysResponse = self.get(&["v1", "keys", &id.to_string()]).await?;
        response
            .keysets
            .into_iter()
            .find(|keyset| &keyset.id == id)
            .ok_or_else(|| {
                WalletError::InvalidResponse(format!("{} did not return key-set {}", self.mint_url, id))
            })
    }

    async fn post_swap(&self, request: SwapRequest) -> WalletResult<SwapResponse> {
        self.post(&["v1", "swap"], &request).await
    }

    async fn post_check_state(
        &self,
        request: CheckStateRequest,
    ) -> WalletResult<CheckStateResponse> {
        self.post(&["v1", "checkstate"], &request).await
    }

    async fn post_restore(&self, request: RestoreRequest) -> WalletResult<RestoreResponse> {
        self.post(&["v1", "restore"], &request).await
    }
}
