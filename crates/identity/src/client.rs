//! Transport to the coordinating authority.
//!
//! [`WalletApi`] is the seam between the protocol and the network. The
//! reqwest-backed [`HttpWalletApi`] races each request against a fixed
//! timeout. A request that loses the race keeps running in the background
//! and its result is discarded. Nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use idwallet_core::ApiConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::api::{
    AcceptRequest, CheckAgeRequest, CheckAgeResponse, ClaimRequest, ClaimResponse, RegisterRequest,
    RegisterResponse, RejectRequest, ResetAnonymizingKeyRequest, ResetAnonymizingKeyResponse,
};
use crate::error::{ApiError, ApiErrorCode, ApiOperation};

/// Remote operations the wallet performs against the authority.
#[async_trait]
pub trait WalletApi: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError>;

    async fn reset_anonymizing_key(
        &self,
        request: &ResetAnonymizingKeyRequest,
    ) -> Result<ResetAnonymizingKeyResponse, ApiError>;

    async fn check_age(&self, request: &CheckAgeRequest) -> Result<CheckAgeResponse, ApiError>;

    async fn claim(&self, request: &ClaimRequest) -> Result<ClaimResponse, ApiError>;

    async fn accept(&self, request: &AcceptRequest) -> Result<(), ApiError>;

    async fn reject(&self, request: &RejectRequest) -> Result<(), ApiError>;
}

/// JSON-over-HTTP client for the authority's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpWalletApi {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpWalletApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `request` and return the raw response body of a 2xx reply.
    async fn post<Req: Serialize>(
        &self,
        operation: ApiOperation,
        request: &Req,
    ) -> Result<String, ApiError> {
        let body = serde_json::to_vec(request).map_err(|e| {
            ApiError::new(operation, ApiErrorCode::RequestFailed).with_body(e.to_string())
        })?;
        let url = format!("{}{}", self.base_url, operation.path());
        let client = self.client.clone();

        debug!(operation = %operation, url = %url, "Sending request");
        let task = tokio::spawn(async move {
            let response = client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        });

        let (status, text) = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                warn!(
                    operation = %operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Request timed out"
                );
                return Err(ApiError::new(operation, ApiErrorCode::Timeout));
            }
            Ok(Err(join_error)) => {
                return Err(ApiError::new(operation, ApiErrorCode::NetworkError)
                    .with_body(join_error.to_string()));
            }
            Ok(Ok(Err(transport_error))) => {
                warn!(operation = %operation, error = %transport_error, "Request failed");
                return Err(ApiError::new(operation, ApiErrorCode::NetworkError)
                    .with_body(transport_error.to_string()));
            }
            Ok(Ok(Ok(reply))) => reply,
        };

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::new(operation, ApiErrorCode::Unauthorized)
                .with_status(status.as_u16())
                .with_body(text));
        }
        if !status.is_success() {
            return Err(ApiError::new(operation, ApiErrorCode::RequestFailed)
                .with_status(status.as_u16())
                .with_body(text));
        }
        Ok(text)
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        operation: ApiOperation,
        request: &Req,
    ) -> Result<Resp, ApiError> {
        let text = self.post(operation, request).await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::new(operation, ApiErrorCode::InvalidResponse)
                .with_status(StatusCode::OK.as_u16())
                .with_body(format!("{e}: {text}"))
        })
    }
}

#[async_trait]
impl WalletApi for HttpWalletApi {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        self.post_json(ApiOperation::Register, request).await
    }

    async fn reset_anonymizing_key(
        &self,
        request: &ResetAnonymizingKeyRequest,
    ) -> Result<ResetAnonymizingKeyResponse, ApiError> {
        self.post_json(ApiOperation::ResetAnonymizingKey, request).await
    }

    async fn check_age(&self, request: &CheckAgeRequest) -> Result<CheckAgeResponse, ApiError> {
        self.post_json(ApiOperation::CheckAge, request).await
    }

    async fn claim(&self, request: &ClaimRequest) -> Result<ClaimResponse, ApiError> {
        self.post_json(ApiOperation::Claim, request).await
    }

    async fn accept(&self, request: &AcceptRequest) -> Result<(), ApiError> {
        self.post(ApiOperation::Accept, request).await.map(|_| ())
    }

    async fn reject(&self, request: &RejectRequest) -> Result<(), ApiError> {
        self.post(ApiOperation::Reject, request).await.map(|_| ())
    }
}
