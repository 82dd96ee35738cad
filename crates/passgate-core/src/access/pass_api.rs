//! ============================================================================
//! Pass API - Hosted access-pass lookup service
//! ============================================================================
//! REST client for the hosted pass-check API used by the startup gate:
//! `GET /nft/check/{wallet}` and `POST /test/send`. Non-200 responses and
//! malformed JSON are hard errors.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{AccessDenied, ExternalServiceKind, GateError, GateResult};
use crate::types::Address;

const SERVICE: &str = "pass API";

/// Pass details reported by the API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCheck {
    pub has_nft: bool,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct PassCheckResponse {
    success: bool,
    #[serde(default)]
    data: PassCheck,
    #[serde(default)]
    error: Option<String>,
}

/// Result of a connectivity test message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSend {
    pub test_id: String,
    pub status: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct TestSendResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: TestSend,
}

#[derive(Debug, Serialize)]
struct TestSendRequest<'a> {
    message: &'a str,
    timestamp: i64,
    source: &'a str,
    wallet: String,
}

/// Client for the hosted pass API
pub struct PassApiClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl PassApiClient {
    pub fn new(base_url: &str, bearer_token: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("passgate/1.0")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> GateResult<T> {
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let kind = if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                ExternalServiceKind::Rejected
            } else {
                ExternalServiceKind::Status(status.as_u16())
            };
            return Err(GateError::external(SERVICE, kind, body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GateError::from_transport(SERVICE, e))?;
        serde_json::from_str(&body)
            .map_err(|e| GateError::external(SERVICE, ExternalServiceKind::Malformed, e.to_string()))
    }

    /// Raw pass lookup for `wallet`
    pub async fn check_pass(&self, wallet: &Address) -> GateResult<PassCheck> {
        let url = format!("{}/nft/check/{}", self.base_url, wallet.to_checksum());
        debug!("Checking pass via {}", url);

        let response = self
            .authorize(self.client.get(&url))
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| GateError::from_transport(SERVICE, e))?;

        let parsed: PassCheckResponse = Self::read_json(response).await?;
        if !parsed.success {
            return Err(GateError::external(
                SERVICE,
                ExternalServiceKind::Rejected,
                parsed.error.unwrap_or_else(|| "lookup unsuccessful".to_string()),
            ));
        }
        Ok(parsed.data)
    }

    /// Pass lookup that fails with `NoAccess` when the wallet holds nothing
    pub async fn validate_wallet(&self, wallet: &Address) -> GateResult<PassCheck> {
        let check = self.check_pass(wallet).await?;
        if !check.has_nft {
            return Err(AccessDenied::NoAccess {
                wallet: wallet.to_string(),
            }
            .into());
        }

        info!(
            "Pass validated for {}: token {} tier {}",
            wallet.short(),
            check.token_id.as_deref().unwrap_or("?"),
            check.tier.as_deref().unwrap_or("?")
        );
        Ok(check)
    }

    /// Send a connectivity test message on behalf of `wallet`
    pub async fn send_test(&self, message: &str, wallet: &Address) -> GateResult<TestSend> {
        let url = format!("{}/test/send", self.base_url);
        let request = TestSendRequest {
            message,
            timestamp: chrono::Utc::now().timestamp(),
            source: "passgate",
            wallet: wallet.to_checksum(),
        };

        let response = self
            .authorize(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| GateError::from_transport(SERVICE, e))?;

        let parsed: TestSendResponse = Self::read_json(response).await?;
        if !parsed.success {
            return Err(GateError::external(
                SERVICE,
                ExternalServiceKind::Rejected,
                parsed.message.unwrap_or_else(|| "test send unsuccessful".to_string()),
            ));
        }

        info!(
            "Test message accepted: {} ({})",
            parsed.data.test_id, parsed.data.status
        );
        Ok(parsed.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn wallet() -> Address {
        Address::from_bytes([0x17; 20])
    }

    fn client(server: &MockServer, token: Option<&str>) -> PassApiClient {
        PassApiClient::new(&server.uri(), token.map(str::to_string), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_check_pass_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/nft/check/{}", wallet().to_checksum())))
            .and(header("Authorization", "Bearer wallet-token"))
            .and(header("User-Agent", "passgate/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "has_nft": true,
                    "token_id": "42",
                    "tier": "pro",
                    "is_active": true,
                    "expires_at": 0
                }
            })))
            .mount(&server)
            .await;

        let check = client(&server, Some("wallet-token"))
            .validate_wallet(&wallet())
            .await
            .unwrap();
        assert!(check.has_nft);
        assert_eq!(check.token_id.as_deref(), Some("42"));
        assert_eq!(check.tier.as_deref(), Some("pro"));
    }

    #[tokio::test]
    async fn test_wallet_without_pass_is_no_access() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "has_nft": false }
            })))
            .mount(&server)
            .await;

        let err = client(&server, None).validate_wallet(&wallet()).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::AccessDenied(AccessDenied::NoAccess { .. })
        ));
    }

    #[tokio::test]
    async fn test_non_200_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(&server, None).check_pass(&wallet()).await.unwrap_err();
        match err {
            GateError::ExternalService { kind, .. } => {
                assert_eq!(kind, ExternalServiceKind::Status(503));
                assert!(kind.is_service_down());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_json_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/test/send"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let err = client(&server, None)
            .send_test("ping", &wallet())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::ExternalService {
                kind: ExternalServiceKind::Malformed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_send_test_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/test/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "queued",
                "data": { "test_id": "t-1", "status": "queued", "timestamp": 1700000000 }
            })))
            .mount(&server)
            .await;

        let sent = client(&server, None).send_test("ping", &wallet()).await.unwrap();
        assert_eq!(sent.test_id, "t-1");
        assert_eq!(sent.timestamp, 1_700_000_000);
    }
}
