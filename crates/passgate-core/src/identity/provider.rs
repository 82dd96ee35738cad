//! ============================================================================
//! Identity Provider - Bearer credential to wallet resolution
//! ============================================================================
//! The provider is an external collaborator. `PrivyClient` talks to a
//! Privy-style REST API: the bearer token goes in `Authorization`, the app id
//! in `privy-app-id`, and the wallet is taken from the first linked account of
//! type `wallet`.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ExternalServiceKind, GateError, GateResult};
use crate::types::Address;

const SERVICE: &str = "identity provider";

/// Identity as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub wallet_address: Address,
    pub user_id: String,
    pub email: Option<String>,
}

/// Resolves bearer credentials to wallet identities
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange a bearer credential for the identity behind it
    async fn resolve(&self, bearer_token: &str) -> GateResult<ResolvedIdentity>;

    /// Connectivity check; any HTTP answer counts as reachable
    async fn ping(&self) -> GateResult<()>;

    /// Check that the configured app credentials are accepted
    async fn validate_credentials(&self) -> GateResult<()>;
}

/// Provider user record
#[derive(Debug, Clone, Deserialize)]
struct ProviderUser {
    id: String,
    #[serde(default)]
    linked_accounts: Vec<LinkedAccount>,
}

/// Account linked to a provider user (wallet, email, social)
#[derive(Debug, Clone, Deserialize)]
struct LinkedAccount {
    #[serde(rename = "type")]
    account_type: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// REST client for a Privy-style identity provider
pub struct PrivyClient {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
}

impl PrivyClient {
    pub fn new(base_url: &str, app_id: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("passgate/1.0")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id: app_id.to_string(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn extract_identity(user: ProviderUser) -> GateResult<ResolvedIdentity> {
        let wallet = user
            .linked_accounts
            .iter()
            .find(|a| a.account_type == "wallet")
            .and_then(|a| a.address.as_deref())
            .ok_or_else(|| {
                GateError::Authentication(format!("user {} has no linked wallet", user.id))
            })?;

        let email = user
            .linked_accounts
            .iter()
            .find(|a| a.account_type == "email")
            .and_then(|a| a.email.clone());

        Ok(ResolvedIdentity {
            wallet_address: Address::parse(wallet)?,
            user_id: user.id,
            email,
        })
    }
}

#[async_trait]
impl IdentityProvider for PrivyClient {
    async fn resolve(&self, bearer_token: &str) -> GateResult<ResolvedIdentity> {
        let url = format!("{}/api/v1/users/me", self.base_url);
        debug!("Resolving bearer credential via {}", url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", bearer_token))
            .header("privy-app-id", &self.app_id)
            .send()
            .await
            .map_err(|e| GateError::from_transport(SERVICE, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(GateError::external(
                SERVICE,
                ExternalServiceKind::Rejected,
                "credential is invalid or expired",
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GateError::external(
                SERVICE,
                ExternalServiceKind::Status(status.as_u16()),
                body,
            ));
        }

        let user: ProviderUser = response.json().await.map_err(|e| {
            GateError::external(SERVICE, ExternalServiceKind::Malformed, e.to_string())
        })?;

        let identity = Self::extract_identity(user)?;
        info!(
            "Resolved user {} to wallet {}",
            identity.user_id, identity.wallet_address
        );
        Ok(identity)
    }

    async fn ping(&self) -> GateResult<()> {
        self.client
            .get(&self.base_url)
            .send()
            .await
            .map_err(|e| GateError::from_transport(SERVICE, e))?;
        Ok(())
    }

    async fn validate_credentials(&self) -> GateResult<()> {
        let url = format!("{}/api/v1/apps/{}", self.base_url, self.app_id);

        let response = self
            .client
            .get(&url)
            .header("privy-app-id", &self.app_id)
            .send()
            .await
            .map_err(|e| GateError::from_transport(SERVICE, e))?;

        match response.status().as_u16() {
            200..=299 => {
                let shown: String = self.app_id.chars().take(8).collect();
                info!("Identity provider accepted app id {}...", shown);
                Ok(())
            }
            401 | 403 | 404 => {
                warn!("Identity provider rejected the configured app id");
                Err(GateError::external(
                    SERVICE,
                    ExternalServiceKind::Rejected,
                    "app id was not accepted",
                ))
            }
            code => {
                let body = response.text().await.unwrap_or_default();
                Err(GateError::external(SERVICE, ExternalServiceKind::Status(code), body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PrivyClient {
        PrivyClient::new(&server.uri(), "app-test-123", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_resolve_extracts_wallet_and_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/me"))
            .and(header("Authorization", "Bearer good-token"))
            .and(header("privy-app-id", "app-test-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "did:privy:abc",
                "linked_accounts": [
                    {"type": "email", "email": "dev@example.com"},
                    {"type": "wallet", "address": "0x17eDfB8a794ec4f13190401EF7aF1c17f3cc90c5", "chain_type": "ethereum"}
                ]
            })))
            .mount(&server)
            .await;

        let identity = client(&server).resolve("good-token").await.unwrap();
        assert_eq!(identity.user_id, "did:privy:abc");
        assert_eq!(
            identity.wallet_address,
            Address::parse("0x17edfb8a794ec4f13190401ef7af1c17f3cc90c5").unwrap()
        );
        assert_eq!(identity.email.as_deref(), Some("dev@example.com"));
    }

    #[tokio::test]
    async fn test_resolve_unauthorized_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).resolve("expired").await.unwrap_err();
        assert!(matches!(
            err,
            GateError::ExternalService { kind: ExternalServiceKind::Rejected, .. }
        ));
    }

    #[tokio::test]
    async fn test_resolve_without_wallet_fails_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "did:privy:nowallet",
                "linked_accounts": [{"type": "email", "email": "a@b.c"}]
            })))
            .mount(&server)
            .await;

        let err = client(&server).resolve("token").await.unwrap_err();
        assert!(matches!(err, GateError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_resolve_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server).resolve("token").await.unwrap_err();
        assert!(matches!(
            err,
            GateError::ExternalService { kind: ExternalServiceKind::Malformed, .. }
        ));
    }

    #[tokio::test]
    async fn test_validate_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/apps/app-test-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "app-test-123"})))
            .mount(&server)
            .await;

        assert!(client(&server).validate_credentials().await.is_ok());

        let bad = PrivyClient::new(&server.uri(), "unknown-app", Duration::from_secs(5));
        let err = bad.validate_credentials().await.unwrap_err();
        assert!(matches!(
            err,
            GateError::ExternalService { kind: ExternalServiceKind::Status(404), .. }
                | GateError::ExternalService { kind: ExternalServiceKind::Rejected, .. }
        ));
    }

    #[tokio::test]
    async fn test_ping_unreachable() {
        let dead = PrivyClient::new("http://127.0.0.1:9", "app", Duration::from_secs(2));
        let err = dead.ping().await.unwrap_err();
        match err {
            GateError::ExternalService { kind, .. } => assert!(kind.is_service_down()),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
