//! ============================================================================
//! Identity Resolver - Produces VerifiedWallet values
//! ============================================================================
//! Two ways in: a signed message checked locally, or a bearer credential
//! exchanged with the identity provider. Every failure surfaces as an
//! authentication error; the provider detail is kept in the message so a
//! caller can tell "provider down" from "bad credential".
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, warn};

use super::provider::IdentityProvider;
use super::signature::{recover_address, WalletSignature};
use crate::error::{GateError, GateResult};
use crate::types::{Address, VerifiedWallet};

/// Verifies wallet control for incoming requests
#[derive(Clone, Default)]
pub struct IdentityResolver {
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl IdentityResolver {
    /// Resolver that only verifies signatures
    pub fn new() -> Self {
        Self { provider: None }
    }

    /// Resolver that can also exchange bearer credentials
    pub fn with_provider(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    pub fn provider(&self) -> Option<&Arc<dyn IdentityProvider>> {
        self.provider.as_ref()
    }

    /// True when `signature` over `message` recovers to `address`
    pub fn verify_signature(&self, address: &Address, signature: &[u8], message: &[u8]) -> bool {
        super::signature::verify_signature(address, signature, message)
    }

    /// Verify a signed message and produce a `VerifiedWallet`
    pub fn verify_wallet(&self, signed: &WalletSignature, message: &[u8]) -> GateResult<VerifiedWallet> {
        let recovered = recover_address(message, &signed.signature)?;
        if recovered != signed.address {
            warn!(
                "Signature for {} recovered to {}",
                signed.address.short(),
                recovered.short()
            );
            return Err(GateError::Authentication(format!(
                "signature does not belong to {}",
                signed.address
            )));
        }
        debug!("Verified wallet {} by signature", recovered.short());
        Ok(VerifiedWallet::new(recovered))
    }

    /// Exchange a bearer credential for a `VerifiedWallet`
    pub async fn authenticate(&self, bearer_token: &str) -> GateResult<VerifiedWallet> {
        if bearer_token.trim().is_empty() {
            return Err(GateError::Authentication("missing bearer credential".to_string()));
        }

        let provider = self.provider.as_ref().ok_or_else(|| {
            GateError::Authentication("no identity provider configured".to_string())
        })?;

        let identity = provider.resolve(bearer_token).await.map_err(|e| {
            let down = matches!(&e, GateError::ExternalService { kind, .. } if kind.is_service_down());
            match e {
                GateError::Authentication(msg) => GateError::Authentication(msg),
                other if down => {
                    GateError::Authentication(format!("identity provider unavailable: {}", other))
                }
                other => GateError::Authentication(other.to_string()),
            }
        })?;

        let mut wallet = VerifiedWallet::new(identity.wallet_address);
        wallet.user_id = Some(identity.user_id);
        wallet.email = identity.email;
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalServiceKind;
    use crate::identity::provider::ResolvedIdentity;
    use crate::identity::signature::WalletSigner;
    use async_trait::async_trait;

    struct StaticProvider {
        result: Result<ResolvedIdentity, GateError>,
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn resolve(&self, _bearer_token: &str) -> GateResult<ResolvedIdentity> {
            self.result.clone()
        }

        async fn ping(&self) -> GateResult<()> {
            Ok(())
        }

        async fn validate_credentials(&self) -> GateResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_verify_wallet_matches_claim() {
        let signer = WalletSigner::random();
        let signed = signer.wallet_signature(b"login").unwrap();
        let wallet = IdentityResolver::new().verify_wallet(&signed, b"login").unwrap();
        assert_eq!(wallet.address, signer.address());
        assert!(wallet.user_id.is_none());
    }

    #[test]
    fn test_verify_wallet_rejects_wrong_claim() {
        let signer = WalletSigner::random();
        let other = WalletSigner::random();
        let mut signed = signer.wallet_signature(b"login").unwrap();
        signed.address = other.address();

        let err = IdentityResolver::new().verify_wallet(&signed, b"login").unwrap_err();
        assert!(matches!(err, GateError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_authenticate_via_provider() {
        let address = Address::parse("0x17edfb8a794ec4f13190401ef7af1c17f3cc90c5").unwrap();
        let resolver = IdentityResolver::with_provider(Arc::new(StaticProvider {
            result: Ok(ResolvedIdentity {
                wallet_address: address,
                user_id: "user-1".to_string(),
                email: None,
            }),
        }));

        let wallet = resolver.authenticate("token").await.unwrap();
        assert_eq!(wallet.address, address);
        assert_eq!(wallet.user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_authenticate_maps_outage_to_authentication_error() {
        let resolver = IdentityResolver::with_provider(Arc::new(StaticProvider {
            result: Err(GateError::external(
                "identity provider",
                ExternalServiceKind::Timeout,
                "deadline elapsed",
            )),
        }));

        let err = resolver.authenticate("token").await.unwrap_err();
        match err {
            GateError::Authentication(msg) => assert!(msg.contains("unavailable")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_authenticate_requires_credential_and_provider() {
        let resolver = IdentityResolver::new();
        assert!(matches!(
            resolver.authenticate("").await,
            Err(GateError::Authentication(_))
        ));
        assert!(matches!(
            resolver.authenticate("token").await,
            Err(GateError::Authentication(_))
        ));
    }
}
