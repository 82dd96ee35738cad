//! ============================================================================
//! Key Release - Policy-bound wrapping of content keys
//! ============================================================================
//! A key-release service seals a content key behind a list of access
//! conditions and releases it only to a caller whose signature satisfies
//! them. The service recovers the signer itself; the address a caller claims
//! is never trusted here.
//!
//! `LocalKeyRelease` is a single-node oracle with the same contract: the
//! content key is sealed under a master key with the canonical conditions
//! JSON as associated data, so a wrapped key only opens together with the
//! exact conditions it was created under.
//! ============================================================================

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use super::cipher::{self, ContentKey};
use super::condition::{all_satisfied, conditions_to_json, AccessControlCondition};
use crate::error::{GateError, GateResult};
use crate::identity::recover_address;

/// Prefix of tokens produced by `LocalKeyRelease`
const LOCAL_TOKEN_PREFIX: &str = "local.v1.";

/// Threshold key-release network (or a compatible local oracle)
#[async_trait]
pub trait KeyReleaseService: Send + Sync {
    /// Seal `key` so it can only be released under `conditions`
    async fn wrap(&self, key: &ContentKey, conditions: &[AccessControlCondition]) -> GateResult<String>;

    /// Release the key if `signature` over `message` satisfies `conditions`
    async fn unwrap(
        &self,
        wrapped_key: &str,
        message: &[u8],
        signature: &[u8],
        conditions: &[AccessControlCondition],
    ) -> GateResult<ContentKey>;

    /// Short name for logs
    fn network(&self) -> &str;
}

/// In-process key-release oracle holding one master key
pub struct LocalKeyRelease {
    master: ContentKey,
}

impl LocalKeyRelease {
    pub fn new(master: ContentKey) -> Self {
        Self { master }
    }

    /// Oracle with a random master key; wrapped keys do not survive a restart
    pub fn ephemeral() -> Self {
        warn!("Using an ephemeral vault master key; stored secrets will not survive a restart");
        Self::new(ContentKey::generate())
    }

    /// Master key from `VAULT_MASTER_KEY` bytes, or an ephemeral one
    pub fn from_master_bytes(bytes: Option<[u8; 32]>) -> Self {
        match bytes {
            Some(b) => Self::new(ContentKey::from_bytes(b)),
            None => Self::ephemeral(),
        }
    }
}

#[async_trait]
impl KeyReleaseService for LocalKeyRelease {
    async fn wrap(&self, key: &ContentKey, conditions: &[AccessControlCondition]) -> GateResult<String> {
        if conditions.is_empty() {
            return Err(GateError::Encryption(
                "refusing to wrap a key without access conditions".to_string(),
            ));
        }
        let aad = conditions_to_json(conditions)?;
        let sealed = cipher::seal(&self.master, key.as_bytes(), aad.as_bytes())?;
        Ok(format!("{}{}", LOCAL_TOKEN_PREFIX, BASE64.encode(sealed)))
    }

    async fn unwrap(
        &self,
        wrapped_key: &str,
        message: &[u8],
        signature: &[u8],
        conditions: &[AccessControlCondition],
    ) -> GateResult<ContentKey> {
        let signer = recover_address(message, signature).map_err(|e| {
            GateError::AccessConditionNotSatisfied(format!("signature not recoverable: {}", e))
        })?;

        if !all_satisfied(conditions, &signer)? {
            debug!("Key release declined for {}", signer.short());
            return Err(GateError::AccessConditionNotSatisfied(format!(
                "{} does not satisfy the access conditions",
                signer
            )));
        }

        let encoded = wrapped_key
            .strip_prefix(LOCAL_TOKEN_PREFIX)
            .ok_or_else(|| GateError::Decryption("wrapped key is not a local token".to_string()))?;
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| GateError::Decryption(format!("wrapped key is not base64: {}", e)))?;

        let aad = conditions_to_json(conditions)?;
        let raw = zeroize::Zeroizing::new(cipher::open(&self.master, &sealed, aad.as_bytes())?);
        ContentKey::from_slice(&raw)
    }

    fn network(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::WalletSigner;

    const MESSAGE: &[u8] = b"release please";

    #[tokio::test]
    async fn test_wrap_unwrap_for_owner() {
        let service = LocalKeyRelease::new(ContentKey::generate());
        let owner = WalletSigner::random();
        let conditions = vec![AccessControlCondition::owner_equals(&owner.address())];
        let key = ContentKey::generate();

        let wrapped = service.wrap(&key, &conditions).await.unwrap();
        assert!(wrapped.starts_with(LOCAL_TOKEN_PREFIX));

        let sig = owner.sign_message(MESSAGE).unwrap();
        let released = service.unwrap(&wrapped, MESSAGE, &sig, &conditions).await.unwrap();
        assert_eq!(released.as_bytes(), key.as_bytes());
    }

    #[tokio::test]
    async fn test_other_signer_is_declined() {
        let service = LocalKeyRelease::new(ContentKey::generate());
        let owner = WalletSigner::random();
        let intruder = WalletSigner::random();
        let conditions = vec![AccessControlCondition::owner_equals(&owner.address())];
        let wrapped = service.wrap(&ContentKey::generate(), &conditions).await.unwrap();

        let sig = intruder.sign_message(MESSAGE).unwrap();
        assert!(matches!(
            service.unwrap(&wrapped, MESSAGE, &sig, &conditions).await,
            Err(GateError::AccessConditionNotSatisfied(_))
        ));
    }

    #[tokio::test]
    async fn test_rewritten_conditions_do_not_open() {
        let service = LocalKeyRelease::new(ContentKey::generate());
        let owner = WalletSigner::random();
        let intruder = WalletSigner::random();
        let wrapped = service
            .wrap(
                &ContentKey::generate(),
                &[AccessControlCondition::owner_equals(&owner.address())],
            )
            .await
            .unwrap();

        // Swapping in the intruder's own condition passes evaluation but not the seal.
        let forged = vec![AccessControlCondition::owner_equals(&intruder.address())];
        let sig = intruder.sign_message(MESSAGE).unwrap();
        assert!(matches!(
            service.unwrap(&wrapped, MESSAGE, &sig, &forged).await,
            Err(GateError::Decryption(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_conditions_refused() {
        let service = LocalKeyRelease::new(ContentKey::generate());
        assert!(service.wrap(&ContentKey::generate(), &[]).await.is_err());
    }
}
