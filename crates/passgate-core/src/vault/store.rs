//! ============================================================================
//! Secret Vault - Wallet-scoped encrypted secrets
//! ============================================================================
//! Store: fresh content key -> AES-256-GCM payload -> key wrapped by the
//! key-release service behind "caller address equals owner".
//! Retrieve: local signature fast-fail -> key release (the real authorization
//! boundary) -> authenticated decryption.
//!
//! One canonical message per (owner, service type) is signed for every
//! action, so the signature that stored a secret also retrieves it. Update
//! and delete on one secret are serialized through a per-secret lock.
//! ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::cipher::{self, ContentKey};
use super::condition::AccessControlCondition;
use super::key_release::KeyReleaseService;
use super::record::{EncryptedSecret, SecretSummary, SECRET_LIFETIME_SECS};
use crate::db::GateDb;
use crate::error::{GateError, GateResult};
use crate::identity::{recover_address, WalletSignature};
use crate::locks::KeyedLocks;
use crate::types::Address;

/// Canonical message a wallet signs to authorize vault access
pub fn authorization_message(owner: &Address, service_type: &str) -> String {
    format!(
        "Authorize access to the {} secret owned by {}",
        service_type,
        owner.to_checksum()
    )
}

/// Encrypted secret store
pub struct SecretVault {
    key_release: Arc<dyn KeyReleaseService>,
    secrets: RwLock<HashMap<String, EncryptedSecret>>,
    secret_locks: KeyedLocks,
    db: Option<Arc<GateDb>>,
}

impl SecretVault {
    pub fn new(key_release: Arc<dyn KeyReleaseService>) -> Self {
        Self {
            key_release,
            secrets: RwLock::new(HashMap::new()),
            secret_locks: KeyedLocks::new(),
            db: None,
        }
    }

    /// Persist secrets to `db`, loading any already stored
    pub fn with_db(mut self, db: Arc<GateDb>) -> GateResult<Self> {
        let stored = db.list_secrets(None)?;
        let secrets = self.secrets.get_mut();
        for secret in stored {
            secrets.insert(secret.id.clone(), secret);
        }
        info!("Loaded {} secrets from {}", secrets.len(), db.path().display());
        self.db = Some(db);
        Ok(self)
    }

    pub fn authorization_message(&self, owner: &Address, service_type: &str) -> String {
        authorization_message(owner, service_type)
    }

    /// Signature must come from `owner` over the canonical message
    fn verify_owner(&self, owner: &Address, service_type: &str, sig: &WalletSignature) -> GateResult<()> {
        if &sig.address != owner {
            return Err(GateError::Authentication(format!(
                "signer {} is not the owner {}",
                sig.address, owner
            )));
        }
        self.verify_claimed(service_type, owner, sig)
    }

    /// Signature must recover to the address it claims
    fn verify_claimed(&self, service_type: &str, owner: &Address, sig: &WalletSignature) -> GateResult<()> {
        let message = authorization_message(owner, service_type);
        let recovered = recover_address(message.as_bytes(), &sig.signature)?;
        if recovered != sig.address {
            warn!(
                "Vault signature claimed {} but recovered {}",
                sig.address.short(),
                recovered.short()
            );
            return Err(GateError::Authentication(
                "invalid signature for vault access".to_string(),
            ));
        }
        Ok(())
    }

    async fn seal_for(
        &self,
        plaintext: &[u8],
        conditions: &[AccessControlCondition],
    ) -> GateResult<(Vec<u8>, String)> {
        let key = ContentKey::generate();
        let ciphertext = cipher::seal(&key, plaintext, b"")?;
        let wrapped_key = self.key_release.wrap(&key, conditions).await?;
        Ok((ciphertext, wrapped_key))
    }

    async fn save(&self, secret: EncryptedSecret) -> GateResult<EncryptedSecret> {
        if let Some(db) = &self.db {
            db.store_secret(&secret)?;
        }
        self.secrets
            .write()
            .await
            .insert(secret.id.clone(), secret.clone());
        Ok(secret)
    }

    /// Encrypt `plaintext` for `owner`
    pub async fn store(
        &self,
        owner: &Address,
        service_type: &str,
        name: &str,
        plaintext: &[u8],
        sig: &WalletSignature,
    ) -> GateResult<EncryptedSecret> {
        self.verify_owner(owner, service_type, sig)?;

        let conditions = vec![AccessControlCondition::owner_equals(owner)];
        let (ciphertext, wrapped_key) = self.seal_for(plaintext, &conditions).await?;

        let now = chrono::Utc::now().timestamp();
        let secret = EncryptedSecret {
            id: uuid::Uuid::new_v4().to_string(),
            service_type: service_type.to_string(),
            name: name.to_string(),
            owner: *owner,
            ciphertext,
            wrapped_key,
            access_conditions: conditions,
            created_at: now,
            expires_at: now + SECRET_LIFETIME_SECS,
            last_accessed_at: now,
            version: 1,
            deleted_at: None,
        };

        let secret = self.save(secret).await?;
        info!(
            "Stored {} secret {} for {} via {} key release",
            secret.service_type,
            secret.id,
            owner.short(),
            self.key_release.network()
        );
        Ok(secret)
    }

    /// Decrypt a secret record without touching the store
    pub async fn open_secret(&self, secret: &EncryptedSecret, sig: &WalletSignature) -> GateResult<Vec<u8>> {
        self.verify_claimed(&secret.service_type, &secret.owner, sig)?;

        let message = authorization_message(&secret.owner, &secret.service_type);
        let key = self
            .key_release
            .unwrap(
                &secret.wrapped_key,
                message.as_bytes(),
                &sig.signature,
                &secret.access_conditions,
            )
            .await?;

        cipher::open(&key, &secret.ciphertext, b"")
    }

    /// Decrypt secret `id` for the signer and record the access
    pub async fn retrieve(&self, id: &str, sig: &WalletSignature) -> GateResult<Vec<u8>> {
        let secret = self.get_live(id).await?;
        let plaintext = self.open_secret(&secret, sig).await?;

        let _guard = self.secret_locks.lock(id).await;
        let mut current = self.get(id).await?;
        current.last_accessed_at = chrono::Utc::now().timestamp();
        self.save(current).await?;

        debug!("Secret {} retrieved by {}", id, sig.address.short());
        Ok(plaintext)
    }

    /// Re-encrypt secret `id` with a new payload under a new content key
    pub async fn update(&self, id: &str, plaintext: &[u8], sig: &WalletSignature) -> GateResult<EncryptedSecret> {
        let _guard = self.secret_locks.lock(id).await;
        let mut secret = self.get_live(id).await?;
        self.verify_owner(&secret.owner, &secret.service_type, sig)?;

        let (ciphertext, wrapped_key) = self.seal_for(plaintext, &secret.access_conditions).await?;
        secret.ciphertext = ciphertext;
        secret.wrapped_key = wrapped_key;
        secret.version += 1;

        let secret = self.save(secret).await?;
        info!("Secret {} re-encrypted (v{})", id, secret.version);
        Ok(secret)
    }

    /// Tombstone secret `id`
    pub async fn delete(&self, id: &str, sig: &WalletSignature) -> GateResult<()> {
        let _guard = self.secret_locks.lock(id).await;
        let mut secret = self.get(id).await?;
        if secret.is_deleted() {
            return Err(GateError::SecretDeleted(id.to_string()));
        }
        self.verify_owner(&secret.owner, &secret.service_type, sig)?;

        secret.deleted_at = Some(chrono::Utc::now().timestamp());
        self.save(secret).await?;
        info!("Secret {} marked deleted", id);
        Ok(())
    }

    /// Stored record, including tombstoned ones
    pub async fn get(&self, id: &str) -> GateResult<EncryptedSecret> {
        self.secrets
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GateError::SecretNotFound(id.to_string()))
    }

    async fn get_live(&self, id: &str) -> GateResult<EncryptedSecret> {
        let secret = self.get(id).await?;
        if secret.is_deleted() {
            return Err(GateError::SecretDeleted(id.to_string()));
        }
        if secret.is_expired(chrono::Utc::now().timestamp()) {
            return Err(GateError::SecretExpired(id.to_string()));
        }
        Ok(secret)
    }

    /// Summaries of stored secrets, optionally for one owner, oldest first
    pub async fn list(&self, owner: Option<&Address>) -> Vec<SecretSummary> {
        let secrets = self.secrets.read().await;
        let mut out: Vec<SecretSummary> = secrets
            .values()
            .filter(|s| owner.map_or(true, |o| &s.owner == o))
            .map(SecretSummary::from)
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::WalletSigner;
    use crate::vault::LocalKeyRelease;

    const SERVICE: &str = "whatsapp";

    fn vault() -> SecretVault {
        SecretVault::new(Arc::new(LocalKeyRelease::new(ContentKey::generate())))
    }

    fn sign(signer: &WalletSigner, owner: &Address) -> WalletSignature {
        signer
            .wallet_signature(authorization_message(owner, SERVICE).as_bytes())
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_then_retrieve() {
        let vault = vault();
        let owner = WalletSigner::random();
        let sig = sign(&owner, &owner.address());

        let secret = vault
            .store(&owner.address(), SERVICE, "WhatsApp API Key", b"EAAG-token", &sig)
            .await
            .unwrap();
        assert_eq!(secret.version, 1);
        assert_eq!(secret.expires_at - secret.created_at, SECRET_LIFETIME_SECS);
        assert!(!secret.ciphertext.windows(10).any(|w| w == b"EAAG-token"));

        assert_eq!(vault.retrieve(&secret.id, &sig).await.unwrap(), b"EAAG-token");
    }

    #[tokio::test]
    async fn test_other_wallet_is_not_satisfied() {
        let vault = vault();
        let owner = WalletSigner::random();
        let other = WalletSigner::random();
        let secret = vault
            .store(
                &owner.address(),
                SERVICE,
                "key",
                b"secret",
                &sign(&owner, &owner.address()),
            )
            .await
            .unwrap();

        let err = vault
            .retrieve(&secret.id, &sign(&other, &owner.address()))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::AccessConditionNotSatisfied(_)));
    }

    #[tokio::test]
    async fn test_bad_signatures_fail_authentication() {
        let vault = vault();
        let owner = WalletSigner::random();
        let other = WalletSigner::random();

        // Signed by someone else than the owner being stored for.
        let err = vault
            .store(&owner.address(), SERVICE, "key", b"x", &sign(&other, &owner.address()))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Authentication(_)));

        // Claims the owner's address but was signed by another key.
        let secret = vault
            .store(&owner.address(), SERVICE, "key", b"x", &sign(&owner, &owner.address()))
            .await
            .unwrap();
        let mut forged = sign(&other, &owner.address());
        forged.address = owner.address();
        assert!(matches!(
            vault.retrieve(&secret.id, &forged).await,
            Err(GateError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_is_decryption_error() {
        let vault = vault();
        let owner = WalletSigner::random();
        let sig = sign(&owner, &owner.address());
        let secret = vault
            .store(&owner.address(), SERVICE, "key", b"do not alter", &sig)
            .await
            .unwrap();

        for i in 0..secret.ciphertext.len() {
            let mut tampered = secret.clone();
            tampered.ciphertext[i] ^= 0x80;
            assert!(matches!(
                vault.open_secret(&tampered, &sig).await,
                Err(GateError::Decryption(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_update_reencrypts() {
        let vault = vault();
        let owner = WalletSigner::random();
        let sig = sign(&owner, &owner.address());
        let first = vault
            .store(&owner.address(), SERVICE, "key", b"v1", &sig)
            .await
            .unwrap();

        let second = vault.update(&first.id, b"v2", &sig).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.access_conditions, first.access_conditions);
        assert_ne!(second.wrapped_key, first.wrapped_key);
        assert_ne!(second.ciphertext, first.ciphertext);
        assert_eq!(vault.retrieve(&first.id, &sig).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let vault = Arc::new(vault());
        let owner = WalletSigner::random();
        let sig = sign(&owner, &owner.address());
        let secret = vault
            .store(&owner.address(), SERVICE, "key", b"v1", &sig)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let vault = vault.clone();
            let sig = sig.clone();
            let id = secret.id.clone();
            handles.push(tokio::spawn(async move {
                vault.update(&id, format!("v{}", i).as_bytes(), &sig).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(vault.get(&secret.id).await.unwrap().version, 9);
    }

    #[tokio::test]
    async fn test_delete_tombstones() {
        let vault = vault();
        let owner = WalletSigner::random();
        let sig = sign(&owner, &owner.address());
        let secret = vault
            .store(&owner.address(), SERVICE, "key", b"gone", &sig)
            .await
            .unwrap();

        vault.delete(&secret.id, &sig).await.unwrap();
        assert!(vault.get(&secret.id).await.unwrap().is_deleted());
        assert!(matches!(
            vault.retrieve(&secret.id, &sig).await,
            Err(GateError::SecretDeleted(_))
        ));
        assert!(matches!(
            vault.delete(&secret.id, &sig).await,
            Err(GateError::SecretDeleted(_))
        ));
        assert!(vault.list(Some(&owner.address())).await[0].deleted);
    }

    #[tokio::test]
    async fn test_unknown_secret() {
        let vault = vault();
        let owner = WalletSigner::random();
        assert!(matches!(
            vault.retrieve("missing", &sign(&owner, &owner.address())).await,
            Err(GateError::SecretNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_secrets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.redb");
        let master = [7u8; 32];
        let owner = WalletSigner::random();
        let sig = sign(&owner, &owner.address());

        let id = {
            let db = Arc::new(GateDb::open(Some(path.to_str().unwrap())).unwrap());
            let vault = SecretVault::new(Arc::new(LocalKeyRelease::from_master_bytes(Some(master))))
                .with_db(db)
                .unwrap();
            vault
                .store(&owner.address(), SERVICE, "key", b"persisted", &sig)
                .await
                .unwrap()
                .id
        };

        let db = Arc::new(GateDb::open(Some(path.to_str().unwrap())).unwrap());
        let vault = SecretVault::new(Arc::new(LocalKeyRelease::from_master_bytes(Some(master))))
            .with_db(db.clone())
            .unwrap();
        assert_eq!(vault.retrieve(&id, &sig).await.unwrap(), b"persisted");
        assert_eq!(db.stats().unwrap().total_secrets, 1);
    }
}
