//! ============================================================================
//! Vault Module - Envelope encryption for wallet-owned secrets
//! ============================================================================
//! - **cipher**: AES-256-GCM with nonce-prefixed output
//! - **condition**: access-control conditions in key-release wire form
//! - **key_release**: `KeyReleaseService` and the local oracle
//! - **record**: `EncryptedSecret` and its JSON wire record
//! - **store**: `SecretVault` (store, retrieve, update, delete)
//! ============================================================================

pub mod cipher;
pub mod condition;
mod key_release;
mod record;
mod store;

pub use cipher::ContentKey;
pub use condition::{AccessControlCondition, ReturnValueTest};
pub use key_release::{KeyReleaseService, LocalKeyRelease};
pub use record::{EncryptedSecret, SecretRecord, SecretSummary, SECRET_LIFETIME_SECS};
pub use store::{authorization_message, SecretVault};
