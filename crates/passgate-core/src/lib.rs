//! ============================================================================
//! PASSGATE-CORE: Wallet-gated access control
//! ============================================================================
//! This crate handles the access-control core behind metered IaC analysis:
//! - Wallet identity from signatures or identity-provider credentials
//! - Tiered access passes (mint, upgrade, transfer, revoke) with capped supply
//! - Per-wallet usage credits with atomic debits and an audit history
//! - Wallet-scoped secret vault with policy-bound key release
//! - Ordered go/no-go validation at process start
//! ============================================================================

pub mod access;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod locks;
pub mod payments;
pub mod service;
pub mod startup;
pub mod types;
pub mod vault;

// Re-export main types for convenience
pub use access::{AccessController, AccessGate, AccessTier, AccessTierRegistry, NFTAccess};
pub use config::GateConfig;
pub use db::{DbStats, GateDb, UsageEvent, UsageKind};
pub use error::{AccessDenied, ExternalServiceKind, GateError, GateResult};
pub use identity::{IdentityResolver, WalletSignature};
pub use ledger::{OperationType, UsageLedger};
pub use payments::PaymentVerifier;
pub use service::{AnalysisEngine, AnalysisResult, GatedService};
pub use startup::{StartupGate, StartupReport};
pub use types::{Address, VerifiedWallet};
pub use vault::{EncryptedSecret, SecretVault};
