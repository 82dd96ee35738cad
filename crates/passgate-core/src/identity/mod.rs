//! ============================================================================
//! Identity Module - Proving wallet control
//! ============================================================================
//! - **signature**: EIP-191 personal_sign recovery and a local signer
//! - **provider**: bearer-credential exchange with a Privy-style provider
//! - **resolver**: `IdentityResolver`, the entry point producing
//!   `VerifiedWallet` values for requests
//! ============================================================================

mod provider;
mod resolver;
pub mod signature;

pub use provider::{IdentityProvider, PrivyClient, ResolvedIdentity};
pub use resolver::IdentityResolver;
pub use signature::{recover_address, verify_signature, WalletSignature, WalletSigner};
