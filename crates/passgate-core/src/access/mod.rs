//! ============================================================================
//! Access Module - Pass-gated access control
//! ============================================================================
//! Access passes are NFTs of one of three tiers. Holding an active, unexpired
//! pass of a high enough tier unlocks an operation.
//!
//! ## Tiers
//! - **Basic** (1): Terraform analysis, Checkov scanning
//! - **Pro** (2): adds LLM analysis, preview analysis, security audit
//! - **Enterprise** (3): adds cost optimization, full review
//!
//! ## Usage
//! ```rust,ignore
//! use passgate_core::access::{AccessController, AccessGate, AccessTierRegistry, MemoryChain};
//!
//! let chain = Arc::new(MemoryChain::new(8453, contract));
//! let controller = Arc::new(AccessController::new(Arc::new(AccessTierRegistry::new()), chain));
//! let gate = AccessGate::new(controller);
//! let tier = gate.authorize(&wallet, OperationType::SecurityAudit).await?;
//! ```
//! ============================================================================

pub mod chain;
mod controller;
mod gate;
mod pass_api;
mod registry;
mod rpc;
mod types;

// Re-export public types
pub use chain::{ChainQuery, ChainWriter, MemoryChain, TxReceipt};
pub use controller::{ensure_usable, AccessController, DEFAULT_METADATA_URI};
pub use gate::{AccessGate, DEFAULT_CACHE_DURATION_SECS};
pub use pass_api::{PassApiClient, PassCheck, TestSend};
pub use registry::AccessTierRegistry;
pub use rpc::{parse_quantity, RpcChainClient};
pub use types::{
    default_catalog, format_wei, tier_name, AccessTier, NFTAccess, UpgradeQuote,
    BASIC_PRICE_WEI, ENTERPRISE_PRICE_WEI, MINT_GAS_ESTIMATE, PRO_PRICE_WEI, TIER_BASIC,
    TIER_ENTERPRISE, TIER_PRO, WEI_PER_ETH,
};
