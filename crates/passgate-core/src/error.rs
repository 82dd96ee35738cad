//! ============================================================================
//! Gate Errors - Typed failure taxonomy for the access core
//! ============================================================================
//! Every component operation returns `GateResult<T>`. Access denial and
//! insufficient balance carry enough detail for an actionable message;
//! external-service errors separate "service down" from "bad credentials".
//! ============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for access-core operations
pub type GateResult<T> = Result<T, GateError>;

/// Why a wallet was denied access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum AccessDenied {
    /// The wallet holds no access pass
    #[error("wallet {wallet} holds no access pass")]
    NoAccess { wallet: String },

    /// The pass was revoked
    #[error("access pass #{token_id} is inactive")]
    InactiveAccess { token_id: u64 },

    /// The pass is past its expiry
    #[error("access pass #{token_id} expired at {expired_at}")]
    ExpiredAccess { token_id: u64, expired_at: i64 },

    /// The pass tier is below what the operation needs
    #[error("{required} tier required, {held} tier held")]
    InsufficientTier {
        /// Display name of the tier the operation needs
        required: String,
        /// Display name of the tier the wallet holds
        held: String,
    },
}

/// Failure class of an outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalServiceKind {
    /// Call exceeded its deadline
    Timeout,
    /// Connection could not be established
    Unreachable,
    /// Non-success HTTP status
    Status(u16),
    /// Response body could not be parsed
    Malformed,
    /// Service answered but refused the credentials or request
    Rejected,
}

impl std::fmt::Display for ExternalServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalServiceKind::Timeout => write!(f, "timed out"),
            ExternalServiceKind::Unreachable => write!(f, "unreachable"),
            ExternalServiceKind::Status(code) => write!(f, "returned status {}", code),
            ExternalServiceKind::Malformed => write!(f, "returned a malformed payload"),
            ExternalServiceKind::Rejected => write!(f, "rejected the request"),
        }
    }
}

impl ExternalServiceKind {
    /// True when the failure means the service could not be reached at all
    pub fn is_service_down(&self) -> bool {
        matches!(
            self,
            ExternalServiceKind::Timeout
                | ExternalServiceKind::Unreachable
                | ExternalServiceKind::Status(500..=599)
        )
    }
}

/// Errors produced by the access core
#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    AccessDenied(#[from] AccessDenied),

    #[error("Insufficient balance: have {have} credits, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(u64),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Unknown tier: {0}")]
    UnknownTier(u8),

    #[error("Unknown credit package: {0}")]
    UnknownPackage(u8),

    #[error("Tier {0} is not active")]
    InactiveTier(u8),

    #[error("Tier {tier} is sold out ({max_supply} minted)")]
    SupplyExhausted { tier: u8, max_supply: u64 },

    #[error("Downgrade not allowed: pass is tier {current}, requested tier {requested}")]
    DowngradeNotAllowed { current: u8, requested: u8 },

    #[error("Access pass not found: #{0}")]
    PassNotFound(u64),

    #[error("Wallet {wallet} does not own access pass #{token_id}")]
    NotPassOwner { wallet: String, token_id: u64 },

    #[error("Insufficient payment: required {required} wei, paid {paid} wei")]
    InsufficientPayment { required: u128, paid: u128 },

    #[error("Payment {0} has already been applied")]
    PaymentAlreadyUsed(String),

    #[error("Payment {tx_hash} failed on-chain")]
    PaymentFailed { tx_hash: String },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Access condition not satisfied: {0}")]
    AccessConditionNotSatisfied(String),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Secret has been deleted: {0}")]
    SecretDeleted(String),

    #[error("Secret has expired: {0}")]
    SecretExpired(String),

    #[error("{service} {kind}: {detail}")]
    ExternalService {
        service: String,
        kind: ExternalServiceKind,
        detail: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Startup validation failed: {}", .0.join("; "))]
    StartupFatal(Vec<String>),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl GateError {
    /// Build an external-service error
    pub fn external(
        service: impl Into<String>,
        kind: ExternalServiceKind,
        detail: impl Into<String>,
    ) -> Self {
        GateError::ExternalService {
            service: service.into(),
            kind,
            detail: detail.into(),
        }
    }

    /// Map a reqwest transport error onto the external-service taxonomy
    pub fn from_transport(service: &str, e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ExternalServiceKind::Timeout
        } else if e.is_decode() {
            ExternalServiceKind::Malformed
        } else {
            ExternalServiceKind::Unreachable
        };
        GateError::external(service, kind, e.to_string())
    }

    /// True for any member of the access-denied family
    pub fn is_access_denied(&self) -> bool {
        matches!(self, GateError::AccessDenied(_))
    }
}
