//! ============================================================================
//! Ledger Module - Metered usage credits
//! ============================================================================

pub mod account;
pub mod pricing;

pub use account::UsageLedger;
pub use pricing::{
    allowed_operations, credit_package, credit_packages, CreditPackage, OperationPriceTable,
    OperationType,
};
