//! ============================================================================
//! Pricing - Operation costs and credit packages
//! ============================================================================
//! Every paid operation has a fixed credit cost and a minimum access tier.
//! Credit packages are bought with ETH and credited after payment confirms.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::access::{TIER_BASIC, TIER_ENTERPRISE, TIER_PRO};
use crate::error::{GateError, GateResult};

/// Operations that consume credits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    TerraformAnalysis,
    CheckovScan,
    LlmAnalysis,
    PreviewAnalysis,
    SecurityAudit,
    CostOptimization,
    FullReview,
}

impl OperationType {
    pub const ALL: [OperationType; 7] = [
        OperationType::TerraformAnalysis,
        OperationType::CheckovScan,
        OperationType::LlmAnalysis,
        OperationType::PreviewAnalysis,
        OperationType::SecurityAudit,
        OperationType::CostOptimization,
        OperationType::FullReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::TerraformAnalysis => "terraform_analysis",
            OperationType::CheckovScan => "checkov_scan",
            OperationType::LlmAnalysis => "llm_analysis",
            OperationType::PreviewAnalysis => "preview_analysis",
            OperationType::SecurityAudit => "security_audit",
            OperationType::CostOptimization => "cost_optimization",
            OperationType::FullReview => "full_review",
        }
    }

    /// Minimum access tier for this operation
    pub fn required_tier(&self) -> u8 {
        match self {
            OperationType::TerraformAnalysis | OperationType::CheckovScan => TIER_BASIC,
            OperationType::LlmAnalysis
            | OperationType::PreviewAnalysis
            | OperationType::SecurityAudit => TIER_PRO,
            OperationType::CostOptimization | OperationType::FullReview => TIER_ENTERPRISE,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationType::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| GateError::UnknownOperation(s.to_string()))
    }
}

/// Operations a tier may run; tier 0 (no pass) gets none
pub fn allowed_operations(tier: u8) -> Vec<OperationType> {
    OperationType::ALL
        .iter()
        .copied()
        .filter(|op| op.required_tier() <= tier)
        .collect()
}

/// Immutable operation -> cost mapping
#[derive(Debug, Clone)]
pub struct OperationPriceTable {
    prices: BTreeMap<String, u64>,
}

impl Default for OperationPriceTable {
    fn default() -> Self {
        Self::from_prices([
            (OperationType::TerraformAnalysis, 1),
            (OperationType::CheckovScan, 2),
            (OperationType::LlmAnalysis, 5),
            (OperationType::PreviewAnalysis, 3),
            (OperationType::SecurityAudit, 10),
            (OperationType::CostOptimization, 5),
            (OperationType::FullReview, 15),
        ])
    }
}

impl OperationPriceTable {
    fn from_prices<I: IntoIterator<Item = (OperationType, u64)>>(prices: I) -> Self {
        Self {
            prices: prices
                .into_iter()
                .map(|(op, cost)| (op.as_str().to_string(), cost))
                .collect(),
        }
    }

    /// Cost of an operation by name
    pub fn price_of(&self, operation: &str) -> GateResult<u64> {
        self.prices
            .get(operation)
            .copied()
            .ok_or_else(|| GateError::UnknownOperation(operation.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, u64)> {
        self.prices.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// A purchasable bundle of credits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPackage {
    pub id: u8,
    pub name: String,
    pub credits: u64,
    pub price_wei: u128,
    pub discount_percent: u8,
}

/// Credit packages on sale
pub fn credit_packages() -> Vec<CreditPackage> {
    vec![
        CreditPackage {
            id: 1,
            name: "Starter Pack".to_string(),
            credits: 100,
            price_wei: 5_000_000_000_000_000, // 0.005 ETH
            discount_percent: 0,
        },
        CreditPackage {
            id: 2,
            name: "Power Pack".to_string(),
            credits: 500,
            price_wei: 22_500_000_000_000_000, // 0.0225 ETH
            discount_percent: 10,
        },
        CreditPackage {
            id: 3,
            name: "Pro Pack".to_string(),
            credits: 1_000,
            price_wei: 42_500_000_000_000_000, // 0.0425 ETH
            discount_percent: 15,
        },
        CreditPackage {
            id: 4,
            name: "Enterprise Pack".to_string(),
            credits: 5_000,
            price_wei: 187_500_000_000_000_000, // 0.1875 ETH
            discount_percent: 25,
        },
    ]
}

pub fn credit_package(id: u8) -> GateResult<CreditPackage> {
    credit_packages()
        .into_iter()
        .find(|p| p.id == id)
        .ok_or(GateError::UnknownPackage(id))
}
