//! ============================================================================
//! Access Types - Tier catalog and access passes
//! ============================================================================
//! Three fixed tiers with strictly increasing price and cumulative benefits.
//! Tier comparisons go by `id` only, never by price.
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Tier ids
pub const TIER_BASIC: u8 = 1;
pub const TIER_PRO: u8 = 2;
pub const TIER_ENTERPRISE: u8 = 3;

/// Wei per ether
pub const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;

/// Tier prices in wei
pub const BASIC_PRICE_WEI: u128 = 10_000_000_000_000_000; // 0.01 ETH
pub const PRO_PRICE_WEI: u128 = 50_000_000_000_000_000; // 0.05 ETH
pub const ENTERPRISE_PRICE_WEI: u128 = 200_000_000_000_000_000; // 0.2 ETH

/// Gas estimate for a pass mint
pub const MINT_GAS_ESTIMATE: u64 = 150_000;

/// A purchasable level of access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTier {
    pub id: u8,
    pub name: String,
    pub description: String,
    pub price_wei: u128,
    /// Display-only USD price
    pub price_usd: String,
    pub max_supply: u64,
    pub current_supply: u64,
    /// Cumulative: every benefit of lower tiers is repeated here
    pub benefits: Vec<String>,
    pub is_active: bool,
}

impl AccessTier {
    pub fn remaining_supply(&self) -> u64 {
        self.max_supply.saturating_sub(self.current_supply)
    }

    pub fn price_eth(&self) -> String {
        format_wei(self.price_wei)
    }
}

/// The fixed three-tier catalog
pub fn default_catalog() -> Vec<AccessTier> {
    let basic_benefits = vec![
        "Terraform static analysis".to_string(),
        "Checkov security scanning".to_string(),
        "Basic IaC recommendations".to_string(),
        "Community support".to_string(),
    ];

    let mut pro_benefits = basic_benefits.clone();
    pro_benefits.extend([
        "LLM-powered analysis".to_string(),
        "Preview analysis".to_string(),
        "Security audit".to_string(),
        "Priority support".to_string(),
    ]);

    let mut enterprise_benefits = pro_benefits.clone();
    enterprise_benefits.extend([
        "Cost optimization".to_string(),
        "Full review".to_string(),
        "Custom knowledge base".to_string(),
        "Dedicated support".to_string(),
    ]);

    vec![
        AccessTier {
            id: TIER_BASIC,
            name: "Basic Access".to_string(),
            description: "Essential IaC analysis for individual developers".to_string(),
            price_wei: BASIC_PRICE_WEI,
            price_usd: "25.00".to_string(),
            max_supply: 10_000,
            current_supply: 0,
            benefits: basic_benefits,
            is_active: true,
        },
        AccessTier {
            id: TIER_PRO,
            name: "Pro Access".to_string(),
            description: "AI-assisted analysis for teams".to_string(),
            price_wei: PRO_PRICE_WEI,
            price_usd: "125.00".to_string(),
            max_supply: 5_000,
            current_supply: 0,
            benefits: pro_benefits,
            is_active: true,
        },
        AccessTier {
            id: TIER_ENTERPRISE,
            name: "Enterprise Access".to_string(),
            description: "Full review and cost optimization for organisations".to_string(),
            price_wei: ENTERPRISE_PRICE_WEI,
            price_usd: "500.00".to_string(),
            max_supply: 1_000,
            current_supply: 0,
            benefits: enterprise_benefits,
            is_active: true,
        },
    ]
}

/// Display name for a tier id, "No Access" for 0 or unknown ids
pub fn tier_name(id: u8) -> &'static str {
    match id {
        TIER_BASIC => "Basic Access",
        TIER_PRO => "Pro Access",
        TIER_ENTERPRISE => "Enterprise Access",
        _ => "No Access",
    }
}

/// An access pass (ERC-721 token) held by a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NFTAccess {
    pub token_id: u64,
    pub owner: Address,
    /// Snapshot of the tier at mint or last upgrade
    pub tier: AccessTier,
    pub minted_at: i64,
    /// Unix seconds; 0 = never expires
    pub expires_at: i64,
    pub is_active: bool,
    pub metadata_uri: String,
}

impl NFTAccess {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at != 0 && now > self.expires_at
    }
}

/// Price difference owed for an upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeQuote {
    pub token_id: u64,
    pub from_tier: u8,
    pub to_tier: u8,
    pub price_diff_wei: u128,
}

/// Format a wei amount as ETH with trailing zeros trimmed
pub fn format_wei(wei: u128) -> String {
    let whole = wei / WEI_PER_ETH;
    let frac = wei % WEI_PER_ETH;
    if frac == 0 {
        return format!("{} ETH", whole);
    }
    let frac_str = format!("{:018}", frac);
    format!("{}.{} ETH", whole, frac_str.trim_end_matches('0'))
}
