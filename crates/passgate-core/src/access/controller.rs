//! ============================================================================
//! Access Controller - Access-pass lifecycle and validation
//! ============================================================================
//! Mint, upgrade, transfer and revoke passes against the tier registry and the
//! pass contract. Mint and upgrade for one wallet are serialized through a
//! per-wallet lock; supply accounting is rolled back if the contract call
//! fails, so an error never leaves a partial supply increment.
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::chain::{ChainQuery, ChainWriter};
use super::registry::AccessTierRegistry;
use super::types::{tier_name, AccessTier, NFTAccess, UpgradeQuote, MINT_GAS_ESTIMATE};
use crate::error::{AccessDenied, GateError, GateResult};
use crate::locks::KeyedLocks;
use crate::payments::PaymentVerifier;
use crate::types::Address;

/// Default metadata location; `{id}` is replaced by the token id
pub const DEFAULT_METADATA_URI: &str = "ipfs://passgate/access/{id}.json";

/// Owns the access-pass lifecycle
pub struct AccessController {
    registry: Arc<AccessTierRegistry>,
    contract: Arc<dyn ChainWriter>,
    /// On-chain cross-check for `check_access`
    chain: Option<Arc<dyn ChainQuery>>,
    contract_address: Option<Address>,
    metadata_uri: String,
    /// Pass lifetime in seconds; 0 = never expires
    pass_duration_secs: i64,
    wallet_locks: KeyedLocks,
}

impl AccessController {
    pub fn new(registry: Arc<AccessTierRegistry>, contract: Arc<dyn ChainWriter>) -> Self {
        Self {
            registry,
            contract,
            chain: None,
            contract_address: None,
            metadata_uri: DEFAULT_METADATA_URI.to_string(),
            pass_duration_secs: 0,
            wallet_locks: KeyedLocks::new(),
        }
    }

    /// Cross-check ownership with an on-chain `balanceOf` on `contract_address`
    pub fn with_chain(mut self, chain: Arc<dyn ChainQuery>, contract_address: Address) -> Self {
        self.chain = Some(chain);
        self.contract_address = Some(contract_address);
        self
    }

    /// Passes minted from now on expire after `secs`
    pub fn with_pass_duration(mut self, secs: i64) -> Self {
        self.pass_duration_secs = secs;
        self
    }

    pub fn with_metadata_uri(mut self, uri: &str) -> Self {
        self.metadata_uri = uri.to_string();
        self
    }

    pub fn registry(&self) -> &Arc<AccessTierRegistry> {
        &self.registry
    }

    /// The fixed tier catalog
    pub fn get_tiers(&self) -> Vec<AccessTier> {
        self.registry.get_tiers()
    }

    pub fn contract_address(&self) -> Option<Address> {
        self.contract_address
    }

    pub fn estimate_mint_gas(&self) -> u64 {
        MINT_GAS_ESTIMATE
    }

    /// The pass held by `wallet`, or `NoAccess`
    pub async fn check_access(&self, wallet: &Address) -> GateResult<NFTAccess> {
        let no_access = || {
            GateError::from(AccessDenied::NoAccess {
                wallet: wallet.to_string(),
            })
        };

        if let (Some(chain), Some(contract)) = (&self.chain, &self.contract_address) {
            let balance = chain.pass_balance(contract, wallet).await?;
            if balance == 0 {
                debug!("{} holds no pass on-chain", wallet.short());
                return Err(no_access());
            }
        }

        let pass = self.contract.pass_of(wallet).await?.ok_or_else(no_access)?;
        debug!(
            "{} holds pass #{} ({})",
            wallet.short(),
            pass.token_id,
            pass.tier.name
        );
        Ok(pass)
    }

    /// Whether `wallet` may use features of `required_tier`.
    /// No pass or a lower tier is `false`; a revoked or expired pass is an error.
    pub async fn validate_access(&self, wallet: &Address, required_tier: u8) -> GateResult<bool> {
        let pass = match self.check_access(wallet).await {
            Ok(pass) => pass,
            Err(GateError::AccessDenied(AccessDenied::NoAccess { .. })) => return Ok(false),
            Err(e) => {
                warn!("Access check for {} failed: {}", wallet.short(), e);
                return Ok(false);
            }
        };

        ensure_usable(&pass)?;
        Ok(pass.tier.id >= required_tier)
    }

    /// Mint a pass of `tier_id` to `wallet`
    pub async fn mint(&self, wallet: &Address, tier_id: u8) -> GateResult<NFTAccess> {
        let _guard = self.wallet_locks.lock(&wallet.to_string()).await;
        self.mint_locked(wallet, tier_id).await
    }

    async fn mint_locked(&self, wallet: &Address, tier_id: u8) -> GateResult<NFTAccess> {
        let tier = self.registry.reserve_supply(tier_id)?;

        let expires_at = if self.pass_duration_secs > 0 {
            chrono::Utc::now().timestamp() + self.pass_duration_secs
        } else {
            0
        };

        match self
            .contract
            .mint(wallet, tier, expires_at, &self.metadata_uri)
            .await
        {
            Ok(pass) => {
                info!(
                    "Minted {} pass #{} for {}",
                    pass.tier.name, pass.token_id, wallet
                );
                Ok(pass)
            }
            Err(e) => {
                self.registry.release_supply(tier_id);
                error!("Mint of tier {} for {} failed: {}", tier_id, wallet, e);
                Err(e)
            }
        }
    }

    /// Confirm a payment of the tier price from `wallet`, then mint
    pub async fn purchase_pass(
        &self,
        wallet: &Address,
        tier_id: u8,
        tx_hash: &str,
        payments: &PaymentVerifier,
    ) -> GateResult<NFTAccess> {
        let _guard = self.wallet_locks.lock(&wallet.to_string()).await;

        let tier = self.registry.get(tier_id)?;
        if !tier.is_active {
            return Err(GateError::InactiveTier(tier_id));
        }
        if tier.remaining_supply() == 0 {
            return Err(GateError::SupplyExhausted {
                tier: tier_id,
                max_supply: tier.max_supply,
            });
        }

        payments.confirm(tx_hash, wallet, tier.price_wei).await?;

        self.mint_locked(wallet, tier_id).await.map_err(|e| {
            error!(
                "Payment {} confirmed but mint failed; refund required: {}",
                tx_hash, e
            );
            e
        })
    }

    /// Amount owed to upgrade `token_id` to `new_tier_id`
    pub async fn quote_upgrade(&self, token_id: u64, new_tier_id: u8) -> GateResult<UpgradeQuote> {
        let pass = self.get_access_by_token_id(token_id).await?;
        let price_diff_wei = self.registry.price_diff(pass.tier.id, new_tier_id)?;
        Ok(UpgradeQuote {
            token_id,
            from_tier: pass.tier.id,
            to_tier: new_tier_id,
            price_diff_wei,
        })
    }

    /// Upgrade `token_id` to `new_tier_id` once `paid_wei` covers the difference
    pub async fn upgrade(&self, token_id: u64, new_tier_id: u8, paid_wei: u128) -> GateResult<NFTAccess> {
        let owner = self.get_access_by_token_id(token_id).await?.owner;
        let _guard = self.wallet_locks.lock(&owner.to_string()).await;
        self.upgrade_locked(token_id, new_tier_id, paid_wei).await
    }

    async fn upgrade_locked(&self, token_id: u64, new_tier_id: u8, paid_wei: u128) -> GateResult<NFTAccess> {
        let pass = self.get_access_by_token_id(token_id).await?;
        ensure_usable(&pass)?;

        let current_tier = pass.tier.id;
        let price_diff = self.registry.price_diff(current_tier, new_tier_id)?;
        if paid_wei < price_diff {
            return Err(GateError::InsufficientPayment {
                required: price_diff,
                paid: paid_wei,
            });
        }

        let new_tier = self.registry.reserve_supply(new_tier_id)?;
        if let Err(e) = self.contract.set_tier(token_id, new_tier.clone()).await {
            self.registry.release_supply(new_tier_id);
            return Err(e);
        }
        self.registry.release_supply(current_tier);

        info!(
            "Upgraded pass #{} from {} to {}",
            token_id,
            tier_name(current_tier),
            new_tier.name
        );

        Ok(NFTAccess {
            tier: new_tier,
            ..pass
        })
    }

    /// Confirm payment of the upgrade difference, then upgrade
    pub async fn purchase_upgrade(
        &self,
        token_id: u64,
        new_tier_id: u8,
        tx_hash: &str,
        payments: &PaymentVerifier,
    ) -> GateResult<NFTAccess> {
        let owner = self.get_access_by_token_id(token_id).await?.owner;
        let _guard = self.wallet_locks.lock(&owner.to_string()).await;

        let quote = self.quote_upgrade(token_id, new_tier_id).await?;
        let receipt = payments
            .confirm(tx_hash, &owner, quote.price_diff_wei)
            .await?;

        self.upgrade_locked(token_id, new_tier_id, receipt.value_wei)
            .await
            .map_err(|e| {
                error!(
                    "Payment {} confirmed but upgrade failed; refund required: {}",
                    tx_hash, e
                );
                e
            })
    }

    /// Move `token_id` from `from` to `to`; the token id is stable
    pub async fn transfer(&self, from: &Address, to: &Address, token_id: u64) -> GateResult<()> {
        // Lock both wallets in a fixed order.
        let (first, second) = if from <= to { (from, to) } else { (to, from) };
        let _a = self.wallet_locks.lock(&first.to_string()).await;
        let _b = if first != second {
            Some(self.wallet_locks.lock(&second.to_string()).await)
        } else {
            None
        };

        let pass = self.get_access_by_token_id(token_id).await?;
        if &pass.owner != from {
            return Err(GateError::NotPassOwner {
                wallet: from.to_string(),
                token_id,
            });
        }

        self.contract.set_owner(token_id, to).await?;
        info!("Transferred pass #{} from {} to {}", token_id, from, to);
        Ok(())
    }

    /// Admin: clear `is_active` on a pass
    pub async fn revoke(&self, token_id: u64) -> GateResult<()> {
        let pass = self.get_access_by_token_id(token_id).await?;
        self.contract.set_active(token_id, false).await?;
        warn!("Revoked pass #{} held by {}", token_id, pass.owner);
        Ok(())
    }

    pub async fn get_access_by_token_id(&self, token_id: u64) -> GateResult<NFTAccess> {
        self.contract
            .pass(token_id)
            .await?
            .ok_or(GateError::PassNotFound(token_id))
    }

    pub async fn list_access_passes(&self) -> GateResult<Vec<NFTAccess>> {
        self.contract.all_passes().await
    }
}

/// Error unless the pass is active and unexpired
pub fn ensure_usable(pass: &NFTAccess) -> GateResult<()> {
    if !pass.is_active {
        return Err(AccessDenied::InactiveAccess {
            token_id: pass.token_id,
        }
        .into());
    }
    let now = chrono::Utc::now().timestamp();
    if pass.is_expired(now) {
        return Err(AccessDenied::ExpiredAccess {
            token_id: pass.token_id,
            expired_at: pass.expires_at,
        }
        .into());
    }
    Ok(())
}
