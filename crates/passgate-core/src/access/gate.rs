//! ============================================================================
//! Access Gate - Cached pass lookups with operation gating
//! ============================================================================
//! Provides cached pass lookups to avoid hitting the chain on every request.
//! Only the wallet -> token id mapping is cached. The pass itself (active
//! flag, expiry, tier) is re-read from the controller on every call, so a
//! revoke or upgrade is visible immediately.
//! ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::controller::{ensure_usable, AccessController};
use super::types::{tier_name, NFTAccess};
use crate::error::{AccessDenied, GateResult};
use crate::ledger::OperationType;
use crate::types::Address;

/// Default cache duration in seconds (5 minutes)
pub const DEFAULT_CACHE_DURATION_SECS: i64 = 300;

/// Maximum number of entries in the pass cache to prevent unbounded growth
const MAX_CACHE_SIZE: usize = 1000;

/// Cached ownership: which token a wallet held when last looked up
#[derive(Debug, Clone, Copy)]
struct CachedPass {
    token_id: u64,
    cached_at: i64,
}

/// Access gate with caching for efficient pass lookups
pub struct AccessGate {
    controller: Arc<AccessController>,
    pass_cache: Arc<RwLock<HashMap<Address, CachedPass>>>,
    cache_duration_secs: i64,
}

impl AccessGate {
    pub fn new(controller: Arc<AccessController>) -> Self {
        Self::with_cache_duration(controller, DEFAULT_CACHE_DURATION_SECS)
    }

    /// Create a new access gate with custom cache duration
    pub fn with_cache_duration(controller: Arc<AccessController>, cache_duration_secs: i64) -> Self {
        Self {
            controller,
            pass_cache: Arc::new(RwLock::new(HashMap::new())),
            cache_duration_secs,
        }
    }

    pub fn controller(&self) -> &Arc<AccessController> {
        &self.controller
    }

    /// The wallet's pass, using the cache when possible
    pub async fn check_access(&self, wallet: &Address) -> GateResult<NFTAccess> {
        let now = chrono::Utc::now().timestamp();

        // Check cache first
        let cached = {
            let cache = self.pass_cache.read().await;
            cache
                .get(wallet)
                .filter(|c| now - c.cached_at < self.cache_duration_secs)
                .copied()
        };

        if let Some(cached) = cached {
            match self.controller.get_access_by_token_id(cached.token_id).await {
                Ok(pass) if pass.owner == *wallet && pass.is_active => {
                    debug!(
                        "Cache hit for wallet {}: pass #{} (age: {}s)",
                        wallet.short(),
                        pass.token_id,
                        now - cached.cached_at
                    );
                    return Ok(pass);
                }
                _ => {
                    debug!(
                        "Cached pass #{} no longer usable by {}, refreshing",
                        cached.token_id,
                        wallet.short()
                    );
                    self.pass_cache.write().await.remove(wallet);
                }
            }
        }

        // Cache miss or expired - fetch fresh
        debug!("Cache miss for wallet {}, fetching pass", wallet.short());
        let pass = self.controller.check_access(wallet).await?;

        // Update cache
        {
            let mut cache = self.pass_cache.write().await;
            // Evict oldest entry if cache is at capacity
            if cache.len() >= MAX_CACHE_SIZE && !cache.contains_key(wallet) {
                if let Some(oldest_key) = cache
                    .iter()
                    .min_by_key(|(_, v)| v.cached_at)
                    .map(|(k, _)| *k)
                {
                    cache.remove(&oldest_key);
                }
            }
            cache.insert(
                *wallet,
                CachedPass {
                    token_id: pass.token_id,
                    cached_at: now,
                },
            );
        }

        Ok(pass)
    }

    /// Gate an operation - returns the held tier id if allowed.
    /// Denials name the tier required and the tier held.
    pub async fn authorize(&self, wallet: &Address, operation: OperationType) -> GateResult<u8> {
        let pass = self.check_access(wallet).await?;
        ensure_usable(&pass)?;

        let required = operation.required_tier();
        if pass.tier.id < required {
            warn!(
                "Access denied for {}: wallet {} holds {}, needs {}",
                operation,
                wallet.short(),
                pass.tier.name,
                tier_name(required)
            );
            return Err(AccessDenied::InsufficientTier {
                required: tier_name(required).to_string(),
                held: pass.tier.name.clone(),
            }
            .into());
        }

        Ok(pass.tier.id)
    }

    /// Check if a wallet can run an operation; any denial is `false`
    pub async fn can_use(&self, wallet: &Address, operation: OperationType) -> bool {
        self.authorize(wallet, operation).await.is_ok()
    }

    /// Invalidate cache for a wallet (e.g., after a transfer)
    pub async fn invalidate_cache(&self, wallet: &Address) {
        let mut cache = self.pass_cache.write().await;
        if cache.remove(wallet).is_some() {
            info!("Invalidated cache for wallet {}", wallet.short());
        }
    }

    /// Clear the entire cache
    pub async fn clear_cache(&self) {
        let mut cache = self.pass_cache.write().await;
        let count = cache.len();
        cache.clear();
        info!("Cleared {} cached pass entries", count);
    }

    /// Get cache statistics: (total, still valid)
    pub async fn cache_stats(&self) -> (usize, usize) {
        let cache = self.pass_cache.read().await;
        let now = chrono::Utc::now().timestamp();
        let total = cache.len();
        let valid = cache
            .values()
            .filter(|c| now - c.cached_at < self.cache_duration_secs)
            .count();
        (total, valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::chain::MemoryChain;
    use crate::access::registry::AccessTierRegistry;
    use crate::access::types::{TIER_BASIC, TIER_PRO};
    use crate::error::GateError;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn setup() -> (Arc<AccessController>, AccessGate) {
        let chain = Arc::new(MemoryChain::new(8453, addr(0xaa)));
        let controller = Arc::new(
            AccessController::new(Arc::new(AccessTierRegistry::new()), chain.clone())
                .with_chain(chain, addr(0xaa)),
        );
        let gate = AccessGate::new(controller.clone());
        (controller, gate)
    }

    #[tokio::test]
    async fn test_authorize_by_operation_tier() {
        let (controller, gate) = setup();
        controller.mint(&addr(1), TIER_PRO).await.unwrap();

        assert_eq!(
            gate.authorize(&addr(1), OperationType::SecurityAudit).await.unwrap(),
            TIER_PRO
        );
        let err = gate
            .authorize(&addr(1), OperationType::FullReview)
            .await
            .unwrap_err();
        match err {
            GateError::AccessDenied(AccessDenied::InsufficientTier { required, held }) => {
                assert_eq!(required, "Enterprise Access");
                assert_eq!(held, "Pro Access");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_no_pass_is_denied() {
        let (_, gate) = setup();
        assert!(matches!(
            gate.authorize(&addr(2), OperationType::TerraformAnalysis).await,
            Err(GateError::AccessDenied(AccessDenied::NoAccess { .. }))
        ));
        assert!(!gate.can_use(&addr(2), OperationType::TerraformAnalysis).await);
    }

    #[tokio::test]
    async fn test_revocation_visible_while_cached() {
        let (controller, gate) = setup();
        let pass = controller.mint(&addr(1), TIER_BASIC).await.unwrap();
        assert!(gate.can_use(&addr(1), OperationType::CheckovScan).await);
        assert_eq!(gate.cache_stats().await, (1, 1));

        controller.revoke(pass.token_id).await.unwrap();
        assert_eq!(gate.cache_stats().await, (1, 1));
        assert!(matches!(
            gate.authorize(&addr(1), OperationType::CheckovScan).await,
            Err(GateError::AccessDenied(AccessDenied::InactiveAccess { token_id }))
                if token_id == pass.token_id
        ));
    }

    #[tokio::test]
    async fn test_upgrade_visible_while_cached() {
        let (controller, gate) = setup();
        let pass = controller.mint(&addr(1), TIER_BASIC).await.unwrap();
        assert!(!gate.can_use(&addr(1), OperationType::SecurityAudit).await);

        controller
            .upgrade(pass.token_id, TIER_PRO, u128::MAX)
            .await
            .unwrap();
        assert_eq!(
            gate.authorize(&addr(1), OperationType::SecurityAudit).await.unwrap(),
            TIER_PRO
        );
    }

    #[tokio::test]
    async fn test_transferred_pass_not_served_to_old_owner() {
        let (controller, gate) = setup();
        let pass = controller.mint(&addr(1), TIER_BASIC).await.unwrap();
        gate.check_access(&addr(1)).await.unwrap();

        controller
            .transfer(&addr(1), &addr(3), pass.token_id)
            .await
            .unwrap();
        assert!(matches!(
            gate.check_access(&addr(1)).await,
            Err(GateError::AccessDenied(AccessDenied::NoAccess { .. }))
        ));
        assert_eq!(gate.check_access(&addr(3)).await.unwrap().token_id, pass.token_id);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let (controller, gate) = setup();
        controller.mint(&addr(1), TIER_BASIC).await.unwrap();
        controller.mint(&addr(2), TIER_BASIC).await.unwrap();
        gate.check_access(&addr(1)).await.unwrap();
        gate.check_access(&addr(2)).await.unwrap();
        assert_eq!(gate.cache_stats().await.0, 2);

        gate.clear_cache().await;
        assert_eq!(gate.cache_stats().await, (0, 0));
    }
}
