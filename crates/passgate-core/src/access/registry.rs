//! ============================================================================
//! Access Tier Registry - Catalog and supply accounting
//! ============================================================================
//! Holds the fixed tier set. `current_supply` is the only mutable field and
//! changes only through `reserve_supply`/`release_supply`, each of which does
//! its check and update under one write lock.
//! ============================================================================

use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::{debug, info};

use super::types::{default_catalog, AccessTier};
use crate::error::{GateError, GateResult};

pub struct AccessTierRegistry {
    tiers: RwLock<BTreeMap<u8, AccessTier>>,
}

impl Default for AccessTierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessTierRegistry {
    /// Registry seeded with the default catalog
    pub fn new() -> Self {
        Self::with_tiers(default_catalog())
    }

    pub fn with_tiers(tiers: Vec<AccessTier>) -> Self {
        Self {
            tiers: RwLock::new(tiers.into_iter().map(|t| (t.id, t)).collect()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<u8, AccessTier>> {
        match self.tiers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<u8, AccessTier>> {
        match self.tiers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// All tiers in id order
    pub fn get_tiers(&self) -> Vec<AccessTier> {
        self.read().values().cloned().collect()
    }

    pub fn get(&self, id: u8) -> GateResult<AccessTier> {
        self.read().get(&id).cloned().ok_or(GateError::UnknownTier(id))
    }

    /// Check the tier is mintable and take one unit of supply
    pub fn reserve_supply(&self, id: u8) -> GateResult<AccessTier> {
        let mut tiers = self.write();
        let tier = tiers.get_mut(&id).ok_or(GateError::UnknownTier(id))?;

        if !tier.is_active {
            return Err(GateError::InactiveTier(id));
        }
        if tier.current_supply >= tier.max_supply {
            return Err(GateError::SupplyExhausted {
                tier: id,
                max_supply: tier.max_supply,
            });
        }

        tier.current_supply += 1;
        debug!(
            "Reserved supply for {}: {}/{}",
            tier.name, tier.current_supply, tier.max_supply
        );
        Ok(tier.clone())
    }

    /// Return one unit of supply (failed mint or tier change)
    pub fn release_supply(&self, id: u8) {
        let mut tiers = self.write();
        if let Some(tier) = tiers.get_mut(&id) {
            tier.current_supply = tier.current_supply.saturating_sub(1);
            debug!(
                "Released supply for {}: {}/{}",
                tier.name, tier.current_supply, tier.max_supply
            );
        }
    }

    /// Admin: enable or disable minting for a tier
    pub fn set_active(&self, id: u8, active: bool) -> GateResult<()> {
        let mut tiers = self.write();
        let tier = tiers.get_mut(&id).ok_or(GateError::UnknownTier(id))?;
        tier.is_active = active;
        info!("Tier {} ({}) active = {}", id, tier.name, active);
        Ok(())
    }

    /// Price owed to move from `from` to `to`; errors unless `to > from`
    pub fn price_diff(&self, from: u8, to: u8) -> GateResult<u128> {
        if to <= from {
            return Err(GateError::DowngradeNotAllowed {
                current: from,
                requested: to,
            });
        }
        let tiers = self.read();
        let current = tiers.get(&from).ok_or(GateError::UnknownTier(from))?;
        let target = tiers.get(&to).ok_or(GateError::UnknownTier(to))?;
        Ok(target.price_wei.saturating_sub(current.price_wei))
    }
}
