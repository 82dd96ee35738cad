//! ============================================================================
//! Chain Interfaces - Read-only queries and the access-pass contract
//! ============================================================================
//! `ChainQuery` covers plain chain reads (chain id, blocks, balances, code,
//! transactions). `ChainWriter` is the access-pass contract surface: indexed
//! pass lookups plus the state-changing calls. `MemoryChain` implements both
//! in process for development and tests.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::{AccessTier, NFTAccess};
use crate::error::{GateError, GateResult};
use crate::types::Address;

/// A transaction as seen by the chain, with its receipt outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: String,
    pub from: Address,
    pub to: Option<Address>,
    pub value_wei: u128,
    /// `None` while pending
    pub block_number: Option<u64>,
    /// `None` while pending, then the receipt status
    pub success: Option<bool>,
}

impl TxReceipt {
    pub fn is_pending(&self) -> bool {
        self.success.is_none()
    }
}

/// Read-only chain access
#[async_trait]
pub trait ChainQuery: Send + Sync {
    async fn chain_id(&self) -> GateResult<u64>;

    async fn block_number(&self) -> GateResult<u64>;

    /// Native balance in wei
    async fn native_balance(&self, address: &Address) -> GateResult<u128>;

    async fn code_at(&self, address: &Address) -> GateResult<Vec<u8>>;

    /// ERC-721 `balanceOf(owner)` on `contract`
    async fn pass_balance(&self, contract: &Address, owner: &Address) -> GateResult<u64>;

    /// Transaction and receipt by hash; `None` if unknown
    async fn transaction(&self, tx_hash: &str) -> GateResult<Option<TxReceipt>>;
}

/// Access-pass contract: lookups and state-changing calls
#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Best pass held by `owner`: active first, then highest tier
    async fn pass_of(&self, owner: &Address) -> GateResult<Option<NFTAccess>>;

    async fn pass(&self, token_id: u64) -> GateResult<Option<NFTAccess>>;

    async fn all_passes(&self) -> GateResult<Vec<NFTAccess>>;

    async fn mint(
        &self,
        owner: &Address,
        tier: AccessTier,
        expires_at: i64,
        metadata_uri: &str,
    ) -> GateResult<NFTAccess>;

    async fn set_owner(&self, token_id: u64, owner: &Address) -> GateResult<()>;

    async fn set_active(&self, token_id: u64, active: bool) -> GateResult<()>;

    async fn set_tier(&self, token_id: u64, tier: AccessTier) -> GateResult<()>;
}

/// In-process chain and pass contract
pub struct MemoryChain {
    chain_id: u64,
    contract: Address,
    block: AtomicU64,
    next_token_id: AtomicU64,
    balances: RwLock<HashMap<Address, u128>>,
    code: RwLock<HashMap<Address, Vec<u8>>>,
    transactions: RwLock<HashMap<String, TxReceipt>>,
    passes: RwLock<BTreeMap<u64, NFTAccess>>,
}

impl MemoryChain {
    pub fn new(chain_id: u64, contract: Address) -> Self {
        Self {
            chain_id,
            contract,
            block: AtomicU64::new(1),
            next_token_id: AtomicU64::new(1),
            balances: RwLock::new(HashMap::new()),
            code: RwLock::new(HashMap::from([(contract, vec![0x60, 0x80, 0x60, 0x40])])),
            transactions: RwLock::new(HashMap::new()),
            passes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub async fn set_balance(&self, address: Address, wei: u128) {
        self.balances.write().await.insert(address, wei);
    }

    /// Advance the head by one block and return it
    pub fn mine_block(&self) -> u64 {
        self.block.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a pending payment; returns its hash
    pub async fn submit_payment(&self, from: Address, to: Address, value_wei: u128) -> String {
        let hash = format!("0x{}", hex::encode(uuid::Uuid::new_v4().as_bytes()));
        self.transactions.write().await.insert(
            hash.clone(),
            TxReceipt {
                hash: hash.clone(),
                from,
                to: Some(to),
                value_wei,
                block_number: None,
                success: None,
            },
        );
        debug!("Submitted payment {} ({} wei)", hash, value_wei);
        hash
    }

    /// Include a pending transaction in the next block
    pub async fn confirm(&self, tx_hash: &str, success: bool) -> GateResult<()> {
        let block = self.mine_block();
        let mut txs = self.transactions.write().await;
        let tx = txs
            .get_mut(tx_hash)
            .ok_or_else(|| GateError::Storage(format!("unknown transaction {}", tx_hash)))?;
        tx.block_number = Some(block);
        tx.success = Some(success);
        Ok(())
    }

    async fn update_pass<F>(&self, token_id: u64, f: F) -> GateResult<()>
    where
        F: FnOnce(&mut NFTAccess) + Send,
    {
        let mut passes = self.passes.write().await;
        let pass = passes
            .get_mut(&token_id)
            .ok_or(GateError::PassNotFound(token_id))?;
        f(pass);
        Ok(())
    }
}

#[async_trait]
impl ChainQuery for MemoryChain {
    async fn chain_id(&self) -> GateResult<u64> {
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> GateResult<u64> {
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn native_balance(&self, address: &Address) -> GateResult<u128> {
        Ok(self.balances.read().await.get(address).copied().unwrap_or(0))
    }

    async fn code_at(&self, address: &Address) -> GateResult<Vec<u8>> {
        Ok(self.code.read().await.get(address).cloned().unwrap_or_default())
    }

    async fn pass_balance(&self, contract: &Address, owner: &Address) -> GateResult<u64> {
        if contract != &self.contract {
            return Ok(0);
        }
        let passes = self.passes.read().await;
        Ok(passes.values().filter(|p| &p.owner == owner).count() as u64)
    }

    async fn transaction(&self, tx_hash: &str) -> GateResult<Option<TxReceipt>> {
        Ok(self.transactions.read().await.get(tx_hash).cloned())
    }
}

#[async_trait]
impl ChainWriter for MemoryChain {
    async fn pass_of(&self, owner: &Address) -> GateResult<Option<NFTAccess>> {
        let passes = self.passes.read().await;
        let best = passes
            .values()
            .filter(|p| &p.owner == owner)
            .max_by(|a, b| {
                a.is_active
                    .cmp(&b.is_active)
                    .then(a.tier.id.cmp(&b.tier.id))
                    .then(b.token_id.cmp(&a.token_id))
            })
            .cloned();
        Ok(best)
    }

    async fn pass(&self, token_id: u64) -> GateResult<Option<NFTAccess>> {
        Ok(self.passes.read().await.get(&token_id).cloned())
    }

    async fn all_passes(&self) -> GateResult<Vec<NFTAccess>> {
        Ok(self.passes.read().await.values().cloned().collect())
    }

    async fn mint(
        &self,
        owner: &Address,
        tier: AccessTier,
        expires_at: i64,
        metadata_uri: &str,
    ) -> GateResult<NFTAccess> {
        let token_id = self.next_token_id.fetch_add(1, Ordering::SeqCst);
        let pass = NFTAccess {
            token_id,
            owner: *owner,
            tier,
            minted_at: chrono::Utc::now().timestamp(),
            expires_at,
            is_active: true,
            metadata_uri: metadata_uri.replace("{id}", &token_id.to_string()),
        };
        self.passes.write().await.insert(token_id, pass.clone());
        self.mine_block();
        info!("Minted pass #{} ({}) to {}", token_id, pass.tier.name, owner);
        Ok(pass)
    }

    async fn set_owner(&self, token_id: u64, owner: &Address) -> GateResult<()> {
        let owner = *owner;
        self.update_pass(token_id, move |p| p.owner = owner).await
    }

    async fn set_active(&self, token_id: u64, active: bool) -> GateResult<()> {
        self.update_pass(token_id, move |p| p.is_active = active).await
    }

    async fn set_tier(&self, token_id: u64, tier: AccessTier) -> GateResult<()> {
        self.update_pass(token_id, move |p| p.tier = tier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::types::default_catalog;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[tokio::test]
    async fn test_mint_assigns_sequential_ids() {
        let chain = MemoryChain::new(8453, addr(0xaa));
        let tier = default_catalog().remove(0);
        let a = chain.mint(&addr(1), tier.clone(), 0, "ipfs://pass/{id}").await.unwrap();
        let b = chain.mint(&addr(2), tier, 0, "ipfs://pass/{id}").await.unwrap();
        assert_eq!(a.token_id, 1);
        assert_eq!(b.token_id, 2);
        assert_eq!(b.metadata_uri, "ipfs://pass/2");
        assert_eq!(chain.pass_balance(&addr(0xaa), &addr(1)).await.unwrap(), 1);
        assert_eq!(chain.pass_balance(&addr(0xbb), &addr(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pass_of_prefers_active_then_highest_tier() {
        let chain = MemoryChain::new(8453, addr(0xaa));
        let catalog = default_catalog();
        let owner = addr(7);
        let basic = chain.mint(&owner, catalog[0].clone(), 0, "").await.unwrap();
        let pro = chain.mint(&owner, catalog[1].clone(), 0, "").await.unwrap();

        assert_eq!(chain.pass_of(&owner).await.unwrap().unwrap().token_id, pro.token_id);

        chain.set_active(pro.token_id, false).await.unwrap();
        assert_eq!(chain.pass_of(&owner).await.unwrap().unwrap().token_id, basic.token_id);
        assert!(chain.pass_of(&addr(8)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payment_lifecycle() {
        let chain = MemoryChain::new(8453, addr(0xaa));
        let hash = chain.submit_payment(addr(1), addr(0xaa), 42).await;

        let pending = chain.transaction(&hash).await.unwrap().unwrap();
        assert!(pending.is_pending());

        chain.confirm(&hash, true).await.unwrap();
        let done = chain.transaction(&hash).await.unwrap().unwrap();
        assert_eq!(done.success, Some(true));
        assert!(done.block_number.is_some());
        assert!(chain.transaction("0xmissing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_pass() {
        let chain = MemoryChain::new(8453, addr(0xaa));
        assert!(matches!(
            chain.set_active(99, false).await,
            Err(GateError::PassNotFound(99))
        ));
    }
}
