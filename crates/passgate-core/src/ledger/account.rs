//! ============================================================================
//! Usage Ledger - Per-wallet credit balances
//! ============================================================================
//! Each wallet has one account slot guarded by its own async mutex. Spend
//! resolves the price, then checks and debits while holding that mutex, so
//! concurrent spends for one wallet can never overdraw it. Different wallets
//! never contend.
//!
//! A failed downstream operation is not refunded here; callers compensate
//! explicitly with `refund`.
//! ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::pricing::{credit_package, OperationPriceTable, OperationType};
use crate::db::{GateDb, UsageEvent, UsageKind};
use crate::error::{GateError, GateResult};
use crate::payments::PaymentVerifier;
use crate::types::Address;

#[derive(Debug, Default)]
struct Account {
    balance: u64,
    history: Vec<UsageEvent>,
}

type AccountSlot = Arc<Mutex<Account>>;

/// Credit balances and usage history for every wallet
pub struct UsageLedger {
    prices: OperationPriceTable,
    accounts: RwLock<HashMap<Address, AccountSlot>>,
    db: Option<Arc<GateDb>>,
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new(OperationPriceTable::default())
    }
}

impl UsageLedger {
    pub fn new(prices: OperationPriceTable) -> Self {
        Self {
            prices,
            accounts: RwLock::new(HashMap::new()),
            db: None,
        }
    }

    /// Persist balances and history to `db`, loading any stored balances
    pub fn with_db(mut self, db: Arc<GateDb>) -> GateResult<Self> {
        let stored = db.list_balances()?;
        let accounts = self.accounts.get_mut();
        for (wallet, balance) in stored {
            let history = db.usage_history(&wallet)?;
            accounts.insert(wallet, Arc::new(Mutex::new(Account { balance, history })));
        }
        info!("Loaded {} ledger accounts from {}", accounts.len(), db.path().display());
        self.db = Some(db);
        Ok(self)
    }

    pub fn prices(&self) -> &OperationPriceTable {
        &self.prices
    }

    async fn slot(&self, wallet: &Address) -> AccountSlot {
        if let Some(slot) = self.accounts.read().await.get(wallet) {
            return slot.clone();
        }
        self.accounts
            .write()
            .await
            .entry(*wallet)
            .or_default()
            .clone()
    }

    /// Current balance; zero for wallets never seen
    pub async fn get_balance(&self, wallet: &Address) -> u64 {
        let slot = self.accounts.read().await.get(wallet).cloned();
        match slot {
            Some(slot) => slot.lock().await.balance,
            None => 0,
        }
    }

    /// Cost of an operation by name
    pub fn price_of(&self, operation: &str) -> GateResult<u64> {
        self.prices.price_of(operation)
    }

    /// Add `amount` credits
    pub async fn credit(&self, wallet: &Address, amount: u64) -> GateResult<u64> {
        self.apply_credit(wallet, amount, UsageKind::Credit, "credit purchase")
            .await
    }

    /// Explicit compensation for an operation that failed after its debit
    pub async fn refund(&self, wallet: &Address, amount: u64, reason: &str) -> GateResult<u64> {
        warn!("Refunding {} credits to {}: {}", amount, wallet, reason);
        self.apply_credit(wallet, amount, UsageKind::Refund, reason).await
    }

    async fn apply_credit(
        &self,
        wallet: &Address,
        amount: u64,
        kind: UsageKind,
        reason: &str,
    ) -> GateResult<u64> {
        if amount == 0 {
            return Err(GateError::InvalidAmount(amount));
        }

        let slot = self.slot(wallet).await;
        let mut account = slot.lock().await;

        let previous = account.balance;
        let balance = previous
            .checked_add(amount)
            .ok_or(GateError::InvalidAmount(amount))?;

        let event = UsageEvent {
            wallet: *wallet,
            kind,
            amount,
            operation: None,
            reason: reason.to_string(),
            balance_after: balance,
            at_ms: chrono::Utc::now().timestamp_millis(),
        };
        self.persist(&event)?;

        account.balance = balance;
        account.history.push(event);
        debug!("{} +{} credits -> {}", wallet, amount, balance);
        Ok(balance)
    }

    /// Debit the price of `operation`. Fails without touching the balance when
    /// it does not cover the price.
    pub async fn spend(&self, wallet: &Address, operation: &str, reason: &str) -> GateResult<u64> {
        let price = self.price_of(operation)?;

        let slot = self.slot(wallet).await;
        let mut account = slot.lock().await;

        if account.balance < price {
            debug!(
                "{} cannot afford {} ({} < {})",
                wallet, operation, account.balance, price
            );
            return Err(GateError::InsufficientBalance {
                have: account.balance,
                need: price,
            });
        }

        let balance = account.balance - price;
        let event = UsageEvent {
            wallet: *wallet,
            kind: UsageKind::Debit,
            amount: price,
            operation: Some(operation.to_string()),
            reason: reason.to_string(),
            balance_after: balance,
            at_ms: chrono::Utc::now().timestamp_millis(),
        };
        self.persist(&event)?;

        account.balance = balance;
        account.history.push(event);
        info!("{} spent {} credits on {} ({} left)", wallet, price, operation, balance);
        Ok(balance)
    }

    /// Typed convenience for `spend`
    pub async fn spend_op(&self, wallet: &Address, op: OperationType, reason: &str) -> GateResult<u64> {
        self.spend(wallet, op.as_str(), reason).await
    }

    /// Confirm payment for a credit package, then credit it
    pub async fn purchase_credits(
        &self,
        wallet: &Address,
        package_id: u8,
        tx_hash: &str,
        payments: &PaymentVerifier,
    ) -> GateResult<u64> {
        let package = credit_package(package_id)?;
        payments.confirm(tx_hash, wallet, package.price_wei).await?;

        self.apply_credit(
            wallet,
            package.credits,
            UsageKind::Credit,
            &format!("{} ({})", package.name, tx_hash),
        )
        .await
        .map_err(|e| {
            error!(
                "Payment {} confirmed but crediting {} failed; refund required: {}",
                tx_hash, wallet, e
            );
            e
        })
    }

    /// Balance changes for `wallet`, oldest first
    pub async fn history(&self, wallet: &Address) -> Vec<UsageEvent> {
        let slot = self.accounts.read().await.get(wallet).cloned();
        match slot {
            Some(slot) => slot.lock().await.history.clone(),
            None => Vec::new(),
        }
    }

    fn persist(&self, event: &UsageEvent) -> GateResult<()> {
        if let Some(db) = &self.db {
            db.record_usage(event)?;
        }
        Ok(())
    }
}
