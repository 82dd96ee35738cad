//! ============================================================================
//! Payment Confirmation - Waiting for purchase transactions
//! ============================================================================
//! Polls `ChainQuery::transaction` at a fixed interval under one overall
//! deadline. RPC errors while polling are logged and polling continues; the
//! deadline is the only way out besides a final receipt. Dropping the future
//! cancels the wait without side effects.
//!
//! A confirmed hash is recorded as used so the same payment cannot be applied
//! twice. With a `GateDb` attached the used set is the `payments` table, so it
//! survives restarts.
//! ============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::access::{ChainQuery, TxReceipt};
use crate::config::TimeoutConfig;
use crate::db::GateDb;
use crate::error::{ExternalServiceKind, GateError, GateResult};
use crate::types::Address;

/// Polling behavior for confirmation waits
#[derive(Debug, Clone, Copy)]
pub struct ConfirmConfig {
    /// Overall deadline for one confirmation
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for ConfirmConfig {
    fn from(t: &TimeoutConfig) -> Self {
        Self {
            timeout: t.confirm(),
            poll_interval: t.confirm_poll_interval(),
        }
    }
}

/// Confirms that a payment landed on-chain before value is granted
pub struct PaymentVerifier {
    chain: Arc<dyn ChainQuery>,
    /// Treasury that must receive payments; `None` accepts any recipient
    recipient: Option<Address>,
    config: ConfirmConfig,
    used: Mutex<HashSet<String>>,
    db: Option<Arc<GateDb>>,
}

impl PaymentVerifier {
    pub fn new(chain: Arc<dyn ChainQuery>, recipient: Option<Address>) -> Self {
        Self::with_config(chain, recipient, ConfirmConfig::default())
    }

    pub fn with_config(
        chain: Arc<dyn ChainQuery>,
        recipient: Option<Address>,
        config: ConfirmConfig,
    ) -> Self {
        Self {
            chain,
            recipient,
            config,
            used: Mutex::new(HashSet::new()),
            db: None,
        }
    }

    /// Persist consumed payment hashes in `db`
    pub fn with_db(mut self, db: Arc<GateDb>) -> Self {
        self.db = Some(db);
        self
    }

    async fn is_used(&self, key: &str) -> GateResult<bool> {
        if self.used.lock().await.contains(key) {
            return Ok(true);
        }
        match &self.db {
            Some(db) => db.is_payment_used(key),
            None => Ok(false),
        }
    }

    /// Wait for `tx_hash` to confirm, then check payer and amount.
    /// The hash is consumed only when every check passes.
    pub async fn confirm(&self, tx_hash: &str, payer: &Address, min_value_wei: u128) -> GateResult<TxReceipt> {
        let key = tx_hash.to_lowercase();
        if self.is_used(&key).await? {
            return Err(GateError::PaymentAlreadyUsed(tx_hash.to_string()));
        }

        let receipt = self.wait_for_receipt(tx_hash).await?;

        if receipt.success != Some(true) {
            warn!("Payment {} reverted on-chain", tx_hash);
            return Err(GateError::PaymentFailed {
                tx_hash: tx_hash.to_string(),
            });
        }
        if &receipt.from != payer {
            return Err(GateError::Authentication(format!(
                "payment {} was sent by {}, not {}",
                tx_hash, receipt.from, payer
            )));
        }
        if let Some(recipient) = self.recipient {
            if receipt.to != Some(recipient) {
                return Err(GateError::InsufficientPayment {
                    required: min_value_wei,
                    paid: 0,
                });
            }
        }
        if receipt.value_wei < min_value_wei {
            return Err(GateError::InsufficientPayment {
                required: min_value_wei,
                paid: receipt.value_wei,
            });
        }

        // Re-check under the lock: two callers may have waited on the same hash.
        let mut used = self.used.lock().await;
        if used.contains(&key) {
            return Err(GateError::PaymentAlreadyUsed(tx_hash.to_string()));
        }
        if let Some(db) = &self.db {
            if !db.consume_payment(&key)? {
                used.insert(key);
                return Err(GateError::PaymentAlreadyUsed(tx_hash.to_string()));
            }
        }
        used.insert(key);

        info!(
            "Payment {} confirmed: {} wei from {}",
            tx_hash, receipt.value_wei, payer
        );
        Ok(receipt)
    }

    /// Poll until the transaction has a final receipt or the deadline passes
    pub async fn wait_for_receipt(&self, tx_hash: &str) -> GateResult<TxReceipt> {
        info!("Waiting for confirmation of {}", tx_hash);

        let poll = async {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                match self.chain.transaction(tx_hash).await {
                    Ok(Some(receipt)) if !receipt.is_pending() => return receipt,
                    Ok(Some(_)) => debug!("{} pending (poll {})", tx_hash, attempt),
                    Ok(None) => debug!("{} not yet visible (poll {})", tx_hash, attempt),
                    Err(e) => warn!("Error checking {} (poll {}): {}", tx_hash, attempt, e),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        tokio::time::timeout(self.config.timeout, poll)
            .await
            .map_err(|_| {
                warn!(
                    "Confirmation of {} timed out after {:?}",
                    tx_hash, self.config.timeout
                );
                GateError::external(
                    "chain RPC",
                    ExternalServiceKind::Timeout,
                    format!("{} not confirmed within {:?}", tx_hash, self.config.timeout),
                )
            })
    }
}
