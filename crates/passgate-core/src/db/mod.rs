// ============================================================================
// GateDb - Embedded Database (redb)
// ============================================================================
// Persistent local storage for encrypted secrets, credit balances, usage
// history, consumed payment hashes and startup agents. Default path: ~/.passgate/passgate.redb
// (override via PASSGATE_DB_PATH env var)
// ============================================================================

pub mod types;

pub use types::{AgentRecord, DbStats, UsageEvent, UsageKind};

use redb::{Database, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{GateError, GateResult};
use crate::types::Address;
use crate::vault::EncryptedSecret;

// Table definitions
const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");
const BALANCES: TableDefinition<&str, u64> = TableDefinition::new("balances");
const USAGE: TableDefinition<&str, &[u8]> = TableDefinition::new("usage");
const AGENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("agents");
const PAYMENTS: TableDefinition<&str, i64> = TableDefinition::new("payments");

fn storage<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> GateError + '_ {
    move |e| GateError::Storage(format!("{}: {}", context, e))
}

/// Embedded database for the access core
pub struct GateDb {
    db: Database,
    path: PathBuf,
}

impl GateDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses PASSGATE_DB_PATH env var or ~/.passgate/passgate.redb
    pub fn open(path: Option<&str>) -> GateResult<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("PASSGATE_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir()
                .ok_or_else(|| GateError::Storage("Cannot determine home directory".to_string()))?;
            let dir = home.join(".passgate");
            std::fs::create_dir_all(&dir).map_err(storage("Failed to create .passgate directory"))?;
            dir.join("passgate.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path).map_err(storage("Failed to open database"))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db.begin_write().map_err(storage("Failed to begin write"))?;
        {
            let _ = write_txn
                .open_table(SECRETS)
                .map_err(storage("Failed to create secrets table"))?;
            let _ = write_txn
                .open_table(BALANCES)
                .map_err(storage("Failed to create balances table"))?;
            let _ = write_txn
                .open_table(USAGE)
                .map_err(storage("Failed to create usage table"))?;
            let _ = write_txn
                .open_table(AGENTS)
                .map_err(storage("Failed to create agents table"))?;
            let _ = write_txn
                .open_table(PAYMENTS)
                .map_err(storage("Failed to create payments table"))?;
        }
        write_txn.commit().map_err(storage("Failed to commit init"))?;

        info!("Database ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Secret Operations
    // ========================================================================

    pub fn store_secret(&self, secret: &EncryptedSecret) -> GateResult<()> {
        let key = format!("secrets:{}", secret.id);
        let value = serde_json::to_vec(secret).map_err(storage("Failed to serialize secret"))?;

        let write_txn = self.db.begin_write().map_err(storage("Failed to begin write"))?;
        {
            let mut table = write_txn
                .open_table(SECRETS)
                .map_err(storage("Failed to open secrets table"))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(storage("Failed to insert secret"))?;
        }
        write_txn.commit().map_err(storage("Failed to commit"))?;

        debug!("Stored secret: {} (v{})", secret.id, secret.version);
        Ok(())
    }

    pub fn get_secret(&self, id: &str) -> GateResult<Option<EncryptedSecret>> {
        let key = format!("secrets:{}", id);

        let read_txn = self.db.begin_read().map_err(storage("Failed to begin read"))?;
        let table = read_txn
            .open_table(SECRETS)
            .map_err(storage("Failed to open secrets table"))?;

        match table.get(key.as_str()).map_err(storage("Failed to get secret"))? {
            Some(value) => {
                let secret: EncryptedSecret = serde_json::from_slice(value.value())
                    .map_err(storage("Failed to deserialize secret"))?;
                Ok(Some(secret))
            }
            None => Ok(None),
        }
    }

    /// All secrets, optionally only those owned by `owner`
    pub fn list_secrets(&self, owner: Option<&Address>) -> GateResult<Vec<EncryptedSecret>> {
        let read_txn = self.db.begin_read().map_err(storage("Failed to begin read"))?;
        let table = read_txn
            .open_table(SECRETS)
            .map_err(storage("Failed to open secrets table"))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(storage("Failed to iterate secrets"))?;
        for entry in iter {
            let (_key, value) = entry.map_err(storage("Failed to read entry"))?;
            let secret: EncryptedSecret = serde_json::from_slice(value.value())
                .map_err(storage("Failed to deserialize secret"))?;

            if owner.map_or(true, |o| &secret.owner == o) {
                results.push(secret);
            }
        }
        Ok(results)
    }

    // ========================================================================
    // Balance Operations
    // ========================================================================

    pub fn set_balance(&self, wallet: &Address, balance: u64) -> GateResult<()> {
        let key = wallet.to_string();

        let write_txn = self.db.begin_write().map_err(storage("Failed to begin write"))?;
        {
            let mut table = write_txn
                .open_table(BALANCES)
                .map_err(storage("Failed to open balances table"))?;
            table
                .insert(key.as_str(), balance)
                .map_err(storage("Failed to insert balance"))?;
        }
        write_txn.commit().map_err(storage("Failed to commit"))?;
        Ok(())
    }

    pub fn get_balance(&self, wallet: &Address) -> GateResult<Option<u64>> {
        let key = wallet.to_string();

        let read_txn = self.db.begin_read().map_err(storage("Failed to begin read"))?;
        let table = read_txn
            .open_table(BALANCES)
            .map_err(storage("Failed to open balances table"))?;

        let balance = table
            .get(key.as_str())
            .map_err(storage("Failed to get balance"))?
            .map(|v| v.value());
        Ok(balance)
    }

    pub fn list_balances(&self) -> GateResult<Vec<(Address, u64)>> {
        let read_txn = self.db.begin_read().map_err(storage("Failed to begin read"))?;
        let table = read_txn
            .open_table(BALANCES)
            .map_err(storage("Failed to open balances table"))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(storage("Failed to iterate balances"))?;
        for entry in iter {
            let (key, value) = entry.map_err(storage("Failed to read entry"))?;
            results.push((Address::parse(key.value())?, value.value()));
        }
        Ok(results)
    }

    // ========================================================================
    // Usage History Operations
    // ========================================================================

    fn usage_key(event: &UsageEvent) -> String {
        format!(
            "usage:{}:{:020}:{}",
            event.wallet,
            event.at_ms,
            uuid::Uuid::new_v4().simple()
        )
    }

    pub fn append_usage(&self, event: &UsageEvent) -> GateResult<()> {
        let key = Self::usage_key(event);
        let value = bincode::serialize(event).map_err(storage("Failed to serialize usage event"))?;

        let write_txn = self.db.begin_write().map_err(storage("Failed to begin write"))?;
        {
            let mut table = write_txn
                .open_table(USAGE)
                .map_err(storage("Failed to open usage table"))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(storage("Failed to insert usage event"))?;
        }
        write_txn.commit().map_err(storage("Failed to commit"))?;
        Ok(())
    }

    /// Store `event.balance_after` as the wallet's balance and append the
    /// event, in one transaction. Either both land or neither does.
    pub fn record_usage(&self, event: &UsageEvent) -> GateResult<()> {
        let balance_key = event.wallet.to_string();
        let usage_key = Self::usage_key(event);
        let value = bincode::serialize(event).map_err(storage("Failed to serialize usage event"))?;

        let write_txn = self.db.begin_write().map_err(storage("Failed to begin write"))?;
        {
            let mut balances = write_txn
                .open_table(BALANCES)
                .map_err(storage("Failed to open balances table"))?;
            balances
                .insert(balance_key.as_str(), event.balance_after)
                .map_err(storage("Failed to insert balance"))?;

            let mut usage = write_txn
                .open_table(USAGE)
                .map_err(storage("Failed to open usage table"))?;
            usage
                .insert(usage_key.as_str(), value.as_slice())
                .map_err(storage("Failed to insert usage event"))?;
        }
        write_txn.commit().map_err(storage("Failed to commit"))?;
        Ok(())
    }

    /// Usage events for `wallet`, oldest first
    pub fn usage_history(&self, wallet: &Address) -> GateResult<Vec<UsageEvent>> {
        let prefix = format!("usage:{}:", wallet);

        let read_txn = self.db.begin_read().map_err(storage("Failed to begin read"))?;
        let table = read_txn
            .open_table(USAGE)
            .map_err(storage("Failed to open usage table"))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(prefix.as_str()..)
            .map_err(storage("Failed to iterate usage"))?;
        for entry in iter {
            let (key, value) = entry.map_err(storage("Failed to read entry"))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let event: UsageEvent = bincode::deserialize(value.value())
                .map_err(storage("Failed to deserialize usage event"))?;
            results.push(event);
        }
        Ok(results)
    }

    fn all_usage_keys(&self) -> GateResult<Vec<(String, i64)>> {
        let read_txn = self.db.begin_read().map_err(storage("Failed to begin read"))?;
        let table = read_txn
            .open_table(USAGE)
            .map_err(storage("Failed to open usage table"))?;

        let mut keys = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(storage("Failed to iterate usage"))?;
        for entry in iter {
            let (key, value) = entry.map_err(storage("Failed to read entry"))?;
            let event: UsageEvent = bincode::deserialize(value.value())
                .map_err(storage("Failed to deserialize usage event"))?;
            keys.push((key.value().to_string(), event.at_ms));
        }
        Ok(keys)
    }

    /// Delete usage events older than `older_than_days`. Returns the count.
    pub fn prune_usage(&self, older_than_days: i64, dry_run: bool) -> GateResult<usize> {
        let cutoff_ms = (chrono::Utc::now().timestamp() - older_than_days * 86400) * 1000;
        let stale: Vec<String> = self
            .all_usage_keys()?
            .into_iter()
            .filter(|(_, at)| *at < cutoff_ms)
            .map(|(k, _)| k)
            .collect();

        if dry_run || stale.is_empty() {
            return Ok(stale.len());
        }

        let write_txn = self.db.begin_write().map_err(storage("Failed to begin write"))?;
        {
            let mut table = write_txn
                .open_table(USAGE)
                .map_err(storage("Failed to open usage table"))?;
            for key in &stale {
                table
                    .remove(key.as_str())
                    .map_err(storage("Failed to remove usage event"))?;
            }
        }
        write_txn.commit().map_err(storage("Failed to commit"))?;

        info!("Pruned {} usage events", stale.len());
        Ok(stale.len())
    }

    // ========================================================================
    // Payment Operations
    // ========================================================================

    /// Mark a payment hash as consumed. Returns `false` if it already was;
    /// the stored entry is left untouched in that case.
    pub fn consume_payment(&self, tx_hash: &str) -> GateResult<bool> {
        let key = format!("payments:{}", tx_hash.to_lowercase());
        let now = chrono::Utc::now().timestamp();

        let write_txn = self.db.begin_write().map_err(storage("Failed to begin write"))?;
        let fresh = {
            let mut table = write_txn
                .open_table(PAYMENTS)
                .map_err(storage("Failed to open payments table"))?;
            let previous = table
                .insert(key.as_str(), now)
                .map_err(storage("Failed to insert payment"))?;
            previous.is_none()
        };

        if !fresh {
            write_txn.abort().map_err(storage("Failed to abort"))?;
            debug!("Payment {} already consumed", tx_hash);
            return Ok(false);
        }
        write_txn.commit().map_err(storage("Failed to commit"))?;

        debug!("Consumed payment: {}", tx_hash);
        Ok(true)
    }

    pub fn is_payment_used(&self, tx_hash: &str) -> GateResult<bool> {
        let key = format!("payments:{}", tx_hash.to_lowercase());

        let read_txn = self.db.begin_read().map_err(storage("Failed to begin read"))?;
        let table = read_txn
            .open_table(PAYMENTS)
            .map_err(storage("Failed to open payments table"))?;

        let used = table
            .get(key.as_str())
            .map_err(storage("Failed to get payment"))?
            .is_some();
        Ok(used)
    }

    // ========================================================================
    // Agent Operations
    // ========================================================================

    pub fn store_agent(&self, agent: &AgentRecord) -> GateResult<()> {
        let key = format!("agents:{}", agent.owner);
        let value = serde_json::to_vec(agent).map_err(storage("Failed to serialize agent"))?;

        let write_txn = self.db.begin_write().map_err(storage("Failed to begin write"))?;
        {
            let mut table = write_txn
                .open_table(AGENTS)
                .map_err(storage("Failed to open agents table"))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(storage("Failed to insert agent"))?;
        }
        write_txn.commit().map_err(storage("Failed to commit"))?;

        debug!("Stored agent: {} for {}", agent.id, agent.owner);
        Ok(())
    }

    /// The default agent owned by `owner`
    pub fn get_agent(&self, owner: &Address) -> GateResult<Option<AgentRecord>> {
        let key = format!("agents:{}", owner);

        let read_txn = self.db.begin_read().map_err(storage("Failed to begin read"))?;
        let table = read_txn
            .open_table(AGENTS)
            .map_err(storage("Failed to open agents table"))?;

        match table.get(key.as_str()).map_err(storage("Failed to get agent"))? {
            Some(value) => {
                let agent: AgentRecord = serde_json::from_slice(value.value())
                    .map_err(storage("Failed to deserialize agent"))?;
                Ok(Some(agent))
            }
            None => Ok(None),
        }
    }

    fn count_agents(&self) -> GateResult<usize> {
        let read_txn = self.db.begin_read().map_err(storage("Failed to begin read"))?;
        let table = read_txn
            .open_table(AGENTS)
            .map_err(storage("Failed to open agents table"))?;

        let mut count = 0;
        for entry in table.range::<&str>(..).map_err(storage("Failed to iterate agents"))? {
            entry.map_err(storage("Failed to read entry"))?;
            count += 1;
        }
        Ok(count)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> GateResult<DbStats> {
        let secrets = self.list_secrets(None)?;
        let balances = self.list_balances()?;
        let usage_events = self.all_usage_keys()?.len();

        Ok(DbStats {
            total_secrets: secrets.len(),
            tombstoned_secrets: secrets.iter().filter(|s| s.is_deleted()).count(),
            wallets_with_balance: balances.iter().filter(|(_, b)| *b > 0).count(),
            total_credits: balances.iter().map(|(_, b)| *b).sum(),
            usage_events,
            agents: self.count_agents()?,
        })
    }
}
