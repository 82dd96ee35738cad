//! ============================================================================
//! Gate Configuration - Explicit settings passed into each component
//! ============================================================================
//! Built once at process start (usually via `GateConfig::from_env()` after the
//! binary has loaded `.env`) and handed to constructors by reference.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GateError, GateResult};
use crate::types::Address;

/// Base mainnet chain id
pub const BASE_MAINNET_CHAIN_ID: u64 = 8453;
/// Base Sepolia testnet chain id
pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84532;

/// Default identity provider endpoint
pub const DEFAULT_PRIVY_BASE_URL: &str = "https://auth.privy.io";
/// Default access-pass API endpoint
pub const DEFAULT_PASS_API_URL: &str = "https://api.nation.fun/v1";
/// Default LLM gateway (OpenAI-compatible)
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
/// Default Base RPC endpoint
pub const DEFAULT_BASE_RPC_URL: &str = "https://mainnet.base.org";

/// Timeout for outbound health checks (seconds)
pub const DEFAULT_HEALTHCHECK_TIMEOUT_SECS: u64 = 30;
/// Overall deadline for transaction confirmation waits (seconds)
pub const DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 300;
/// Receipt polling interval while waiting for confirmation (seconds)
pub const DEFAULT_CONFIRM_POLL_INTERVAL_SECS: u64 = 2;

/// Identity provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub app_id: Option<String>,
    pub base_url: String,
}

/// Chain connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub expected_chain_id: u64,
    /// Access-pass (ERC-721) contract
    pub pass_contract: Option<Address>,
}

/// Access-pass gating settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Fail startup when no pass source is configured
    pub required: bool,
    pub pass_api_url: String,
    /// Bearer credential sent to the pass API
    pub wallet_token: Option<String>,
}

/// LLM gateway settings (reachability only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// Timeouts for blocking calls
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub healthcheck_secs: u64,
    pub confirm_secs: u64,
    pub confirm_poll_interval_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            healthcheck_secs: DEFAULT_HEALTHCHECK_TIMEOUT_SECS,
            confirm_secs: DEFAULT_CONFIRM_TIMEOUT_SECS,
            confirm_poll_interval_secs: DEFAULT_CONFIRM_POLL_INTERVAL_SECS,
        }
    }
}

impl TimeoutConfig {
    pub fn healthcheck(&self) -> Duration {
        Duration::from_secs(self.healthcheck_secs)
    }

    pub fn confirm(&self) -> Duration {
        Duration::from_secs(self.confirm_secs)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_secs(self.confirm_poll_interval_secs)
    }
}

/// Full configuration for the access core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Wallet that gates this deployment
    pub wallet_address: Option<String>,
    pub identity: IdentityConfig,
    pub chain: ChainConfig,
    pub access: AccessConfig,
    pub llm: LlmConfig,
    pub timeouts: TimeoutConfig,
    /// Hex-encoded 32-byte master key for the local key-release oracle
    pub vault_master_key: Option<String>,
    /// redb path; `None` uses the default location
    pub db_path: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            wallet_address: None,
            identity: IdentityConfig {
                app_id: None,
                base_url: DEFAULT_PRIVY_BASE_URL.to_string(),
            },
            chain: ChainConfig {
                rpc_url: DEFAULT_BASE_RPC_URL.to_string(),
                expected_chain_id: BASE_MAINNET_CHAIN_ID,
                pass_contract: None,
            },
            access: AccessConfig {
                required: false,
                pass_api_url: DEFAULT_PASS_API_URL.to_string(),
                wallet_token: None,
            },
            llm: LlmConfig {
                api_key: None,
                base_url: None,
            },
            timeouts: TimeoutConfig::default(),
            vault_master_key: None,
            db_path: None,
        }
    }
}

impl GateConfig {
    /// Build configuration from process environment variables
    pub fn from_env() -> GateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> GateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let pass_contract = get("ACCESS_PASS_CONTRACT")
            .map(|s| Address::parse(&s))
            .transpose()
            .map_err(|e| GateError::Config(format!("ACCESS_PASS_CONTRACT: {}", e)))?;

        let expected_chain_id = parse_or("BASE_CHAIN_ID", get("BASE_CHAIN_ID"), BASE_MAINNET_CHAIN_ID)?;

        let timeouts = TimeoutConfig {
            healthcheck_secs: parse_or(
                "HEALTHCHECK_TIMEOUT_SECS",
                get("HEALTHCHECK_TIMEOUT_SECS"),
                DEFAULT_HEALTHCHECK_TIMEOUT_SECS,
            )?,
            confirm_secs: parse_or(
                "CONFIRM_TIMEOUT_SECS",
                get("CONFIRM_TIMEOUT_SECS"),
                DEFAULT_CONFIRM_TIMEOUT_SECS,
            )?,
            confirm_poll_interval_secs: parse_or(
                "CONFIRM_POLL_INTERVAL_SECS",
                get("CONFIRM_POLL_INTERVAL_SECS"),
                DEFAULT_CONFIRM_POLL_INTERVAL_SECS,
            )?,
        };

        Ok(Self {
            wallet_address: get("WALLET_ADDRESS"),
            identity: IdentityConfig {
                app_id: get("PRIVY_APP_ID"),
                base_url: get("PRIVY_BASE_URL").unwrap_or(defaults.identity.base_url),
            },
            chain: ChainConfig {
                rpc_url: get("BASE_RPC_URL").unwrap_or(defaults.chain.rpc_url),
                expected_chain_id,
                pass_contract,
            },
            access: AccessConfig {
                required: get("ACCESS_PASS_REQUIRED")
                    .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
                    .unwrap_or(false),
                pass_api_url: get("PASS_API_URL").unwrap_or(defaults.access.pass_api_url),
                wallet_token: get("WALLET_TOKEN"),
            },
            llm: LlmConfig {
                api_key: get("LLM_API_KEY"),
                base_url: get("LLM_BASE_URL"),
            },
            timeouts,
            vault_master_key: get("VAULT_MASTER_KEY"),
            db_path: get("PASSGATE_DB_PATH"),
        })
    }

    /// Names of required settings that are unset
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.llm.api_key.is_none() {
            missing.push("LLM_API_KEY");
        }
        if self.identity.app_id.is_none() {
            missing.push("PRIVY_APP_ID");
        }
        if self.wallet_address.is_none() {
            missing.push("WALLET_ADDRESS");
        }
        missing
    }

    /// The gating wallet, parsed
    pub fn wallet(&self) -> GateResult<Address> {
        let raw = self
            .wallet_address
            .as_deref()
            .ok_or_else(|| GateError::Config("WALLET_ADDRESS not configured".to_string()))?;
        Address::parse(raw)
    }

    /// Decode the vault master key, if configured
    pub fn vault_master_key_bytes(&self) -> GateResult<Option<[u8; 32]>> {
        let Some(hex_key) = self.vault_master_key.as_deref() else {
            return Ok(None);
        };
        let raw = hex::decode(hex_key.trim_start_matches("0x"))
            .map_err(|e| GateError::Config(format!("VAULT_MASTER_KEY is not hex: {}", e)))?;
        let key: [u8; 32] = raw
            .try_into()
            .map_err(|_| GateError::Config("VAULT_MASTER_KEY must be 32 bytes".to_string()))?;
        Ok(Some(key))
    }
}

fn parse_or(key: &str, value: Option<String>, default: u64) -> GateResult<u64> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| GateError::Config(format!("{} must be an integer, got '{}'", key, v))),
        None => Ok(default),
    }
}
