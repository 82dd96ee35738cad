//! ============================================================================
//! Startup Checks - The individual boot-time validations
//! ============================================================================
//! Each check is tagged required or optional and reports a `CheckOutcome`.
//! Collaborators the core does not own (LLM gateway, knowledge-base sync,
//! agent directory, pass verification) are reached through narrow traits so
//! the gate can be exercised without the network.
//! ============================================================================

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::access::{ensure_usable, AccessController, ChainQuery, PassApiClient};
use crate::config::GateConfig;
use crate::db::{AgentRecord, GateDb};
use crate::error::{AccessDenied, ExternalServiceKind, GateError, GateResult};
use crate::identity::IdentityProvider;
use crate::types::Address;

/// LLM latency above this is reported as a warning
pub const SLOW_LLM_THRESHOLD: Duration = Duration::from_secs(10);

/// Name given to agents created at startup
pub const DEFAULT_AGENT_NAME: &str = "Default IaC Agent";

/// What a successful (or skipped) check reports
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    /// One-line summary for the report
    pub detail: Option<String>,
    /// Non-fatal observations
    pub warnings: Vec<String>,
    /// The check had nothing to do
    pub skipped: bool,
}

impl CheckOutcome {
    pub fn passed(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Default::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            detail: Some(reason.into()),
            skipped: true,
            ..Default::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// One step of the startup gate
#[async_trait]
pub trait StartupCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Required failures abort startup; optional failures become warnings
    fn required(&self) -> bool;

    async fn run(&self) -> GateResult<CheckOutcome>;
}

// ============================================================================
// Collaborator interfaces
// ============================================================================

/// LLM gateway reachability
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Cheapest authenticated call the gateway offers
    async fn ping(&self) -> GateResult<()>;
}

/// OpenAI-compatible gateway checked with `GET /models`
pub struct HttpLlmGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLlmGateway {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("passgate/1.0")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn ping(&self) -> GateResult<()> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| GateError::from_transport("LLM gateway", e))?;

        match response.status().as_u16() {
            200..=299 => Ok(()),
            401 | 403 => Err(GateError::external(
                "LLM gateway",
                ExternalServiceKind::Rejected,
                "API key was not accepted",
            )),
            code => {
                let body = response.text().await.unwrap_or_default();
                Err(GateError::external("LLM gateway", ExternalServiceKind::Status(code), body))
            }
        }
    }
}

/// Secondary integration synced at boot (e.g. a knowledge base)
#[async_trait]
pub trait KnowledgeSync: Send + Sync {
    fn name(&self) -> &str;

    /// Sync and return the number of documents now available
    async fn sync(&self) -> GateResult<usize>;
}

/// Registry of operator agents
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn find_default(&self, owner: &Address) -> GateResult<Option<AgentRecord>>;

    async fn create_default(&self, owner: &Address, name: &str) -> GateResult<AgentRecord>;
}

fn new_agent(owner: &Address, name: &str) -> AgentRecord {
    AgentRecord {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        owner: *owner,
        status: "active".to_string(),
        created_at: chrono::Utc::now().timestamp(),
    }
}

/// Agent directory kept in process memory
#[derive(Default)]
pub struct MemoryAgentDirectory {
    agents: RwLock<Vec<AgentRecord>>,
}

impl MemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentDirectory for MemoryAgentDirectory {
    async fn find_default(&self, owner: &Address) -> GateResult<Option<AgentRecord>> {
        Ok(self
            .agents
            .read()
            .await
            .iter()
            .find(|a| &a.owner == owner)
            .cloned())
    }

    async fn create_default(&self, owner: &Address, name: &str) -> GateResult<AgentRecord> {
        let agent = new_agent(owner, name);
        self.agents.write().await.push(agent.clone());
        Ok(agent)
    }
}

/// Agent directory persisted in the local database
pub struct StoredAgentDirectory {
    db: Arc<GateDb>,
}

impl StoredAgentDirectory {
    pub fn new(db: Arc<GateDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AgentDirectory for StoredAgentDirectory {
    async fn find_default(&self, owner: &Address) -> GateResult<Option<AgentRecord>> {
        self.db.get_agent(owner)
    }

    async fn create_default(&self, owner: &Address, name: &str) -> GateResult<AgentRecord> {
        let agent = new_agent(owner, name);
        self.db.store_agent(&agent)?;
        Ok(agent)
    }
}

/// Source of truth for "does the gating wallet hold a pass"
#[async_trait]
pub trait PassVerifier: Send + Sync {
    /// Summary of the usable pass held by `wallet`
    async fn verify(&self, wallet: &Address) -> GateResult<String>;

    /// Connectivity check; failures only warn
    async fn ping(&self, wallet: &Address) -> GateResult<()>;
}

#[async_trait]
impl PassVerifier for PassApiClient {
    async fn verify(&self, wallet: &Address) -> GateResult<String> {
        let check = self.validate_wallet(wallet).await?;
        let token_id = check
            .token_id
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or_default();

        if !check.is_active {
            return Err(AccessDenied::InactiveAccess { token_id }.into());
        }
        // Zero means the pass never expires.
        if check.expires_at != 0 && chrono::Utc::now().timestamp() > check.expires_at {
            return Err(AccessDenied::ExpiredAccess {
                token_id,
                expired_at: check.expires_at,
            }
            .into());
        }
        Ok(format!(
            "pass {} ({})",
            check.token_id.as_deref().unwrap_or("?"),
            check.tier.as_deref().unwrap_or("unknown tier")
        ))
    }

    async fn ping(&self, wallet: &Address) -> GateResult<()> {
        self.send_test("startup connectivity test", wallet)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl PassVerifier for AccessController {
    async fn verify(&self, wallet: &Address) -> GateResult<String> {
        let pass = self.check_access(wallet).await?;
        ensure_usable(&pass)?;
        Ok(format!("pass #{} ({})", pass.token_id, pass.tier.name))
    }

    async fn ping(&self, _wallet: &Address) -> GateResult<()> {
        self.list_access_passes().await.map(|_| ())
    }
}

// ============================================================================
// Steps
// ============================================================================

/// Step 1: required settings are present and well-formed
pub struct ConfigCheck {
    missing: Vec<&'static str>,
    wallet: Option<String>,
}

impl ConfigCheck {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            missing: config.missing_required(),
            wallet: config.wallet_address.clone(),
        }
    }
}

#[async_trait]
impl StartupCheck for ConfigCheck {
    fn name(&self) -> &str {
        "Configuration"
    }

    fn required(&self) -> bool {
        true
    }

    async fn run(&self) -> GateResult<CheckOutcome> {
        if !self.missing.is_empty() {
            return Err(GateError::Config(format!(
                "missing required settings: {}",
                self.missing.join(", ")
            )));
        }
        if let Some(raw) = &self.wallet {
            Address::parse(raw)
                .map_err(|e| GateError::Config(format!("WALLET_ADDRESS: {}", e)))?;
        }
        Ok(CheckOutcome::passed("required settings present"))
    }
}

/// Step 2: identity provider and LLM gateway answer
pub struct ReachabilityCheck {
    identity: Arc<dyn IdentityProvider>,
    llm: Arc<dyn LlmGateway>,
}

impl ReachabilityCheck {
    pub fn new(identity: Arc<dyn IdentityProvider>, llm: Arc<dyn LlmGateway>) -> Self {
        Self { identity, llm }
    }
}

#[async_trait]
impl StartupCheck for ReachabilityCheck {
    fn name(&self) -> &str {
        "Identity provider and LLM reachability"
    }

    fn required(&self) -> bool {
        true
    }

    async fn run(&self) -> GateResult<CheckOutcome> {
        self.identity.ping().await?;

        let started = Instant::now();
        self.llm.ping().await?;
        let latency = started.elapsed();
        debug!("LLM gateway answered in {:?}", latency);

        let outcome = CheckOutcome::passed(format!("LLM latency {}ms", latency.as_millis()));
        if latency > SLOW_LLM_THRESHOLD {
            return Ok(outcome.with_warning(format!(
                "LLM latency is high: {}ms (expected < {}s)",
                latency.as_millis(),
                SLOW_LLM_THRESHOLD.as_secs()
            )));
        }
        Ok(outcome)
    }
}

/// Step 3: the identity provider accepts our credentials
pub struct CredentialsCheck {
    identity: Arc<dyn IdentityProvider>,
}

impl CredentialsCheck {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl StartupCheck for CredentialsCheck {
    fn name(&self) -> &str {
        "Identity provider credentials"
    }

    fn required(&self) -> bool {
        true
    }

    async fn run(&self) -> GateResult<CheckOutcome> {
        self.identity.validate_credentials().await?;
        Ok(CheckOutcome::passed("credentials accepted"))
    }
}

/// Step 4: chain RPC reachable and on the expected network
pub struct ChainCheck {
    chain: Arc<dyn ChainQuery>,
    expected_chain_id: u64,
}

impl ChainCheck {
    pub fn new(chain: Arc<dyn ChainQuery>, expected_chain_id: u64) -> Self {
        Self {
            chain,
            expected_chain_id,
        }
    }
}

#[async_trait]
impl StartupCheck for ChainCheck {
    fn name(&self) -> &str {
        "Chain connectivity"
    }

    fn required(&self) -> bool {
        false
    }

    async fn run(&self) -> GateResult<CheckOutcome> {
        let chain_id = self.chain.chain_id().await?;
        if chain_id != self.expected_chain_id {
            return Err(GateError::Config(format!(
                "wrong chain id: expected {}, got {}",
                self.expected_chain_id, chain_id
            )));
        }
        let block = self.chain.block_number().await?;
        info!("Chain {} reachable at block {}", chain_id, block);
        Ok(CheckOutcome::passed(format!("chain {} at block {}", chain_id, block)))
    }
}

/// Step 5: the gating wallet holds a usable pass
pub struct AccessPassCheck {
    wallet: Option<Address>,
    verifier: Option<Arc<dyn PassVerifier>>,
    /// No pass source configured is an error rather than a skip
    pass_required: bool,
}

impl AccessPassCheck {
    pub fn new(wallet: Option<Address>, verifier: Option<Arc<dyn PassVerifier>>, pass_required: bool) -> Self {
        Self {
            wallet,
            verifier,
            pass_required,
        }
    }
}

#[async_trait]
impl StartupCheck for AccessPassCheck {
    fn name(&self) -> &str {
        "Access pass"
    }

    fn required(&self) -> bool {
        true
    }

    async fn run(&self) -> GateResult<CheckOutcome> {
        let wallet = self
            .wallet
            .ok_or_else(|| GateError::Config("WALLET_ADDRESS not configured".to_string()))?;

        let Some(verifier) = &self.verifier else {
            if self.pass_required {
                return Err(GateError::Config(
                    "ACCESS_PASS_REQUIRED is set but no pass source is configured".to_string(),
                ));
            }
            warn!("No pass source configured, access pass verification skipped");
            return Ok(CheckOutcome::skipped("no pass source configured")
                .with_warning("access pass verification skipped: no pass source configured"));
        };

        let summary = verifier.verify(&wallet).await?;
        let outcome = CheckOutcome::passed(format!("{} holds {}", wallet.short(), summary));

        match verifier.ping(&wallet).await {
            Ok(()) => Ok(outcome),
            Err(e) => {
                warn!("Pass service connectivity check failed: {}", e);
                Ok(outcome.with_warning(format!("pass service connectivity check failed: {}", e)))
            }
        }
    }
}

/// Step 6: secondary integration sync
pub struct KnowledgeSyncCheck {
    sync: Option<Arc<dyn KnowledgeSync>>,
}

impl KnowledgeSyncCheck {
    pub fn new(sync: Option<Arc<dyn KnowledgeSync>>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl StartupCheck for KnowledgeSyncCheck {
    fn name(&self) -> &str {
        "Knowledge base sync"
    }

    fn required(&self) -> bool {
        false
    }

    async fn run(&self) -> GateResult<CheckOutcome> {
        let Some(sync) = &self.sync else {
            return Ok(CheckOutcome::skipped("no knowledge source configured"));
        };
        let docs = sync.sync().await?;
        Ok(CheckOutcome::passed(format!("{}: {} documents", sync.name(), docs)))
    }
}

/// Step 7: the wallet's default agent exists, creating it if needed
pub struct DefaultAgentCheck {
    wallet: Option<Address>,
    directory: Arc<dyn AgentDirectory>,
}

impl DefaultAgentCheck {
    pub fn new(wallet: Option<Address>, directory: Arc<dyn AgentDirectory>) -> Self {
        Self { wallet, directory }
    }
}

#[async_trait]
impl StartupCheck for DefaultAgentCheck {
    fn name(&self) -> &str {
        "Default agent"
    }

    fn required(&self) -> bool {
        true
    }

    async fn run(&self) -> GateResult<CheckOutcome> {
        let wallet = self
            .wallet
            .ok_or_else(|| GateError::Config("WALLET_ADDRESS not configured".to_string()))?;

        let agent = match self.directory.find_default(&wallet).await? {
            Some(agent) => agent,
            None => {
                let agent = self
                    .directory
                    .create_default(&wallet, DEFAULT_AGENT_NAME)
                    .await?;
                info!("Created default agent {} for {}", agent.id, wallet.short());
                agent
            }
        };

        Ok(CheckOutcome::passed(format!("{} ({})", agent.name, agent.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessTierRegistry, MemoryChain, TIER_BASIC};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[tokio::test]
    async fn test_config_check_lists_missing() {
        let check = ConfigCheck::new(&GateConfig::default());
        let err = check.run().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("LLM_API_KEY"));
        assert!(msg.contains("PRIVY_APP_ID"));
        assert!(msg.contains("WALLET_ADDRESS"));
    }

    #[tokio::test]
    async fn test_config_check_rejects_bad_wallet() {
        let mut config = GateConfig::default();
        config.llm.api_key = Some("k".into());
        config.identity.app_id = Some("app".into());
        config.wallet_address = Some("0x1234".into());
        assert!(ConfigCheck::new(&config).run().await.is_err());

        config.wallet_address = Some(addr(1).to_string());
        assert!(ConfigCheck::new(&config).run().await.is_ok());
    }

    #[tokio::test]
    async fn test_chain_check_id_mismatch() {
        let chain = Arc::new(MemoryChain::new(84532, addr(0xaa)));
        assert!(ChainCheck::new(chain.clone(), 8453).run().await.is_err());
        assert!(ChainCheck::new(chain, 84532).run().await.is_ok());
    }

    #[tokio::test]
    async fn test_access_pass_check_with_controller() {
        let chain = Arc::new(MemoryChain::new(8453, addr(0xaa)));
        let controller = Arc::new(AccessController::new(
            Arc::new(AccessTierRegistry::new()),
            chain,
        ));
        let check = AccessPassCheck::new(
            Some(addr(1)),
            Some(controller.clone() as Arc<dyn PassVerifier>),
            true,
        );
        assert!(check.run().await.is_err());

        controller.mint(&addr(1), TIER_BASIC).await.unwrap();
        let outcome = check.run().await.unwrap();
        assert!(outcome.detail.unwrap().contains("Basic Access"));
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_access_pass_check_without_source() {
        assert!(AccessPassCheck::new(Some(addr(1)), None, true).run().await.is_err());
        let outcome = AccessPassCheck::new(Some(addr(1)), None, false).run().await.unwrap();
        assert!(outcome.skipped);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_test_send_only_warns() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/nft/check/{}", addr(1).to_checksum())))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": { "has_nft": true, "token_id": "7", "tier": "basic", "is_active": true }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/test/send"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = Arc::new(PassApiClient::new(&server.uri(), None, Duration::from_secs(5)));
        let outcome = AccessPassCheck::new(Some(addr(1)), Some(api as Arc<dyn PassVerifier>), true)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_hosted_pass_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/nft/check/{}", addr(1).to_checksum())))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": {
                    "has_nft": true,
                    "token_id": "7",
                    "tier": "basic",
                    "is_active": true,
                    "expires_at": 1_600_000_000
                }
            })))
            .mount(&server)
            .await;

        let api = Arc::new(PassApiClient::new(&server.uri(), None, Duration::from_secs(5)));
        assert!(matches!(
            api.verify(&addr(1)).await,
            Err(GateError::AccessDenied(AccessDenied::ExpiredAccess {
                token_id: 7,
                expired_at: 1_600_000_000
            }))
        ));

        let err = AccessPassCheck::new(Some(addr(1)), Some(api as Arc<dyn PassVerifier>), true)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::AccessDenied(AccessDenied::ExpiredAccess { .. })
        ));
    }

    #[tokio::test]
    async fn test_hosted_pass_with_future_expiry_passes() {
        let server = MockServer::start().await;
        let expires_at = chrono::Utc::now().timestamp() + 86_400;
        Mock::given(method("GET"))
            .and(path(format!("/nft/check/{}", addr(1).to_checksum())))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": {
                    "has_nft": true,
                    "token_id": "7",
                    "tier": "pro",
                    "is_active": true,
                    "expires_at": expires_at
                }
            })))
            .mount(&server)
            .await;

        let api = PassApiClient::new(&server.uri(), None, Duration::from_secs(5));
        assert_eq!(api.verify(&addr(1)).await.unwrap(), "pass 7 (pro)");
    }

    #[tokio::test]
    async fn test_default_agent_created_once() {
        let directory = Arc::new(MemoryAgentDirectory::new());
        let check = DefaultAgentCheck::new(Some(addr(1)), directory.clone());

        let first = check.run().await.unwrap().detail.unwrap();
        let second = check.run().await.unwrap().detail.unwrap();
        assert_eq!(first, second);
        assert_eq!(directory.agents.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stored_agent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(GateDb::open(Some(dir.path().join("a.redb").to_str().unwrap())).unwrap());
        let directory = StoredAgentDirectory::new(db.clone());

        let created = directory.create_default(&addr(2), DEFAULT_AGENT_NAME).await.unwrap();
        assert_eq!(directory.find_default(&addr(2)).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn test_llm_gateway_ping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("Authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("Authorization", "Bearer bad"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let good = HttpLlmGateway::new(&server.uri(), "good", Duration::from_secs(5));
        assert!(good.ping().await.is_ok());

        let bad = HttpLlmGateway::new(&server.uri(), "bad", Duration::from_secs(5));
        assert!(matches!(
            bad.ping().await,
            Err(GateError::ExternalService {
                kind: ExternalServiceKind::Rejected,
                ..
            })
        ));
    }
}
