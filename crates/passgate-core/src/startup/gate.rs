//! ============================================================================
//! Startup Gate - Ordered go/no-go validation at boot
//! ============================================================================
//! Runs its checks in order, once, before any request is served. The first
//! failing required check aborts the run: it is recorded as `Failed` and every
//! later check as `Skipped`. Optional failures are recorded as `Warned` and
//! the run continues.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::checks::{
    AccessPassCheck, AgentDirectory, ChainCheck, ConfigCheck, CredentialsCheck, DefaultAgentCheck,
    KnowledgeSync, KnowledgeSyncCheck, LlmGateway, PassVerifier, ReachabilityCheck, StartupCheck,
};
use crate::access::ChainQuery;
use crate::config::GateConfig;
use crate::error::{ExternalServiceKind, GateError, GateResult};
use crate::identity::IdentityProvider;

/// Upper bound on a single check, on top of the checks' own I/O timeouts
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(120);

/// Where a check ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    /// Optional check failed
    Warned,
    /// Required check failed; startup aborted
    Failed,
    /// Not attempted, or had nothing to do
    Skipped,
}

impl CheckStatus {
    fn symbol(&self) -> &'static str {
        match self {
            CheckStatus::Passed => "[ok]",
            CheckStatus::Warned => "[warn]",
            CheckStatus::Failed => "[FAIL]",
            CheckStatus::Skipped => "[skip]",
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub required: bool,
    pub status: CheckStatus,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }
}

/// Result of a whole startup run; never mutated after `validate` returns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupReport {
    pub success: bool,
    /// In execution order
    pub checks: Vec<CheckResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StartupReport {
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// `StartupFatal` unless every required check passed
    pub fn into_result(self) -> GateResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(GateError::StartupFatal(self.errors))
        }
    }
}

impl fmt::Display for StartupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{}", rule)?;
        writeln!(f, "STARTUP VALIDATION REPORT")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Status: {}", if self.success { "PASSED" } else { "FAILED" })?;
        writeln!(f)?;
        writeln!(f, "Checklist:")?;
        for (i, check) in self.checks.iter().enumerate() {
            let tag = if check.required { "required" } else { "optional" };
            write!(f, "  {} {}. {} ({})", check.status.symbol(), i + 1, check.name, tag)?;
            if let Some(detail) = &check.detail {
                write!(f, " - {}", detail)?;
            }
            writeln!(f)?;
        }
        if !self.errors.is_empty() {
            writeln!(f)?;
            writeln!(f, "Errors:")?;
            for e in &self.errors {
                writeln!(f, "  - {}", e)?;
            }
        }
        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Warnings:")?;
            for w in &self.warnings {
                writeln!(f, "  - {}", w)?;
            }
        }
        write!(f, "{}", rule)
    }
}

/// Collaborators for the standard seven-step sequence
pub struct StartupDeps {
    pub identity: Arc<dyn IdentityProvider>,
    pub llm: Arc<dyn LlmGateway>,
    pub chain: Arc<dyn ChainQuery>,
    pub pass: Option<Arc<dyn PassVerifier>>,
    pub knowledge: Option<Arc<dyn KnowledgeSync>>,
    pub agents: Arc<dyn AgentDirectory>,
}

/// Linear boot-time validator
pub struct StartupGate {
    checks: Vec<Box<dyn StartupCheck>>,
    check_timeout: Duration,
}

impl Default for StartupGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupGate {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    /// The standard sequence:
    /// 1. configuration (required)
    /// 2. identity provider + LLM reachability (required)
    /// 3. identity provider credentials (required)
    /// 4. chain connectivity (optional)
    /// 5. access pass of the gating wallet (required)
    /// 6. knowledge base sync (optional)
    /// 7. default agent (required)
    pub fn standard(config: &GateConfig, deps: StartupDeps) -> Self {
        let wallet = config.wallet().ok();
        Self::new()
            .with_check(ConfigCheck::new(config))
            .with_check(ReachabilityCheck::new(deps.identity.clone(), deps.llm))
            .with_check(CredentialsCheck::new(deps.identity))
            .with_check(ChainCheck::new(deps.chain, config.chain.expected_chain_id))
            .with_check(AccessPassCheck::new(wallet, deps.pass, config.access.required))
            .with_check(KnowledgeSyncCheck::new(deps.knowledge))
            .with_check(DefaultAgentCheck::new(wallet, deps.agents))
    }

    pub fn with_check<C: StartupCheck + 'static>(mut self, check: C) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check in order and build the report
    pub async fn validate(&self) -> StartupReport {
        info!("Starting startup validation ({} checks)", self.checks.len());

        let mut report = StartupReport {
            success: true,
            checks: Vec::with_capacity(self.checks.len()),
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        for (i, check) in self.checks.iter().enumerate() {
            let name = check.name().to_string();
            let required = check.required();

            if !report.success {
                report.checks.push(CheckResult {
                    name,
                    required,
                    status: CheckStatus::Skipped,
                    detail: Some("not attempted".to_string()),
                    error: None,
                    duration_ms: 0,
                });
                continue;
            }

            info!("[{}/{}] {}...", i + 1, self.checks.len(), name);
            let started = Instant::now();
            let outcome = match tokio::time::timeout(self.check_timeout, check.run()).await {
                Ok(result) => result,
                Err(_) => Err(GateError::external(
                    name.as_str(),
                    ExternalServiceKind::Timeout,
                    format!("check exceeded {}s", self.check_timeout.as_secs()),
                )),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(outcome) => {
                    for w in &outcome.warnings {
                        warn!("{}: {}", name, w);
                        report.warnings.push(format!("{}: {}", name, w));
                    }
                    let status = if outcome.skipped {
                        info!("{} skipped", name);
                        CheckStatus::Skipped
                    } else {
                        info!("{} passed", name);
                        CheckStatus::Passed
                    };
                    CheckResult {
                        name,
                        required,
                        status,
                        detail: outcome.detail,
                        error: None,
                        duration_ms,
                    }
                }
                Err(e) if required => {
                    error!("{} failed: {}", name, e);
                    report.success = false;
                    report.errors.push(format!("{}: {}", name, e));
                    CheckResult {
                        name,
                        required,
                        status: CheckStatus::Failed,
                        detail: None,
                        error: Some(e.to_string()),
                        duration_ms,
                    }
                }
                Err(e) => {
                    warn!("{} failed, continuing: {}", name, e);
                    report.warnings.push(format!("{}: {}", name, e));
                    CheckResult {
                        name,
                        required,
                        status: CheckStatus::Warned,
                        detail: None,
                        error: Some(e.to_string()),
                        duration_ms,
                    }
                }
            };
            report.checks.push(result);
        }

        if report.success {
            info!("All startup checks passed");
        } else {
            error!("Startup validation failed: {}", report.errors.join("; "));
        }
        report
    }

    /// Log the report line by line
    pub fn print_report(report: &StartupReport) {
        let rendered = report.to_string();
        for line in rendered.lines() {
            if report.success {
                info!("{}", line);
            } else {
                error!("{}", line);
            }
        }
    }

    /// Validate, print the report and exit with status 1 on failure
    pub async fn must_validate(&self) -> StartupReport {
        let report = self.validate().await;
        Self::print_report(&report);

        if !report.success {
            error!("Startup aborted: fix the errors above and try again");
            std::process::exit(1);
        }

        info!("Startup validation complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessController, AccessTierRegistry, MemoryChain, TIER_BASIC};
    use crate::identity::ResolvedIdentity;
    use crate::startup::checks::{CheckOutcome, MemoryAgentDirectory};
    use crate::types::Address;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeCheck {
        name: &'static str,
        required: bool,
        fail: bool,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StartupCheck for FakeCheck {
        fn name(&self) -> &str {
            self.name
        }

        fn required(&self) -> bool {
            self.required
        }

        async fn run(&self) -> GateResult<CheckOutcome> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(GateError::external(
                    self.name,
                    ExternalServiceKind::Rejected,
                    "no",
                ))
            } else {
                Ok(CheckOutcome::passed("ok"))
            }
        }
    }

    /// Seven steps with the standard required/optional pattern; `failing` are 1-based
    fn gate(failing: &[usize], runs: &Arc<AtomicUsize>) -> StartupGate {
        let required = [true, true, true, false, true, false, true];
        let mut gate = StartupGate::new();
        for (i, req) in required.iter().enumerate() {
            let names = ["s1", "s2", "s3", "s4", "s5", "s6", "s7"];
            gate = gate.with_check(FakeCheck {
                name: names[i],
                required: *req,
                fail: failing.contains(&(i + 1)),
                runs: runs.clone(),
            });
        }
        gate
    }

    #[tokio::test]
    async fn test_all_pass() {
        let runs = Arc::new(AtomicUsize::new(0));
        let report = gate(&[], &runs).validate().await;
        assert!(report.success);
        assert!(report.checks.iter().all(|c| c.passed()));
        assert_eq!(runs.load(Ordering::SeqCst), 7);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_required_failure_stops_the_sequence() {
        let runs = Arc::new(AtomicUsize::new(0));
        let report = gate(&[3], &runs).validate().await;

        assert!(!report.success);
        assert_eq!(report.checks.len(), 7);
        assert_eq!(report.checks[2].status, CheckStatus::Failed);
        assert!(report.checks[3..].iter().all(|c| !c.passed()));
        assert!(report.checks[3..]
            .iter()
            .all(|c| c.status == CheckStatus::Skipped));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.into_result(),
            Err(GateError::StartupFatal(errors)) if errors.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_optional_failure_only_warns() {
        let runs = Arc::new(AtomicUsize::new(0));
        let report = gate(&[4], &runs).validate().await;

        assert!(report.success);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.errors.is_empty());
        assert_eq!(report.check("s4").unwrap().status, CheckStatus::Warned);
        assert_eq!(report.check("s7").unwrap().status, CheckStatus::Passed);
        assert_eq!(runs.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_slow_check_times_out() {
        struct Hang;

        #[async_trait]
        impl StartupCheck for Hang {
            fn name(&self) -> &str {
                "hang"
            }
            fn required(&self) -> bool {
                true
            }
            async fn run(&self) -> GateResult<CheckOutcome> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(CheckOutcome::default())
            }
        }

        let report = StartupGate::new()
            .with_check(Hang)
            .with_check_timeout(Duration::from_millis(20))
            .validate()
            .await;
        assert!(!report.success);
        assert!(report.errors[0].contains("timed out"));
    }

    #[tokio::test]
    async fn test_report_rendering() {
        let runs = Arc::new(AtomicUsize::new(0));
        let report = gate(&[4], &runs).validate().await;
        let text = report.to_string();
        assert!(text.contains("Status: PASSED"));
        assert!(text.contains("[warn] 4. s4 (optional)"));
        assert!(text.contains("Warnings:"));
    }

    struct StubIdentity {
        credentials_ok: bool,
    }

    #[async_trait]
    impl IdentityProvider for StubIdentity {
        async fn resolve(&self, _bearer_token: &str) -> GateResult<ResolvedIdentity> {
            Err(GateError::Authentication("not used".to_string()))
        }

        async fn ping(&self) -> GateResult<()> {
            Ok(())
        }

        async fn validate_credentials(&self) -> GateResult<()> {
            if self.credentials_ok {
                Ok(())
            } else {
                Err(GateError::external(
                    "identity provider",
                    ExternalServiceKind::Rejected,
                    "app secret not accepted",
                ))
            }
        }
    }

    struct StubLlm;

    #[async_trait]
    impl LlmGateway for StubLlm {
        async fn ping(&self) -> GateResult<()> {
            Ok(())
        }
    }

    fn wallet() -> Address {
        Address::from_bytes([1; 20])
    }

    fn config() -> GateConfig {
        let mut config = GateConfig::default();
        config.wallet_address = Some(wallet().to_string());
        config.identity.app_id = Some("app".to_string());
        config.llm.api_key = Some("key".to_string());
        config
    }

    /// Pass source where `wallet()` holds a Basic pass
    async fn pass_source() -> Arc<dyn PassVerifier> {
        let contract = Arc::new(MemoryChain::new(8453, Address::from_bytes([0xaa; 20])));
        let controller = Arc::new(AccessController::new(
            Arc::new(AccessTierRegistry::new()),
            contract,
        ));
        controller.mint(&wallet(), TIER_BASIC).await.unwrap();
        controller
    }

    async fn standard_deps(credentials_ok: bool, chain_id: u64) -> StartupDeps {
        StartupDeps {
            identity: Arc::new(StubIdentity { credentials_ok }),
            llm: Arc::new(StubLlm),
            chain: Arc::new(MemoryChain::new(chain_id, Address::from_bytes([0xaa; 20]))),
            pass: Some(pass_source().await),
            knowledge: None,
            agents: Arc::new(MemoryAgentDirectory::new()),
        }
    }

    #[tokio::test]
    async fn test_standard_sequence_passes() {
        let report = StartupGate::standard(&config(), standard_deps(true, 8453).await)
            .validate()
            .await;

        assert!(report.success);
        assert!(report.warnings.is_empty());
        assert_eq!(report.checks.len(), 7);
        assert_eq!(
            report.check("Knowledge base sync").unwrap().status,
            CheckStatus::Skipped
        );
        assert!(report.check("Default agent").unwrap().passed());
    }

    #[tokio::test]
    async fn test_standard_sequence_stops_on_rejected_credentials() {
        let report = StartupGate::standard(&config(), standard_deps(false, 8453).await)
            .validate()
            .await;

        assert!(!report.success);
        assert_eq!(report.checks[0].status, CheckStatus::Passed);
        assert_eq!(report.checks[1].status, CheckStatus::Passed);
        assert_eq!(report.checks[2].name, "Identity provider credentials");
        assert_eq!(report.checks[2].status, CheckStatus::Failed);
        assert!(report.checks[3..]
            .iter()
            .all(|c| c.status == CheckStatus::Skipped));
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("app secret not accepted"));
    }

    #[tokio::test]
    async fn test_standard_sequence_wrong_chain_only_warns() {
        let report = StartupGate::standard(&config(), standard_deps(true, 1).await)
            .validate()
            .await;

        assert!(report.success);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("wrong chain id"));
        assert_eq!(
            report.check("Chain connectivity").unwrap().status,
            CheckStatus::Warned
        );
        assert!(report.check("Access pass").unwrap().passed());
        assert!(report.check("Default agent").unwrap().passed());
    }
}
