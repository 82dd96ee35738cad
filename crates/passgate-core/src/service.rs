//! ============================================================================
//! Gated Service - Metered request pipeline
//! ============================================================================
//! One paid request runs: bearer credential -> verified wallet -> tier check
//! -> credit debit -> optional stored credential -> analysis engine.
//! A debit is never reversed automatically. When the engine fails after the
//! debit, the failure is logged as needing a refund and returned; the caller
//! decides whether to `UsageLedger::refund`.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use zeroize::Zeroizing;

use crate::access::AccessGate;
use crate::error::GateResult;
use crate::identity::{IdentityResolver, WalletSignature};
use crate::ledger::{OperationType, UsageLedger};
use crate::types::VerifiedWallet;
use crate::vault::SecretVault;

/// One analysis request as seen by the engine
pub struct AnalysisRequest<'a> {
    pub wallet: &'a VerifiedWallet,
    pub operation: OperationType,
    pub content: &'a str,
    /// Decrypted stored credential, when the request asked for one
    pub credential: Option<&'a [u8]>,
}

/// Score and findings for analysed content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub score: u32,
    pub findings: Vec<String>,
}

/// Engine that executes paid operations; pricing only needs the operation type
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest<'_>) -> GateResult<AnalysisResult>;
}

/// Stored credential a request needs, with the owner's vault signature
pub struct CredentialRef<'a> {
    pub secret_id: &'a str,
    pub signature: &'a WalletSignature,
}

/// Outcome of a metered request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatedResponse {
    pub wallet: String,
    pub operation: OperationType,
    pub tier: u8,
    pub balance_after: u64,
    pub result: AnalysisResult,
}

/// Identity, access and metering in front of an `AnalysisEngine`
pub struct GatedService {
    resolver: IdentityResolver,
    gate: Arc<AccessGate>,
    ledger: Arc<UsageLedger>,
    vault: Option<Arc<SecretVault>>,
}

impl GatedService {
    pub fn new(resolver: IdentityResolver, gate: Arc<AccessGate>, ledger: Arc<UsageLedger>) -> Self {
        Self {
            resolver,
            gate,
            ledger,
            vault: None,
        }
    }

    pub fn with_vault(mut self, vault: Arc<SecretVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Authenticate, authorize, debit, then run `engine`
    pub async fn run(
        &self,
        bearer_token: &str,
        operation: OperationType,
        content: &str,
        engine: &dyn AnalysisEngine,
    ) -> GateResult<GatedResponse> {
        self.run_with_credential(bearer_token, operation, content, None, engine)
            .await
    }

    /// As `run`, decrypting a stored credential for the engine after the debit
    pub async fn run_with_credential(
        &self,
        bearer_token: &str,
        operation: OperationType,
        content: &str,
        credential: Option<CredentialRef<'_>>,
        engine: &dyn AnalysisEngine,
    ) -> GateResult<GatedResponse> {
        let wallet = self.resolver.authenticate(bearer_token).await?;
        let tier = self.gate.authorize(&wallet.address, operation).await?;

        let balance_after = self
            .ledger
            .spend_op(&wallet.address, operation, "metered request")
            .await?;

        let price = self.ledger.price_of(operation.as_str())?;
        let result = self
            .execute(&wallet, operation, content, credential, engine)
            .await;

        match result {
            Ok(result) => {
                info!(
                    "{} completed {} (tier {}, {} credits left)",
                    wallet.address.short(),
                    operation,
                    tier,
                    balance_after
                );
                Ok(GatedResponse {
                    wallet: wallet.address.to_checksum(),
                    operation,
                    tier,
                    balance_after,
                    result,
                })
            }
            Err(e) => {
                error!(
                    "{} failed after debit of {} credits, refund required: {}",
                    operation, price, e
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        wallet: &VerifiedWallet,
        operation: OperationType,
        content: &str,
        credential: Option<CredentialRef<'_>>,
        engine: &dyn AnalysisEngine,
    ) -> GateResult<AnalysisResult> {
        let secret = match (credential, &self.vault) {
            (Some(cred), Some(vault)) => Some(Zeroizing::new(
                vault.retrieve(cred.secret_id, cred.signature).await?,
            )),
            (Some(cred), None) => {
                return Err(crate::error::GateError::SecretNotFound(format!(
                    "{} (no vault configured)",
                    cred.secret_id
                )))
            }
            (None, _) => None,
        };

        engine
            .analyze(AnalysisRequest {
                wallet,
                operation,
                content,
                credential: secret.as_ref().map(|s| s.as_slice()),
            })
            .await
    }
}
