//! ============================================================================
//! Startup Module - Boot-time go/no-go validation
//! ============================================================================

pub mod checks;
mod gate;

pub use checks::{
    AgentDirectory, CheckOutcome, HttpLlmGateway, KnowledgeSync, LlmGateway,
    MemoryAgentDirectory, PassVerifier, StartupCheck, StoredAgentDirectory,
};
pub use gate::{CheckResult, CheckStatus, StartupDeps, StartupGate, StartupReport};
