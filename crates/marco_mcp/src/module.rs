//! Module Execution Contract.
//!
//! Every capability module implements [`Module`]. The registry holds modules as
//! `Arc<dyn Module>` and the orchestrator calls them by string key.

use async_trait::async_trait;
use marco_intent::{CapabilityDescriptor, ExecutionResult, Parameters};
use thiserror::Error;

/// Typed failure returned by a module.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// Worth one retry for idempotent actions (network blip, busy resource).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Permanent failure; the detail is shown to the user.
    #[error("{0}")]
    Failed(String),

    /// Action is advertised but not implemented.
    #[error("action '{0}' is not supported")]
    Unsupported(String),
}

impl ModuleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ModuleError::Transient(_))
    }
}

/// A capability module.
///
/// `execute` receives parameters already validated and normalized against the
/// schema from [`Module::capabilities`].
#[async_trait]
pub trait Module: Send + Sync {
    /// Descriptor advertised to the registry. Called once at registration.
    fn capabilities(&self) -> CapabilityDescriptor;

    async fn execute(
        &self,
        action: &str,
        parameters: &Parameters,
    ) -> Result<ExecutionResult, ModuleError>;
}
