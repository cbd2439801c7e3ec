//! Intent pipeline core types.
//!
//! Canonical definitions for intents, classifier candidates, clarification
//! requests, capability descriptors, the schema validator, and the per-command
//! workflow state machine.

pub mod capability;
pub mod intent;
pub mod validate;
pub mod workflow;

pub use capability::{ActionSchema, CapabilityDescriptor, ParamKind, ParamSpec};
pub use intent::{
    ClarificationExchange, ClarificationRequest, Intent, IntentCandidate, Parameters,
    ACTION_FIELD, MODULE_FIELD,
};
pub use validate::{validate, FieldError, FieldErrorKind, ValidationMode, ValidationReport};
pub use workflow::{
    CompletedStep, ExecutionResult, PendingStep, PhaseParseError, PhaseTransition,
    TransitionError, WorkflowPhase, WorkflowState,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Command ID - Newtype to prevent mixing with other IDs
// ============================================================================

/// Identifier of one user-issued command (UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CommandId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
