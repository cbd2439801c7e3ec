//! Command-level errors and outcomes.

use crate::classifier::ClassifierError;
use crate::frontend::FrontendError;
use crate::module::ModuleError;
use crate::registry::RegistryError;
use marco_intent::{CommandId, CompletedStep, Intent, TransitionError, WorkflowPhase};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Why a command failed.
///
/// Cancellation and uncertainty are not errors; see [`CommandOutcome`].
#[derive(Debug, Error)]
pub enum McpError {
    #[error("intent classifier unavailable: {0}")]
    ClassifierUnavailable(#[from] ClassifierError),

    #[error("could not resolve intent: {reason}")]
    IntentUnresolved {
        reason: String,
        best_guess: Option<Intent>,
    },

    #[error("invalid intent {intent}: {reason}")]
    InvalidIntent { intent: Intent, reason: String },

    #[error("{module}.{action} failed after {attempts} attempt(s): {source}")]
    ModuleExecution {
        module: String,
        action: String,
        attempts: u32,
        #[source]
        source: ModuleError,
    },

    #[error("command exceeded its time budget of {0:?}")]
    CommandTimedOut(Duration),

    #[error("command exceeded the limit of {0} steps")]
    StepLimitExceeded(usize),

    #[error("capability registry has not been sealed")]
    NotSealed,

    #[error("registry error: {0}")]
    Registry(RegistryError),

    #[error("front-end error: {0}")]
    Frontend(#[from] FrontendError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Stable machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            McpError::ClassifierUnavailable(_) => "classifier_unavailable",
            McpError::IntentUnresolved { .. } => "intent_unresolved",
            McpError::InvalidIntent { .. } => "invalid_intent",
            McpError::ModuleExecution { .. } => "module_execution",
            McpError::CommandTimedOut(_) => "command_timed_out",
            McpError::StepLimitExceeded(_) => "step_limit_exceeded",
            McpError::NotSealed => "not_sealed",
            McpError::Registry(_) => "registry",
            McpError::Frontend(_) => "frontend",
            McpError::Internal(_) => "internal",
        }
    }
}

impl From<RegistryError> for McpError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotSealed => McpError::NotSealed,
            other => McpError::Registry(other),
        }
    }
}

impl From<TransitionError> for McpError {
    fn from(err: TransitionError) -> Self {
        McpError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, McpError>;

/// What a finished command produced.
#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command_id: CommandId,
    pub steps: Vec<CompletedStep>,
    pub context: BTreeMap<String, Value>,
}

impl CommandReport {
    /// Output of the last step, or `null` when nothing ran.
    pub fn final_output(&self) -> &Value {
        static NULL: Value = Value::Null;
        self.steps.last().map(|s| &s.result.output).unwrap_or(&NULL)
    }
}

/// Terminal result of a command.
#[derive(Debug)]
pub enum CommandOutcome {
    Completed(CommandReport),
    /// Abandoned by the user or the system; no error.
    Cancelled {
        command_id: CommandId,
        /// Phase in which the cancellation was observed.
        phase: WorkflowPhase,
        reason: String,
    },
    /// A destructive action was in flight when the command was cancelled or
    /// timed out; its effect is unknown.
    Uncertain {
        command_id: CommandId,
        intent: Intent,
        reason: String,
    },
    Failed(McpError),
}

impl CommandOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            CommandOutcome::Completed(_) => "completed",
            CommandOutcome::Cancelled { .. } => "cancelled",
            CommandOutcome::Uncertain { .. } => "uncertain",
            CommandOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, CommandOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommandOutcome::Cancelled { .. })
    }

    pub fn is_uncertain(&self) -> bool {
        matches!(self, CommandOutcome::Uncertain { .. })
    }

    pub fn error(&self) -> Option<&McpError> {
        match self {
            CommandOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// JSON rendering for machine consumers.
    pub fn to_json(&self) -> Value {
        match self {
            CommandOutcome::Completed(report) => serde_json::json!({
                "status": self.status(),
                "command_id": report.command_id,
                "steps": report.steps,
                "context": report.context,
            }),
            CommandOutcome::Cancelled {
                command_id,
                phase,
                reason,
            } => serde_json::json!({
                "status": self.status(),
                "command_id": command_id,
                "phase": phase,
                "reason": reason,
            }),
            CommandOutcome::Uncertain {
                command_id,
                intent,
                reason,
            } => serde_json::json!({
                "status": self.status(),
                "command_id": command_id,
                "intent": intent,
                "reason": reason,
            }),
            CommandOutcome::Failed(err) => serde_json::json!({
                "status": self.status(),
                "error": {
                    "kind": err.kind(),
                    "message": err.to_string(),
                },
            }),
        }
    }
}
