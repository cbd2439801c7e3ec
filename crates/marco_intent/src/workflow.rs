//! Per-command workflow state machine.
//!
//! A command moves through
//! `Classifying → Disambiguating → Validating → ConfirmPending → Dispatching → StepComplete`
//! and loops back to `Classifying` for follow-up steps, ending in `Done`,
//! `Failed`, `Cancelled` or `Uncertain`. The whole state is serializable so a
//! command suspended on user input holds no thread.

use crate::intent::{ClarificationExchange, ClarificationRequest, Intent, IntentCandidate};
use crate::CommandId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Workflow Phase
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowPhase {
    /// Waiting on the classifier backend
    Classifying,
    /// Ranking candidates; may be suspended on a clarification answer
    Disambiguating,
    /// Checking the resolved intent against the module schema
    Validating,
    /// Waiting for confirmation of a destructive action
    ConfirmPending,
    /// Waiting on the module
    Dispatching,
    /// Result recorded; next step or done
    StepComplete,

    // ========== Terminal ==========
    Done,
    Failed,
    /// User- or system-initiated abandonment (not an error)
    Cancelled,
    /// Cancelled or timed out while a destructive action was in flight
    Uncertain,
}

impl WorkflowPhase {
    pub const ALL: [WorkflowPhase; 10] = [
        WorkflowPhase::Classifying,
        WorkflowPhase::Disambiguating,
        WorkflowPhase::Validating,
        WorkflowPhase::ConfirmPending,
        WorkflowPhase::Dispatching,
        WorkflowPhase::StepComplete,
        WorkflowPhase::Done,
        WorkflowPhase::Failed,
        WorkflowPhase::Cancelled,
        WorkflowPhase::Uncertain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Classifying => "CLASSIFYING",
            WorkflowPhase::Disambiguating => "DISAMBIGUATING",
            WorkflowPhase::Validating => "VALIDATING",
            WorkflowPhase::ConfirmPending => "CONFIRM_PENDING",
            WorkflowPhase::Dispatching => "DISPATCHING",
            WorkflowPhase::StepComplete => "STEP_COMPLETE",
            WorkflowPhase::Done => "DONE",
            WorkflowPhase::Failed => "FAILED",
            WorkflowPhase::Cancelled => "CANCELLED",
            WorkflowPhase::Uncertain => "UNCERTAIN",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowPhase::Done
                | WorkflowPhase::Failed
                | WorkflowPhase::Cancelled
                | WorkflowPhase::Uncertain
        )
    }

    pub fn valid_transitions(&self) -> &'static [WorkflowPhase] {
        match self {
            WorkflowPhase::Classifying => &[
                WorkflowPhase::Disambiguating,
                WorkflowPhase::Failed,
                WorkflowPhase::Cancelled,
            ],
            WorkflowPhase::Disambiguating => &[
                WorkflowPhase::Classifying,
                WorkflowPhase::Validating,
                WorkflowPhase::Failed,
                WorkflowPhase::Cancelled,
            ],
            WorkflowPhase::Validating => &[
                WorkflowPhase::Disambiguating,
                WorkflowPhase::ConfirmPending,
                WorkflowPhase::Dispatching,
                WorkflowPhase::Failed,
                WorkflowPhase::Cancelled,
            ],
            WorkflowPhase::ConfirmPending => &[
                WorkflowPhase::Dispatching,
                WorkflowPhase::Failed,
                WorkflowPhase::Cancelled,
            ],
            WorkflowPhase::Dispatching => &[
                WorkflowPhase::StepComplete,
                WorkflowPhase::Failed,
                WorkflowPhase::Cancelled,
                WorkflowPhase::Uncertain,
            ],
            WorkflowPhase::StepComplete => &[
                WorkflowPhase::Classifying,
                WorkflowPhase::Done,
                WorkflowPhase::Failed,
                WorkflowPhase::Cancelled,
            ],
            WorkflowPhase::Done
            | WorkflowPhase::Failed
            | WorkflowPhase::Cancelled
            | WorkflowPhase::Uncertain => &[],
        }
    }

    pub fn can_transition_to(&self, target: WorkflowPhase) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error when parsing a WorkflowPhase from string.
#[derive(Debug, Error, Clone)]
#[error("invalid phase: {0}")]
pub struct PhaseParseError(String);

impl std::str::FromStr for WorkflowPhase {
    type Err = PhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowPhase::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PhaseParseError(s.to_string()))
    }
}

// ============================================================================
// Phase Transition
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: WorkflowPhase,
    pub to: WorkflowPhase,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: WorkflowPhase,
        to: WorkflowPhase,
    },

    #[error("phase is terminal: {0}")]
    TerminalPhase(WorkflowPhase),
}

// ============================================================================
// Steps
// ============================================================================

/// What a module returns from a successful execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: Value,
    /// Facts merged into the command's cumulative context.
    #[serde(default)]
    pub facts: BTreeMap<String, Value>,
    /// Text for the next workflow step, if the module asks for one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ExecutionResult {
    pub fn new(output: impl Into<Value>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }

    pub fn with_follow_up(mut self, text: impl Into<String>) -> Self {
        self.follow_up = Some(text.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub index: usize,
    pub intent: Intent,
    pub result: ExecutionResult,
    /// Module calls made for this step (2 when a retry happened).
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

/// The one thing a command is currently waiting on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingStep {
    /// Resolved, waiting to be validated or dispatched
    Intent { intent: Intent },
    /// Waiting for the user to answer
    Clarification { request: ClarificationRequest },
    /// Waiting for the user to confirm a destructive action
    Confirmation { intent: Intent, description: String },
}

impl PendingStep {
    pub fn intent(&self) -> &Intent {
        match self {
            PendingStep::Intent { intent } | PendingStep::Confirmation { intent, .. } => intent,
            PendingStep::Clarification { request } => &request.context,
        }
    }
}

// ============================================================================
// Workflow State
// ============================================================================

/// Everything known about one in-flight command. Owned by exactly one
/// command; snapshots are clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub command_id: CommandId,
    phase: WorkflowPhase,
    /// Text the user submitted
    pub input: String,
    /// Text being classified for the current step
    pub current_text: String,
    pub steps: Vec<CompletedStep>,
    pub pending_step: Option<PendingStep>,
    /// Facts accumulated across steps
    pub cumulative_context: BTreeMap<String, Value>,
    /// Caller-supplied context for the whole command
    pub session_context: BTreeMap<String, Value>,
    /// Ranked output of the latest classification
    pub candidates: Vec<IntentCandidate>,
    /// Questions and answers of the current step
    pub clarifications: Vec<ClarificationExchange>,
    pub clarification_rounds: u32,
    history: Vec<PhaseTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(
        command_id: CommandId,
        input: impl Into<String>,
        session_context: BTreeMap<String, Value>,
    ) -> Self {
        let input = input.into();
        let now = Utc::now();
        Self {
            command_id,
            phase: WorkflowPhase::Classifying,
            current_text: input.clone(),
            input,
            steps: Vec::new(),
            pending_step: None,
            cumulative_context: BTreeMap::new(),
            session_context,
            candidates: Vec::new(),
            clarifications: Vec::new(),
            clarification_rounds: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Move to `to`, recording the transition.
    pub fn transition(
        &mut self,
        to: WorkflowPhase,
        reason: Option<String>,
    ) -> Result<PhaseTransition, TransitionError> {
        if self.phase.is_terminal() {
            return Err(TransitionError::TerminalPhase(self.phase));
        }
        if !self.phase.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition {
                from: self.phase,
                to,
            });
        }

        let now = Utc::now();
        let transition = PhaseTransition {
            from: self.phase,
            to,
            timestamp: now,
            reason,
        };
        self.phase = to;
        self.updated_at = now;
        self.history.push(transition.clone());
        Ok(transition)
    }

    /// Record a completed module call and merge its facts.
    pub fn record_step(&mut self, intent: Intent, result: ExecutionResult, attempts: u32) {
        for (key, value) in &result.facts {
            self.cumulative_context.insert(key.clone(), value.clone());
        }
        self.steps.push(CompletedStep {
            index: self.steps.len(),
            intent,
            result,
            attempts,
            completed_at: Utc::now(),
        });
        self.pending_step = None;
        self.updated_at = Utc::now();
    }

    /// Reset per-step bookkeeping before classifying `text` as the next step.
    pub fn begin_next_step(&mut self, text: impl Into<String>) {
        self.current_text = text.into();
        self.candidates.clear();
        self.clarifications.clear();
        self.clarification_rounds = 0;
        self.pending_step = None;
    }

    pub fn last_step(&self) -> Option<&CompletedStep> {
        self.steps.last()
    }
}
