//! Workflow Orchestrator (MCP core)
//!
//! Each submitted command runs as one tokio task that owns its
//! [`WorkflowState`]. Status watchers get a snapshot on every phase change;
//! cancellation goes through a command-scoped [`CancellationToken`].

mod answer;
mod run;

use crate::cancel::CancellationToken;
use crate::classifier::Classifier;
use crate::error::{CommandOutcome, McpError};
use crate::frontend::Frontend;
use crate::policy::McpPolicy;
use crate::registry::CapabilityRegistry;
use marco_intent::{CommandId, WorkflowState};
use run::CommandRunner;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Either the process-wide registry or a private one.
#[derive(Clone)]
pub enum RegistryRef {
    Global(&'static CapabilityRegistry),
    Shared(Arc<CapabilityRegistry>),
}

impl Deref for RegistryRef {
    type Target = CapabilityRegistry;

    fn deref(&self) -> &CapabilityRegistry {
        match self {
            RegistryRef::Global(registry) => registry,
            RegistryRef::Shared(registry) => registry,
        }
    }
}

impl From<&'static CapabilityRegistry> for RegistryRef {
    fn from(registry: &'static CapabilityRegistry) -> Self {
        RegistryRef::Global(registry)
    }
}

impl From<Arc<CapabilityRegistry>> for RegistryRef {
    fn from(registry: Arc<CapabilityRegistry>) -> Self {
        RegistryRef::Shared(registry)
    }
}

/// The Master Control Program.
#[derive(Clone)]
pub struct Mcp {
    registry: RegistryRef,
    classifier: Arc<dyn Classifier>,
    frontend: Arc<dyn Frontend>,
    policy: McpPolicy,
}

impl Mcp {
    pub fn new(
        registry: impl Into<RegistryRef>,
        classifier: Arc<dyn Classifier>,
        frontend: Arc<dyn Frontend>,
        policy: McpPolicy,
    ) -> Self {
        Self {
            registry: registry.into(),
            classifier,
            frontend,
            policy,
        }
    }

    pub fn policy(&self) -> &McpPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Start `text` as a new command on the current tokio runtime.
    pub fn submit_command(
        &self,
        text: impl Into<String>,
        session_context: BTreeMap<String, Value>,
    ) -> Result<CommandHandle, McpError> {
        if !self.registry.is_sealed() {
            return Err(McpError::NotSealed);
        }

        let cancel = CancellationToken::new();
        let runner = CommandRunner::new(self.clone(), text.into(), session_context, cancel.clone());
        let id = runner.command_id();
        let status = runner.subscribe();
        let task = tokio::spawn(runner.run());

        Ok(CommandHandle {
            id,
            status,
            cancel,
            task,
        })
    }

    /// Run `text` to completion on the calling task.
    pub async fn run_command(
        &self,
        text: impl Into<String>,
        session_context: BTreeMap<String, Value>,
        cancel: CancellationToken,
    ) -> CommandOutcome {
        if !self.registry.is_sealed() {
            return CommandOutcome::Failed(McpError::NotSealed);
        }
        CommandRunner::new(self.clone(), text.into(), session_context, cancel)
            .run()
            .await
    }
}

/// Caller's handle on a submitted command.
pub struct CommandHandle {
    id: CommandId,
    status: watch::Receiver<WorkflowState>,
    cancel: CancellationToken,
    task: JoinHandle<CommandOutcome>,
}

impl CommandHandle {
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Latest published snapshot.
    pub fn status(&self) -> WorkflowState {
        self.status.borrow().clone()
    }

    /// Receiver notified on every phase change.
    pub fn watch(&self) -> watch::Receiver<WorkflowState> {
        self.status.clone()
    }

    /// Request cancellation. Idempotent; a finished command is unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> CommandOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => CommandOutcome::Failed(McpError::Internal(format!(
                "command task failed: {}",
                err
            ))),
        }
    }
}
