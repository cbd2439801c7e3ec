//! Per-command state machine driver.

use super::answer::{fold_answer, Folded};
use super::Mcp;
use crate::cancel::CancellationToken;
use crate::classifier::ClassifyContext;
use crate::disambiguation::{clarification_for, resolve, Resolution};
use crate::error::{CommandOutcome, CommandReport, McpError};
use crate::frontend::{Answer, FrontendError};
use crate::module::ModuleError;
use crate::registry::RegistryError;
use marco_intent::{
    validate, ClarificationExchange, ClarificationRequest, CommandId, ExecutionResult, Intent,
    IntentCandidate, Parameters, PendingStep, TransitionError, WorkflowPhase, WorkflowState,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const MAX_DISPATCH_ATTEMPTS: u32 = 2;

/// Why the driver stopped before `Done`.
enum Halt {
    Cancelled(String),
    Uncertain { intent: Intent, reason: String },
    Failed(McpError),
}

impl From<McpError> for Halt {
    fn from(err: McpError) -> Self {
        Halt::Failed(err)
    }
}

impl From<TransitionError> for Halt {
    fn from(err: TransitionError) -> Self {
        Halt::Failed(err.into())
    }
}

impl From<RegistryError> for Halt {
    fn from(err: RegistryError) -> Self {
        Halt::Failed(err.into())
    }
}

type Step<T> = Result<T, Halt>;

pub(super) struct CommandRunner {
    mcp: Mcp,
    state: WorkflowState,
    cancel: CancellationToken,
    status: watch::Sender<WorkflowState>,
    /// Classifier and module time spent so far.
    machine_time: Duration,
}

impl CommandRunner {
    pub(super) fn new(
        mcp: Mcp,
        text: String,
        session_context: BTreeMap<String, Value>,
        cancel: CancellationToken,
    ) -> Self {
        let state = WorkflowState::new(CommandId::new(), text, session_context);
        let (status, _) = watch::channel(state.clone());
        Self {
            mcp,
            state,
            cancel,
            status,
            machine_time: Duration::ZERO,
        }
    }

    pub(super) fn command_id(&self) -> CommandId {
        self.state.command_id
    }

    pub(super) fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.status.subscribe()
    }

    pub(super) async fn run(mut self) -> CommandOutcome {
        let command_id = self.state.command_id;
        info!(%command_id, input = %self.state.input, "Command started");

        let outcome = match self.drive().await {
            Ok(()) => CommandOutcome::Completed(CommandReport {
                command_id,
                steps: self.state.steps.clone(),
                context: self.state.cumulative_context.clone(),
            }),
            Err(Halt::Cancelled(reason)) => {
                let phase = self.state.phase();
                warn!(%command_id, %phase, %reason, "Command cancelled");
                self.finish(WorkflowPhase::Cancelled, &reason);
                CommandOutcome::Cancelled {
                    command_id,
                    phase,
                    reason,
                }
            }
            Err(Halt::Uncertain { intent, reason }) => {
                warn!(
                    %command_id,
                    module = intent.module(),
                    action = intent.action(),
                    %reason,
                    "Destructive action outcome unknown"
                );
                self.finish(WorkflowPhase::Uncertain, &reason);
                CommandOutcome::Uncertain {
                    command_id,
                    intent,
                    reason,
                }
            }
            Err(Halt::Failed(err)) => {
                warn!(%command_id, kind = err.kind(), error = %err, "Command failed");
                self.finish(WorkflowPhase::Failed, &err.to_string());
                CommandOutcome::Failed(err)
            }
        };

        info!(
            %command_id,
            status = outcome.status(),
            steps = self.state.steps.len(),
            "Command finished"
        );
        outcome
    }

    async fn drive(&mut self) -> Step<()> {
        loop {
            let intent = self.resolve_step().await?;
            self.confirm_if_destructive(&intent).await?;
            let result = self.dispatch(intent).await?;

            match result.follow_up {
                Some(next) => {
                    if self.state.steps.len() >= self.mcp.policy.max_steps {
                        return Err(McpError::StepLimitExceeded(self.mcp.policy.max_steps).into());
                    }
                    self.transition(WorkflowPhase::Classifying, Some(format!("follow-up: {}", next)))?;
                    self.state.begin_next_step(next);
                    self.publish();
                }
                None => {
                    self.transition(WorkflowPhase::Done, None)?;
                    return Ok(());
                }
            }
        }
    }

    // ========================================================================
    // Classifying / Disambiguating / Validating
    // ========================================================================

    /// Run the current step until a validated intent is ready for dispatch.
    async fn resolve_step(&mut self) -> Step<Intent> {
        let mut text = self.state.current_text.clone();
        let mut answers = Parameters::new();

        loop {
            let candidates: Vec<IntentCandidate> = self
                .classify(&text)
                .await?
                .iter()
                .map(|c| c.with_answers(&answers))
                .collect();
            self.state.candidates = candidates;
            self.transition(
                WorkflowPhase::Disambiguating,
                Some(format!("{} candidate(s)", self.state.candidates.len())),
            )?;

            let resolution = resolve(
                &self.state.candidates,
                &self.mcp.policy.disambiguation,
                self.state.clarification_rounds,
            );
            let chosen = match resolution {
                Resolution::Resolved(intent) => intent,
                Resolution::Unresolved { reason, best } => {
                    return Err(McpError::IntentUnresolved {
                        reason,
                        best_guess: best.map(|c| c.intent),
                    }
                    .into());
                }
                Resolution::Clarify(request) => {
                    let reply = self.ask(request.clone()).await?;
                    match fold_answer(&request, &reply) {
                        Folded::Accepted => request.context,
                        Folded::Rejected => {
                            return Err(Halt::Cancelled("interpretation rejected".to_string()));
                        }
                        Folded::Values(values) => {
                            answers.extend(values);
                            self.transition(WorkflowPhase::Classifying, Some("answered".into()))?;
                            continue;
                        }
                        Folded::Rephrase(rephrased) => {
                            text = rephrased;
                            self.transition(WorkflowPhase::Classifying, Some("rephrased".into()))?;
                            continue;
                        }
                    }
                }
            };

            self.transition(WorkflowPhase::Validating, Some(chosen.qualified_name()))?;
            let descriptor = match self.mcp.registry.lookup(chosen.module()) {
                Ok(descriptor) => Some(descriptor),
                Err(RegistryError::NotFound(_)) => None,
                Err(err) => return Err(err.into()),
            };
            let report = validate(
                &chosen,
                descriptor.as_deref(),
                self.mcp.policy.validation_mode,
            );

            if report.is_valid() {
                debug!(
                    command_id = %self.state.command_id,
                    intent = %report.intent,
                    "Intent validated"
                );
                self.state.pending_step = Some(PendingStep::Intent {
                    intent: report.intent.clone(),
                });
                self.publish();
                return Ok(report.intent);
            }

            if !report.is_recoverable() {
                return Err(McpError::InvalidIntent {
                    intent: chosen,
                    reason: report.summary(),
                }
                .into());
            }

            // Field-level problems go back to the user, never out raw.
            self.transition(WorkflowPhase::Disambiguating, Some(report.summary()))?;
            if self.state.clarification_rounds >= self.mcp.policy.disambiguation.max_clarification_rounds {
                return Err(McpError::IntentUnresolved {
                    reason: report.summary(),
                    best_guess: Some(report.intent),
                }
                .into());
            }
            let fields = report.fields();
            let request = clarification_for(
                &report.intent,
                fields,
                Vec::new(),
                self.state.clarification_rounds + 1,
            );
            let reply = self.ask(request.clone()).await?;
            match fold_answer(&request, &reply) {
                Folded::Values(values) => answers.extend(values),
                Folded::Rephrase(rephrased) => text = rephrased,
                // only confirmation requests yield these
                Folded::Accepted | Folded::Rejected => {}
            }
            self.transition(WorkflowPhase::Classifying, Some("answered".into()))?;
        }
    }

    async fn classify(&mut self, text: &str) -> Step<Vec<IntentCandidate>> {
        let remaining = self.remaining_budget()?;
        let context = ClassifyContext {
            catalog: self.mcp.registry.catalog()?,
            cumulative: self.state.cumulative_context.clone(),
            session: self.state.session_context.clone(),
            clarifications: self.state.clarifications.clone(),
        };

        let started = Instant::now();
        let classifier = self.mcp.classifier.clone();
        let result: Step<Vec<IntentCandidate>> = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled("cancelled during classification".into())),
            result = tokio::time::timeout(remaining, classifier.classify(text, &context)) => match result {
                Ok(Ok(candidates)) => Ok(candidates),
                Ok(Err(err)) => Err(McpError::ClassifierUnavailable(err).into()),
                Err(_) => Err(McpError::CommandTimedOut(self.mcp.policy.command_timeout).into()),
            },
        };
        self.machine_time += started.elapsed();
        result
    }

    /// Suspend on the user. Each question consumes one round.
    async fn ask(&mut self, request: ClarificationRequest) -> Step<String> {
        self.state.clarification_rounds += 1;
        self.state.pending_step = Some(PendingStep::Clarification {
            request: request.clone(),
        });
        self.publish();
        debug!(
            command_id = %self.state.command_id,
            round = request.round,
            fields = ?request.fields,
            "Asking for clarification"
        );

        let frontend = self.mcp.frontend.clone();
        let answer = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(Halt::Cancelled("cancelled while awaiting clarification".into()));
            }
            answer = frontend.ask_user(&request.question, &request.options) => answer,
        };

        match answer {
            Ok(Answer::Text(text)) => {
                self.state.clarifications.push(ClarificationExchange {
                    question: request.question,
                    fields: request.fields,
                    answer: text.clone(),
                });
                self.publish();
                Ok(text)
            }
            Ok(Answer::Abandon) | Err(FrontendError::Closed) => {
                Err(Halt::Cancelled("clarification abandoned".into()))
            }
            Err(err) => Err(McpError::Frontend(err).into()),
        }
    }

    // ========================================================================
    // ConfirmPending
    // ========================================================================

    async fn confirm_if_destructive(&mut self, intent: &Intent) -> Step<()> {
        if !self
            .mcp
            .registry
            .is_destructive(intent.module(), intent.action())?
        {
            return self.transition(WorkflowPhase::Dispatching, None);
        }

        self.transition(WorkflowPhase::ConfirmPending, Some("destructive action".into()))?;
        let description = format!("{} is destructive. Proceed?", intent);
        self.state.pending_step = Some(PendingStep::Confirmation {
            intent: intent.clone(),
            description: description.clone(),
        });
        self.publish();

        let frontend = self.mcp.frontend.clone();
        let timeout = self.mcp.policy.confirmation_timeout;
        let confirmed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(Halt::Cancelled("cancelled while awaiting confirmation".into()));
            }
            answer = tokio::time::timeout(timeout, frontend.confirm_destructive(&description)) => answer,
        };

        match confirmed {
            Ok(Ok(true)) if self.cancel.is_cancelled() => {
                Err(Halt::Cancelled("cancelled while awaiting confirmation".into()))
            }
            Ok(Ok(true)) => {
                info!(
                    command_id = %self.state.command_id,
                    module = intent.module(),
                    action = intent.action(),
                    "Destructive action confirmed"
                );
                self.state.pending_step = Some(PendingStep::Intent {
                    intent: intent.clone(),
                });
                self.transition(WorkflowPhase::Dispatching, Some("confirmed".into()))
            }
            Ok(Ok(false)) => Err(Halt::Cancelled("destructive action declined".into())),
            Ok(Err(FrontendError::Closed)) => {
                Err(Halt::Cancelled("confirmation abandoned".into()))
            }
            Ok(Err(err)) => Err(McpError::Frontend(err).into()),
            Err(_) => Err(Halt::Cancelled(format!(
                "confirmation timed out after {:?}",
                timeout
            ))),
        }
    }

    // ========================================================================
    // Dispatching
    // ========================================================================

    async fn dispatch(&mut self, intent: Intent) -> Step<ExecutionResult> {
        let descriptor = self.mcp.registry.lookup(intent.module())?;
        let module = self.mcp.registry.module(intent.module())?;
        let destructive = descriptor.is_destructive(intent.action());
        let idempotent = descriptor.is_idempotent(intent.action());
        let policy_timeout = self.mcp.policy.dispatch_timeout;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let remaining = self.remaining_budget()?;
            let limit = policy_timeout.min(remaining);
            debug!(
                command_id = %self.state.command_id,
                module = intent.module(),
                action = intent.action(),
                attempt = attempts,
                timeout_ms = limit.as_millis() as u64,
                "Dispatching"
            );

            let started = Instant::now();
            // Set once the module call is first polled; a cancel observed
            // before that means nothing ran.
            let entered = AtomicBool::new(false);
            let call = async {
                entered.store(true, Ordering::SeqCst);
                tokio::time::timeout(limit, module.execute(intent.action(), intent.parameters())).await
            };
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = call => Some(result),
            };
            self.machine_time += started.elapsed();

            let failure = match outcome {
                None if destructive && entered.load(Ordering::SeqCst) => {
                    return Err(Halt::Uncertain {
                        intent,
                        reason: "cancelled while the action was running".into(),
                    });
                }
                None => return Err(Halt::Cancelled("cancelled during dispatch".into())),
                Some(Ok(Ok(result))) => {
                    self.transition(WorkflowPhase::StepComplete, Some(format!("attempts: {}", attempts)))?;
                    info!(
                        command_id = %self.state.command_id,
                        module = intent.module(),
                        action = intent.action(),
                        attempt = attempts,
                        "Step complete"
                    );
                    self.state.record_step(intent, result.clone(), attempts);
                    self.publish();
                    return Ok(result);
                }
                Some(Ok(Err(err))) => err,
                Some(Err(_)) if destructive => {
                    return Err(Halt::Uncertain {
                        intent,
                        reason: format!("timed out after {:?}", limit),
                    });
                }
                Some(Err(_)) if limit < policy_timeout => {
                    return Err(McpError::CommandTimedOut(self.mcp.policy.command_timeout).into());
                }
                Some(Err(_)) => ModuleError::Transient(format!("timed out after {:?}", limit)),
            };

            if failure.is_transient() && idempotent && attempts < MAX_DISPATCH_ATTEMPTS {
                warn!(
                    command_id = %self.state.command_id,
                    module = intent.module(),
                    action = intent.action(),
                    attempt = attempts,
                    error = %failure,
                    "Transient module failure; retrying"
                );
                continue;
            }

            error!(
                command_id = %self.state.command_id,
                module = intent.module(),
                action = intent.action(),
                attempt = attempts,
                error = %failure,
                "Module execution failed"
            );
            return Err(McpError::ModuleExecution {
                module: intent.module().to_string(),
                action: intent.action().to_string(),
                attempts,
                source: failure,
            }
            .into());
        }
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    fn remaining_budget(&self) -> Step<Duration> {
        let remaining = self
            .mcp
            .policy
            .command_timeout
            .saturating_sub(self.machine_time);
        if remaining.is_zero() {
            return Err(McpError::CommandTimedOut(self.mcp.policy.command_timeout).into());
        }
        Ok(remaining)
    }

    fn transition(&mut self, to: WorkflowPhase, reason: Option<String>) -> Step<()> {
        let transition = self.state.transition(to, reason)?;
        debug!(
            command_id = %self.state.command_id,
            from = %transition.from,
            to = %transition.to,
            reason = transition.reason.as_deref().unwrap_or(""),
            "Phase transition"
        );
        self.publish();
        Ok(())
    }

    /// Enter a terminal phase. A refused transition is logged, not raised:
    /// the outcome is already decided.
    fn finish(&mut self, to: WorkflowPhase, reason: &str) {
        if let Err(err) = self.state.transition(to, Some(reason.to_string())) {
            error!(command_id = %self.state.command_id, error = %err, "Could not record terminal phase");
        }
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(self.state.clone());
    }
}
