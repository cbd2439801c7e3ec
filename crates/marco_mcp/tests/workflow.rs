//! End-to-end tests for the command workflow
//!
//! These drive the full orchestrator: classifier adapter over a scripted
//! backend, the real disambiguation/validation path, a scripted front-end, and
//! a recording module next to the real `fs` module on a temp directory.

use async_trait::async_trait;
use marco_intent::{
    ActionSchema, CapabilityDescriptor, ExecutionResult, ParamKind, Parameters, PendingStep,
    WorkflowPhase,
};
use marco_mcp::{
    Answer, BackendError, CancellationToken, CapabilityRegistry, ClassifierAdapter,
    ClassifierBackend, CommandOutcome, Frontend, FrontendError, FsConfig, FsModule, Mcp,
    McpError, McpPolicy, Module, ModuleError, Prompt,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

// =============================================================================
// Test doubles
// =============================================================================

#[derive(Clone)]
enum Reply {
    Json(String),
    Transient,
    Hang,
}

fn intent(module: &str, action: &str, params: Value, confidence: f64) -> Reply {
    Reply::Json(
        json!({
            "module": module,
            "action": action,
            "parameters": params,
            "confidence": confidence,
        })
        .to_string(),
    )
}

fn intent_missing(module: &str, action: &str, missing: &[&str], confidence: f64) -> Reply {
    Reply::Json(
        json!({
            "module": module,
            "action": action,
            "parameters": {},
            "confidence": confidence,
            "missing": missing,
        })
        .to_string(),
    )
}

/// Replays replies in order, then repeats the last one.
#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
    started: Notify,
}

impl ScriptedBackend {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    fn next_reply(&self) -> Option<Reply> {
        let next = self.replies.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                Some(reply)
            }
            None => last.clone(),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassifierBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.user.clone());
        self.started.notify_one();
        match self.next_reply() {
            Some(Reply::Json(raw)) => Ok(raw),
            Some(Reply::Transient) => Err(BackendError::Transient("connection reset".into())),
            Some(Reply::Hang) | None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Answers from a queue (then abandons); confirms with a fixed reply or
/// never answers when `confirm` is `None`. A silent front-end never answers
/// questions either.
#[derive(Default)]
struct ScriptedFrontend {
    answers: Mutex<VecDeque<Answer>>,
    confirm: Option<bool>,
    silent: bool,
    /// Cancelled from inside `confirm_destructive`, before it replies.
    cancel_on_confirm: Mutex<Option<CancellationToken>>,
    questions: Mutex<Vec<(String, Vec<String>)>>,
    confirmations: Mutex<Vec<String>>,
    waiting: Notify,
}

impl ScriptedFrontend {
    fn new(answers: Vec<Answer>, confirm: Option<bool>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            confirm,
            ..Default::default()
        })
    }

    fn silent() -> Arc<Self> {
        Arc::new(Self {
            silent: true,
            ..Default::default()
        })
    }

    fn cancel_on_confirm(&self, token: CancellationToken) {
        *self.cancel_on_confirm.lock().unwrap() = Some(token);
    }

    fn questions(&self) -> Vec<(String, Vec<String>)> {
        self.questions.lock().unwrap().clone()
    }

    fn confirmations(&self) -> Vec<String> {
        self.confirmations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Frontend for ScriptedFrontend {
    async fn ask_user(&self, question: &str, options: &[String]) -> Result<Answer, FrontendError> {
        self.questions
            .lock()
            .unwrap()
            .push((question.to_string(), options.to_vec()));
        self.waiting.notify_one();
        if self.silent {
            std::future::pending::<()>().await;
        }
        let answer = self.answers.lock().unwrap().pop_front();
        Ok(answer.unwrap_or(Answer::Abandon))
    }

    async fn confirm_destructive(&self, description: &str) -> Result<bool, FrontendError> {
        self.confirmations
            .lock()
            .unwrap()
            .push(description.to_string());
        self.waiting.notify_one();
        if let Some(token) = self.cancel_on_confirm.lock().unwrap().take() {
            token.cancel();
        }
        match self.confirm {
            Some(confirmed) => Ok(confirmed),
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Transient,
    Hang,
}

/// Module `rec`: records every call and follows a behavior script.
#[derive(Default)]
struct RecordingModule {
    script: Mutex<VecDeque<Behavior>>,
    calls: Mutex<Vec<(String, Parameters)>>,
    started: Notify,
}

impl RecordingModule {
    fn new(script: Vec<Behavior>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    fn calls(&self) -> Vec<(String, Parameters)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Module for RecordingModule {
    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new("rec", "recording test module")
            .with_action(
                "read",
                ActionSchema::read_only("read something")
                    .optional("target", ParamKind::String, "what")
                    .optional("next", ParamKind::String, "follow-up text"),
            )
            .with_action(
                "write",
                ActionSchema::write("write something").optional("target", ParamKind::String, "what"),
            )
            .with_action("chain", ActionSchema::read_only("always asks for more"))
            .with_destructive_action(
                "wipe",
                ActionSchema::write("wipe something").required("target", ParamKind::String, "what"),
            )
    }

    async fn execute(
        &self,
        action: &str,
        parameters: &Parameters,
    ) -> Result<ExecutionResult, ModuleError> {
        self.calls
            .lock()
            .unwrap()
            .push((action.to_string(), parameters.clone()));
        self.started.notify_one();

        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Succeed);
        match behavior {
            Behavior::Succeed => {}
            Behavior::Transient => return Err(ModuleError::Transient("busy".into())),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }

        let target = parameters
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or("none")
            .to_string();
        let mut result = ExecutionResult::new(json!({ "action": action, "target": target }))
            .with_fact("seen", target);
        if let Some(next) = parameters.get("next").and_then(Value::as_str) {
            result = result.with_follow_up(next);
        }
        if action == "chain" {
            result = result.with_follow_up("again");
        }
        Ok(result)
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    mcp: Mcp,
    backend: Arc<ScriptedBackend>,
    frontend: Arc<ScriptedFrontend>,
    module: Arc<RecordingModule>,
    root: TempDir,
}

fn fast_policy() -> McpPolicy {
    McpPolicy {
        classifier_timeout: Duration::from_millis(100),
        dispatch_timeout: Duration::from_millis(300),
        command_timeout: Duration::from_secs(5),
        confirmation_timeout: Duration::from_millis(200),
        ..McpPolicy::default()
    }
}

fn harness(replies: Vec<Reply>, answers: Vec<Answer>, confirm: Option<bool>) -> Harness {
    harness_with(replies, answers, confirm, Vec::new(), fast_policy())
}

fn harness_with(
    replies: Vec<Reply>,
    answers: Vec<Answer>,
    confirm: Option<bool>,
    script: Vec<Behavior>,
    policy: McpPolicy,
) -> Harness {
    build(replies, ScriptedFrontend::new(answers, confirm), script, policy)
}

fn build(
    replies: Vec<Reply>,
    frontend: Arc<ScriptedFrontend>,
    script: Vec<Behavior>,
    policy: McpPolicy,
) -> Harness {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("src")).unwrap();
    fs::write(root.path().join("src/main.rs"), "fn main() {}\n").unwrap();
    fs::write(root.path().join("notes.txt"), "remember the milk\n").unwrap();

    let module = RecordingModule::new(script);
    let registry = Arc::new(CapabilityRegistry::new());
    registry
        .register(Arc::new(
            FsModule::new(FsConfig {
                root: root.path().to_path_buf(),
                ..FsConfig::default()
            })
            .unwrap(),
        ))
        .unwrap();
    registry.register(module.clone()).unwrap();
    registry.seal();

    let backend = ScriptedBackend::new(replies);
    let classifier = Arc::new(ClassifierAdapter::new(
        backend.clone(),
        policy.classifier_timeout,
    ));
    let mcp = Mcp::new(registry, classifier, frontend.clone(), policy);

    Harness {
        mcp,
        backend,
        frontend,
        module,
        root,
    }
}

async fn run(h: &Harness, text: &str) -> CommandOutcome {
    h.mcp
        .submit_command(text, BTreeMap::new())
        .unwrap()
        .wait()
        .await
}

// =============================================================================
// Direct resolution
// =============================================================================

#[tokio::test]
async fn test_list_files_in_src_dispatches_directly() {
    let h = harness(
        vec![intent("fs", "list_dir", json!({"path": "src"}), 0.95)],
        vec![],
        Some(false),
    );

    let report = match run(&h, "list files in src").await {
        CommandOutcome::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other),
    };

    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].intent.qualified_name(), "fs.list_dir");
    assert_eq!(report.steps[0].intent.parameter("path"), Some(&json!("src")));
    assert_eq!(report.final_output()[0]["name"], "main.rs");
    assert_eq!(report.context.get("last_dir"), Some(&json!("src")));
    // confident and complete: never asks
    assert!(h.frontend.questions().is_empty());
    assert!(h.frontend.confirmations().is_empty());
}

#[tokio::test]
async fn test_status_history_follows_state_machine() {
    let h = harness(
        vec![intent("rec", "read", json!({"target": "a"}), 0.9)],
        vec![],
        Some(false),
    );
    let handle = h.mcp.submit_command("read a", BTreeMap::new()).unwrap();
    let mut watcher = handle.watch();
    let id = handle.id();

    let outcome = handle.wait().await;
    assert!(outcome.is_completed());

    let snapshot = watcher.borrow_and_update().clone();
    assert_eq!(snapshot.command_id, id);
    assert_eq!(snapshot.phase(), WorkflowPhase::Done);
    let phases: Vec<WorkflowPhase> = snapshot.history().iter().map(|t| t.to).collect();
    assert_eq!(
        phases,
        vec![
            WorkflowPhase::Disambiguating,
            WorkflowPhase::Validating,
            WorkflowPhase::Dispatching,
            WorkflowPhase::StepComplete,
            WorkflowPhase::Done,
        ]
    );
}

#[tokio::test]
async fn test_submit_before_seal_fails() {
    let registry = Arc::new(CapabilityRegistry::new());
    let backend = ScriptedBackend::new(vec![]);
    let mcp = Mcp::new(
        registry,
        Arc::new(ClassifierAdapter::new(backend, Duration::from_millis(50))),
        ScriptedFrontend::new(vec![], Some(false)),
        fast_policy(),
    );
    assert!(matches!(
        mcp.submit_command("ls", BTreeMap::new()),
        Err(McpError::NotSealed)
    ));
}

// =============================================================================
// Clarification
// =============================================================================

#[tokio::test]
async fn test_delete_it_without_context_asks_for_target() {
    let h = harness(
        vec![intent_missing("fs", "delete_file", &["path"], 0.7)],
        vec![Answer::Abandon],
        Some(true),
    );
    let handle = h.mcp.submit_command("delete it", BTreeMap::new()).unwrap();
    let mut watcher = handle.watch();
    let outcome = handle.wait().await;

    let questions = h.frontend.questions();
    assert_eq!(questions.len(), 1);
    assert!(questions[0].0.contains("path"), "question: {}", questions[0].0);

    // abandoning the question cancels, in the phase that asked
    match outcome {
        CommandOutcome::Cancelled { phase, .. } => {
            assert_eq!(phase, WorkflowPhase::Disambiguating)
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    let snapshot = watcher.borrow_and_update().clone();
    assert!(matches!(
        snapshot.pending_step,
        Some(PendingStep::Clarification { ref request }) if request.fields == vec!["path".to_string()]
    ));
    assert!(h.root.path().join("notes.txt").exists());
}

#[tokio::test]
async fn test_answered_clarification_then_confirmed_delete() {
    let h = harness(
        vec![
            intent_missing("fs", "delete_file", &["path"], 0.7),
            intent_missing("fs", "delete_file", &["path"], 0.9),
        ],
        vec![Answer::text("notes.txt")],
        Some(true),
    );

    let outcome = run(&h, "delete it").await;
    assert!(outcome.is_completed(), "got {:?}", outcome);
    assert!(!h.root.path().join("notes.txt").exists());
    assert_eq!(h.frontend.confirmations().len(), 1);
    assert!(h.frontend.confirmations()[0].contains("notes.txt"));
    // the answer is visible to the classifier on the second call
    let prompts = h.backend.prompts.lock().unwrap().clone();
    assert!(prompts[1].contains("A: notes.txt"));
}

#[tokio::test]
async fn test_recoverable_validation_error_never_reaches_module() {
    // the classifier claims completeness but omits a required parameter
    let h = harness(
        vec![intent("rec", "wipe", json!({}), 0.95)],
        vec![Answer::Abandon],
        Some(true),
    );

    let outcome = run(&h, "wipe").await;
    assert!(outcome.is_cancelled(), "got {:?}", outcome);
    assert!(h.module.calls().is_empty());
    let questions = h.frontend.questions();
    assert_eq!(questions.len(), 1);
    assert!(questions[0].0.contains("target"));
}

#[tokio::test]
async fn test_validation_clarification_fills_parameter() {
    let h = harness(
        vec![intent("rec", "wipe", json!({}), 0.95)],
        vec![Answer::text("box")],
        Some(true),
    );

    let outcome = run(&h, "wipe").await;
    assert!(outcome.is_completed(), "got {:?}", outcome);
    let calls = h.module.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "wipe");
    assert_eq!(calls[0].1.get("target"), Some(&json!("box")));
}

#[tokio::test]
async fn test_middle_confidence_asks_to_confirm_interpretation() {
    let h = harness(
        vec![intent("rec", "read", json!({"target": "a"}), 0.6)],
        vec![Answer::text("yes")],
        Some(false),
    );

    let outcome = run(&h, "maybe read a").await;
    assert!(outcome.is_completed(), "got {:?}", outcome);
    let questions = h.frontend.questions();
    assert_eq!(questions.len(), 1);
    assert!(questions[0].0.starts_with("Did you mean rec.read"));
    assert_eq!(questions[0].1, vec!["yes", "no"]);
    assert_eq!(h.module.calls().len(), 1);
}

#[tokio::test]
async fn test_clarification_budget_exhausted_is_unresolved() {
    let h = harness(
        vec![intent_missing("fs", "find_pattern", &["pattern", "path"], 0.7)],
        vec![
            Answer::text("not sure"),
            Answer::text("whatever"),
            Answer::text("you pick"),
            Answer::text("never asked"),
        ],
        Some(false),
    );

    let outcome = run(&h, "search").await;
    assert!(
        matches!(outcome.error(), Some(McpError::IntentUnresolved { best_guess: Some(_), .. })),
        "got {:?}",
        outcome
    );
    assert_eq!(h.frontend.questions().len(), 3);
}

#[tokio::test]
async fn test_low_confidence_is_unresolved_without_asking() {
    let h = harness(
        vec![intent("rec", "read", json!({}), 0.2)],
        vec![],
        Some(false),
    );
    let outcome = run(&h, "hmm").await;
    assert!(matches!(
        outcome.error(),
        Some(McpError::IntentUnresolved { .. })
    ));
    assert!(h.frontend.questions().is_empty());
    assert!(h.module.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_module_is_invalid_intent() {
    let h = harness(
        vec![intent("canvas", "list_courses", json!({}), 0.95)],
        vec![],
        Some(false),
    );
    let outcome = run(&h, "show my courses").await;
    assert!(matches!(outcome.error(), Some(McpError::InvalidIntent { .. })));
    assert!(h.frontend.questions().is_empty());
}

// =============================================================================
// Classifier failures
// =============================================================================

#[tokio::test]
async fn test_classifier_timing_out_twice_is_unavailable_after_one_retry() {
    let h = harness(vec![Reply::Hang], vec![], Some(false));
    let outcome = run(&h, "list files").await;
    match outcome.error() {
        Some(McpError::ClassifierUnavailable(err)) => assert_eq!(err.attempts(), 2),
        other => panic!("expected classifier unavailable, got {:?}", other),
    }
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn test_classifier_transient_failure_recovers() {
    let h = harness(
        vec![
            Reply::Transient,
            intent("rec", "read", json!({"target": "a"}), 0.9),
        ],
        vec![],
        Some(false),
    );
    assert!(run(&h, "read a").await.is_completed());
    assert_eq!(h.backend.calls(), 2);
}

// =============================================================================
// Confirmation
// =============================================================================

#[tokio::test]
async fn test_declined_delete_is_cancelled_without_mutation() {
    let h = harness(
        vec![intent("fs", "delete_file", json!({"path": "notes.txt"}), 0.95)],
        vec![],
        Some(false),
    );
    let outcome = run(&h, "delete notes.txt").await;
    match outcome {
        CommandOutcome::Cancelled { phase, .. } => {
            assert_eq!(phase, WorkflowPhase::ConfirmPending)
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert!(h.root.path().join("notes.txt").exists());
}

#[tokio::test]
async fn test_unanswered_confirmation_times_out_to_cancelled() {
    let h = harness(
        vec![intent("rec", "wipe", json!({"target": "disk"}), 0.95)],
        vec![],
        None,
    );
    let outcome = run(&h, "wipe disk").await;
    assert!(outcome.is_cancelled(), "got {:?}", outcome);
    assert!(h.module.calls().is_empty());
}

// =============================================================================
// Dispatch policy
// =============================================================================

#[tokio::test]
async fn test_idempotent_action_retried_once() {
    let h = harness_with(
        vec![intent("rec", "read", json!({"target": "a"}), 0.9)],
        vec![],
        Some(false),
        vec![Behavior::Transient],
        fast_policy(),
    );
    let CommandOutcome::Completed(report) = run(&h, "read a").await else {
        panic!("expected completion");
    };
    assert_eq!(report.steps[0].attempts, 2);
    assert_eq!(h.module.calls().len(), 2);
}

#[tokio::test]
async fn test_idempotent_action_fails_after_second_transient() {
    let h = harness_with(
        vec![intent("rec", "read", json!({"target": "a"}), 0.9)],
        vec![],
        Some(false),
        vec![Behavior::Transient, Behavior::Transient],
        fast_policy(),
    );
    let outcome = run(&h, "read a").await;
    assert!(matches!(
        outcome.error(),
        Some(McpError::ModuleExecution { attempts: 2, .. })
    ));
}

#[tokio::test]
async fn test_write_action_never_retried() {
    let h = harness_with(
        vec![intent("rec", "write", json!({"target": "a"}), 0.9)],
        vec![],
        Some(false),
        vec![Behavior::Transient],
        fast_policy(),
    );
    let outcome = run(&h, "write a").await;
    assert!(matches!(
        outcome.error(),
        Some(McpError::ModuleExecution { attempts: 1, .. })
    ));
    assert_eq!(h.module.calls().len(), 1);
}

#[tokio::test]
async fn test_destructive_dispatch_timeout_is_uncertain() {
    let h = harness_with(
        vec![intent("rec", "wipe", json!({"target": "disk"}), 0.95)],
        vec![],
        Some(true),
        vec![Behavior::Hang],
        fast_policy(),
    );
    let outcome = run(&h, "wipe disk").await;
    assert!(outcome.is_uncertain(), "got {:?}", outcome);
    assert_eq!(h.module.calls().len(), 1);
}

#[tokio::test]
async fn test_command_budget_bounds_dispatch() {
    let policy = McpPolicy {
        dispatch_timeout: Duration::from_millis(250),
        command_timeout: Duration::from_millis(300),
        ..fast_policy()
    };
    let h = harness_with(
        vec![intent("rec", "read", json!({"target": "a"}), 0.9)],
        vec![],
        Some(false),
        vec![Behavior::Hang, Behavior::Hang],
        policy,
    );
    let outcome = run(&h, "read a").await;
    assert!(
        matches!(outcome.error(), Some(McpError::CommandTimedOut(_))),
        "got {:?}",
        outcome
    );
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_non_destructive_dispatch_is_cancelled() {
    let h = harness_with(
        vec![intent("rec", "read", json!({"target": "a"}), 0.9)],
        vec![],
        Some(false),
        vec![Behavior::Hang],
        McpPolicy {
            dispatch_timeout: Duration::from_secs(2),
            ..fast_policy()
        },
    );
    let handle = h.mcp.submit_command("read a", BTreeMap::new()).unwrap();
    h.module.started.notified().await;
    handle.cancel();

    match handle.wait().await {
        CommandOutcome::Cancelled { phase, .. } => assert_eq!(phase, WorkflowPhase::Dispatching),
        other => panic!("expected cancellation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_destructive_dispatch_is_uncertain() {
    let h = harness_with(
        vec![intent("rec", "wipe", json!({"target": "disk"}), 0.95)],
        vec![],
        Some(true),
        vec![Behavior::Hang],
        McpPolicy {
            dispatch_timeout: Duration::from_secs(2),
            ..fast_policy()
        },
    );
    let handle = h.mcp.submit_command("wipe disk", BTreeMap::new()).unwrap();
    h.module.started.notified().await;
    handle.cancel();

    let outcome = handle.wait().await;
    match &outcome {
        CommandOutcome::Uncertain { intent, .. } => assert_eq!(intent.action(), "wipe"),
        other => panic!("expected uncertain, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_while_classifying() {
    let h = harness_with(
        vec![Reply::Hang],
        vec![],
        Some(false),
        vec![],
        McpPolicy {
            classifier_timeout: Duration::from_secs(2),
            ..fast_policy()
        },
    );
    let handle = h.mcp.submit_command("list files", BTreeMap::new()).unwrap();
    h.backend.started.notified().await;
    handle.cancel();

    match handle.wait().await {
        CommandOutcome::Cancelled { phase, .. } => assert_eq!(phase, WorkflowPhase::Classifying),
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test]
async fn test_cancel_while_awaiting_clarification() {
    let h = build(
        vec![intent_missing("fs", "delete_file", &["path"], 0.7)],
        ScriptedFrontend::silent(),
        vec![],
        fast_policy(),
    );
    let handle = h.mcp.submit_command("delete it", BTreeMap::new()).unwrap();
    h.frontend.waiting.notified().await;
    handle.cancel();

    match handle.wait().await {
        CommandOutcome::Cancelled { phase, .. } => {
            assert_eq!(phase, WorkflowPhase::Disambiguating)
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(h.frontend.questions().len(), 1);
    assert!(h.root.path().join("notes.txt").exists());
}

#[tokio::test]
async fn test_cancel_while_awaiting_confirmation() {
    let h = harness_with(
        vec![intent("rec", "wipe", json!({"target": "disk"}), 0.95)],
        vec![],
        None,
        vec![],
        McpPolicy {
            confirmation_timeout: Duration::from_secs(2),
            ..fast_policy()
        },
    );
    let handle = h.mcp.submit_command("wipe disk", BTreeMap::new()).unwrap();
    h.frontend.waiting.notified().await;
    handle.cancel();

    match handle.wait().await {
        CommandOutcome::Cancelled { phase, .. } => {
            assert_eq!(phase, WorkflowPhase::ConfirmPending)
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert!(h.module.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_before_destructive_call_starts_is_cancelled() {
    // the user confirms, but the command was cancelled meanwhile
    let h = harness(
        vec![intent("rec", "wipe", json!({"target": "disk"}), 0.95)],
        vec![],
        Some(true),
    );
    let cancel = CancellationToken::new();
    h.frontend.cancel_on_confirm(cancel.clone());

    let outcome = h
        .mcp
        .run_command("wipe disk", BTreeMap::new(), cancel)
        .await;
    match outcome {
        CommandOutcome::Cancelled { phase, .. } => {
            assert_eq!(phase, WorkflowPhase::ConfirmPending)
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert!(h.module.calls().is_empty());
}

// =============================================================================
// Multi-step
// =============================================================================

#[tokio::test]
async fn test_follow_up_runs_next_step_with_context() {
    let h = harness(
        vec![
            intent("rec", "read", json!({"target": "first", "next": "read the second"}), 0.9),
            intent("rec", "read", json!({"target": "second"}), 0.9),
        ],
        vec![],
        Some(false),
    );

    let CommandOutcome::Completed(report) = run(&h, "read first then second").await else {
        panic!("expected completion");
    };
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.context.get("seen"), Some(&json!("second")));

    let prompts = h.backend.prompts.lock().unwrap().clone();
    assert!(prompts[1].contains("- seen: \"first\""));
    assert!(prompts[1].contains("read the second"));
}

#[tokio::test]
async fn test_step_limit_exceeded() {
    let h = harness_with(
        vec![intent("rec", "chain", json!({}), 0.9)],
        vec![],
        Some(false),
        vec![],
        McpPolicy {
            max_steps: 3,
            ..fast_policy()
        },
    );
    let outcome = run(&h, "chain forever").await;
    assert!(matches!(
        outcome.error(),
        Some(McpError::StepLimitExceeded(3))
    ));
    assert_eq!(h.module.calls().len(), 3);
}
