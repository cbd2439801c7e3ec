//! Intent Classifier Adapter
//!
//! Wraps an external NL backend behind [`Classifier`]. The adapter owns the
//! timeout and the single retry; the backend only turns a prompt into text.

mod parse;
mod prompt;

pub use parse::parse_candidates;
pub use prompt::{build_prompt, Prompt, SYSTEM_PROMPT};

use async_trait::async_trait;
use marco_intent::{CapabilityDescriptor, ClarificationExchange, IntentCandidate};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Everything the classifier may use besides the text itself.
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    pub catalog: Vec<Arc<CapabilityDescriptor>>,
    /// Facts from earlier steps of the command.
    pub cumulative: BTreeMap<String, Value>,
    pub session: BTreeMap<String, Value>,
    /// Questions and answers of the current step.
    pub clarifications: Vec<ClarificationExchange>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("{reason} (after {attempts} attempt(s))")]
    Unavailable { attempts: u32, reason: String },
}

impl ClassifierError {
    pub fn attempts(&self) -> u32 {
        match self {
            ClassifierError::Unavailable { attempts, .. } => *attempts,
        }
    }
}

/// Failure reported by a backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Network error, 5xx, rate limit: retry-eligible.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Authentication, malformed request: retrying cannot help.
    #[error("backend error: {0}")]
    Fatal(String),
}

/// Converts text plus context into ranked candidates.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        text: &str,
        context: &ClassifyContext,
    ) -> Result<Vec<IntentCandidate>, ClassifierError>;
}

/// Text-completion backend (LLM, rules engine, test script).
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt) -> Result<String, BackendError>;
}

/// [`Classifier`] over a [`ClassifierBackend`] with timeout and one retry.
pub struct ClassifierAdapter {
    backend: Arc<dyn ClassifierBackend>,
    timeout: Duration,
}

impl ClassifierAdapter {
    const MAX_ATTEMPTS: u32 = 2;

    pub fn new(backend: Arc<dyn ClassifierBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    async fn attempt(&self, prompt: &Prompt) -> Result<String, BackendError> {
        match tokio::time::timeout(self.timeout, self.backend.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Transient(format!(
                "timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl Classifier for ClassifierAdapter {
    async fn classify(
        &self,
        text: &str,
        context: &ClassifyContext,
    ) -> Result<Vec<IntentCandidate>, ClassifierError> {
        let prompt = build_prompt(text, context);

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(&prompt).await {
                Ok(raw) => {
                    let candidates = parse_candidates(&raw, text);
                    debug!(
                        backend = self.backend.name(),
                        attempt = attempts,
                        candidates = candidates.len(),
                        "Classified input"
                    );
                    return Ok(candidates);
                }
                Err(BackendError::Transient(reason)) if attempts < Self::MAX_ATTEMPTS => {
                    warn!(
                        backend = self.backend.name(),
                        attempt = attempts,
                        %reason,
                        "Classifier attempt failed; retrying"
                    );
                }
                Err(err) => {
                    warn!(
                        backend = self.backend.name(),
                        attempt = attempts,
                        error = %err,
                        "Classifier unavailable"
                    );
                    return Err(ClassifierError::Unavailable {
                        attempts,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}
