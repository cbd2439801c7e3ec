//! Cross-cutting policy: thresholds, round budget, timeouts, step limit.

use marco_intent::ValidationMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.8;
pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MAX_CLARIFICATION_ROUNDS: u32 = 3;
pub const DEFAULT_MAX_STEPS: usize = 8;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolicyError {
    #[error("thresholds must satisfy 0 <= completion ({completion}) <= acceptance ({acceptance}) <= 1")]
    Thresholds { completion: f64, acceptance: f64 },

    #[error("dispatch timeout ({dispatch:?}) must be shorter than the command timeout ({command:?})")]
    DispatchTimeout { dispatch: Duration, command: Duration },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Inputs to the disambiguation engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisambiguationPolicy {
    /// Minimum confidence to resolve without asking.
    pub acceptance_threshold: f64,
    /// Minimum confidence to ask a follow-up instead of giving up.
    pub completion_threshold: f64,
    pub max_clarification_rounds: u32,
}

impl Default for DisambiguationPolicy {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            max_clarification_rounds: DEFAULT_MAX_CLARIFICATION_ROUNDS,
        }
    }
}

/// Orchestrator policy.
#[derive(Debug, Clone, PartialEq)]
pub struct McpPolicy {
    pub disambiguation: DisambiguationPolicy,
    /// Per classifier attempt.
    pub classifier_timeout: Duration,
    /// Per module call; clamped to what is left of `command_timeout`.
    pub dispatch_timeout: Duration,
    /// Machine time budget for a whole command (user think time excluded).
    pub command_timeout: Duration,
    /// How long a destructive-action confirmation may stay unanswered.
    pub confirmation_timeout: Duration,
    pub max_steps: usize,
    pub validation_mode: ValidationMode,
}

impl Default for McpPolicy {
    fn default() -> Self {
        Self {
            disambiguation: DisambiguationPolicy::default(),
            classifier_timeout: Duration::from_secs(20),
            dispatch_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(120),
            confirmation_timeout: Duration::from_secs(60),
            max_steps: DEFAULT_MAX_STEPS,
            validation_mode: ValidationMode::Lenient,
        }
    }
}

impl McpPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        let d = &self.disambiguation;
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(d.completion_threshold)
            || !in_range(d.acceptance_threshold)
            || d.completion_threshold > d.acceptance_threshold
        {
            return Err(PolicyError::Thresholds {
                completion: d.completion_threshold,
                acceptance: d.acceptance_threshold,
            });
        }
        if self.classifier_timeout.is_zero() {
            return Err(PolicyError::Zero("classifier timeout"));
        }
        if self.dispatch_timeout.is_zero() {
            return Err(PolicyError::Zero("dispatch timeout"));
        }
        if self.confirmation_timeout.is_zero() {
            return Err(PolicyError::Zero("confirmation timeout"));
        }
        if self.max_steps == 0 {
            return Err(PolicyError::Zero("max steps"));
        }
        if self.dispatch_timeout >= self.command_timeout {
            return Err(PolicyError::DispatchTimeout {
                dispatch: self.dispatch_timeout,
                command: self.command_timeout,
            });
        }
        Ok(())
    }
}
