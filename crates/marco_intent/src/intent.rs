//! Intents, classifier candidates and clarification requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Parameter map carried by an intent.
pub type Parameters = BTreeMap<String, Value>;

/// Pseudo-field name used when the target module itself is unknown.
pub const MODULE_FIELD: &str = "module";
/// Pseudo-field name used when the action itself is unknown.
pub const ACTION_FIELD: &str = "action";

// ============================================================================
// Intent
// ============================================================================

/// The canonical unit of dispatch: `(module, action, parameters)` plus the
/// user text it was derived from.
///
/// Fields are read-only. Folding in new information builds a new `Intent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    module: String,
    action: String,
    #[serde(default)]
    parameters: Parameters,
    #[serde(default)]
    raw_input: String,
}

impl Intent {
    pub fn new(module: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            parameters: Parameters::new(),
            raw_input: String::new(),
        }
    }

    /// An intent with no module or action yet.
    pub fn unaddressed(raw_input: impl Into<String>) -> Self {
        Self::new("", "").with_raw_input(raw_input)
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_raw_input(mut self, raw_input: impl Into<String>) -> Self {
        self.raw_input = raw_input.into();
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name).filter(|v| !v.is_null())
    }

    pub fn raw_input(&self) -> &str {
        &self.raw_input
    }

    /// `module.action`, used in logs and clarification options.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.action)
    }

    /// Whether both module and action are filled in.
    pub fn is_addressed(&self) -> bool {
        !self.module.trim().is_empty() && !self.action.trim().is_empty()
    }

    /// New intent with `overrides` applied on top of the current parameters.
    ///
    /// The pseudo-fields `module` and `action` re-target the intent when they
    /// hold strings (`action` may also be given as `module.action`).
    pub fn overlay(&self, overrides: &Parameters) -> Intent {
        let mut next = self.clone();
        for (name, value) in overrides {
            match (name.as_str(), value) {
                (MODULE_FIELD, Value::String(module)) => next.module = module.clone(),
                (ACTION_FIELD, Value::String(action)) => match action.split_once('.') {
                    Some((module, action)) if !module.is_empty() => {
                        next.module = module.to_string();
                        next.action = action.to_string();
                    }
                    _ => next.action = action.clone(),
                },
                _ => {
                    next.parameters.insert(name.clone(), value.clone());
                }
            }
        }
        next
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.qualified_name())?;
        for (i, (name, value)) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                Value::String(s) => write!(f, "{}={}", name, s)?,
                other => write!(f, "{}={}", name, other)?,
            }
        }
        write!(f, ")")
    }
}

// ============================================================================
// Intent Candidate
// ============================================================================

/// Classifier output before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCandidate {
    pub intent: Intent,
    /// Normalized score in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub missing_fields: BTreeSet<String>,
    #[serde(default)]
    pub ambiguous_fields: BTreeSet<String>,
}

impl IntentCandidate {
    pub fn new(intent: Intent, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            intent,
            confidence,
            missing_fields: BTreeSet::new(),
            ambiguous_fields: BTreeSet::new(),
        }
    }

    /// Stand-in for backend output that could not be parsed: zero confidence,
    /// every field ambiguous.
    pub fn unparseable(raw_input: impl Into<String>) -> Self {
        Self::new(Intent::unaddressed(raw_input), 0.0)
            .with_ambiguous([MODULE_FIELD, ACTION_FIELD])
    }

    pub fn with_missing<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.missing_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_ambiguous<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ambiguous_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Fields needing clarification (missing first, then ambiguous), deduplicated.
    pub fn unresolved_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.missing_fields.iter().cloned().collect();
        for field in &self.ambiguous_fields {
            if !self.missing_fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields.is_empty() && self.ambiguous_fields.is_empty()
    }

    /// New candidate with user-supplied values applied; answered fields are no
    /// longer missing or ambiguous.
    pub fn with_answers(&self, answers: &Parameters) -> IntentCandidate {
        let mut next = self.clone();
        next.intent = self.intent.overlay(answers);
        for field in answers.keys() {
            next.missing_fields.remove(field);
            next.ambiguous_fields.remove(field);
        }
        next
    }
}

// ============================================================================
// Clarification
// ============================================================================

/// A question for the user, produced when no candidate is dispatch-eligible
/// with sufficient confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    /// The partial intent being completed.
    pub context: Intent,
    /// Exactly the fields being asked about. Empty means the user is asked to
    /// confirm `context` as a whole.
    #[serde(default)]
    pub fields: Vec<String>,
    /// 1-based clarification round within the current step.
    pub round: u32,
}

impl ClarificationRequest {
    pub fn is_confirmation(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A question asked and the answer received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationExchange {
    pub question: String,
    #[serde(default)]
    pub fields: Vec<String>,
    pub answer: String,
}
