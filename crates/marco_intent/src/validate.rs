//! Schema validation and normalization of intents.
//!
//! Validation is side-effect free: it returns the normalized intent together
//! with field-level errors so clarification can target specific fields.

use crate::capability::{value_kind_name, CapabilityDescriptor, ParamKind};
use crate::intent::{Intent, Parameters, ACTION_FIELD, MODULE_FIELD};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How parameters not declared in the schema are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Unknown parameters are errors.
    Strict,
    /// Unknown parameters are dropped.
    #[default]
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldErrorKind {
    UnknownModule,
    UnknownAction,
    MissingParameter,
    TypeMismatch { expected: ParamKind, found: String },
    UnknownParameter,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    #[serde(flatten)]
    pub kind: FieldErrorKind,
}

impl FieldError {
    fn new(field: impl Into<String>, kind: FieldErrorKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }

    /// Missing or malformed parameters can be fixed by asking the user.
    pub fn recoverable(&self) -> bool {
        matches!(
            self.kind,
            FieldErrorKind::MissingParameter | FieldErrorKind::TypeMismatch { .. }
        )
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FieldErrorKind::UnknownModule => write!(f, "unknown module '{}'", self.field),
            FieldErrorKind::UnknownAction => write!(f, "unknown action '{}'", self.field),
            FieldErrorKind::MissingParameter => {
                write!(f, "missing required parameter '{}'", self.field)
            }
            FieldErrorKind::TypeMismatch { expected, found } => write!(
                f,
                "parameter '{}' should be {}, got {}",
                self.field, expected, found
            ),
            FieldErrorKind::UnknownParameter => write!(f, "unknown parameter '{}'", self.field),
        }
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// The intent after coercion (and, in lenient mode, after dropping
    /// unknown parameters).
    pub intent: Intent,
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// True when there are errors and all of them can be fixed by clarification.
    pub fn is_recoverable(&self) -> bool {
        !self.errors.is_empty() && self.errors.iter().all(FieldError::recoverable)
    }

    /// The structurally invalid part: unknown module/action/parameter.
    pub fn structural_errors(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter().filter(|e| !e.recoverable())
    }

    pub fn fields(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.field.clone()).collect()
    }

    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validate `intent` against the descriptor of its module.
///
/// `descriptor` is `None` when the registry has no such module.
pub fn validate(
    intent: &Intent,
    descriptor: Option<&CapabilityDescriptor>,
    mode: ValidationMode,
) -> ValidationReport {
    let reject = |field: &str, kind| ValidationReport {
        intent: intent.clone(),
        errors: vec![FieldError::new(field, kind)],
    };

    let descriptor = match descriptor {
        Some(d) if d.name == intent.module() && !intent.module().is_empty() => d,
        _ => {
            let field = if intent.module().is_empty() {
                MODULE_FIELD
            } else {
                intent.module()
            };
            return reject(field, FieldErrorKind::UnknownModule);
        }
    };

    let Some(schema) = descriptor.action(intent.action()) else {
        let field = if intent.action().is_empty() {
            ACTION_FIELD
        } else {
            intent.action()
        };
        return reject(field, FieldErrorKind::UnknownAction);
    };

    let mut errors = Vec::new();
    let mut normalized = Parameters::new();

    for (name, spec) in &schema.params {
        match intent.parameter(name) {
            None if spec.required => {
                errors.push(FieldError::new(name, FieldErrorKind::MissingParameter));
            }
            None => {}
            Some(value) => match spec.kind.coerce(value) {
                Some(coerced) => {
                    normalized.insert(name.clone(), coerced);
                }
                None => errors.push(FieldError::new(
                    name,
                    FieldErrorKind::TypeMismatch {
                        expected: spec.kind,
                        found: value_kind_name(value).to_string(),
                    },
                )),
            },
        }
    }

    // Lenient mode drops them by never copying them into `normalized`.
    if mode == ValidationMode::Strict {
        for name in intent.parameters().keys() {
            if !schema.params.contains_key(name) {
                errors.push(FieldError::new(name, FieldErrorKind::UnknownParameter));
            }
        }
    }

    ValidationReport {
        intent: intent.clone().with_parameters(normalized),
        errors,
    }
}
