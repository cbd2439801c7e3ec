//! Capability descriptors: what a module can do and with which parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Declared type of an action parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Map,
    Any,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::Map => "map",
            ParamKind::Any => "any",
        }
    }

    /// Whether `value` conforms as-is.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Map => value.is_object(),
            ParamKind::Any => true,
        }
    }

    /// Convert `value` into this kind when a lossless conversion exists
    /// (e.g. `"42"` for an integer, `7` for a string).
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        if self.matches(value) {
            return Some(value.clone());
        }
        match (self, value) {
            (ParamKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ParamKind::Integer, Value::String(s)) => {
                s.trim().parse::<i64>().ok().map(Value::from)
            }
            (ParamKind::Integer, Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| Value::from(f as i64)),
            (ParamKind::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (ParamKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(Value::Bool(true)),
                "false" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short name for the JSON type of `value`, for error messages.
pub fn value_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

/// One parameter of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// Parameter schema and retry properties of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSchema {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
    /// Read-only actions may be retried once on transient failure.
    #[serde(default)]
    pub idempotent: bool,
}

impl ActionSchema {
    /// An idempotent, read-only action.
    pub fn read_only(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            params: BTreeMap::new(),
            idempotent: true,
        }
    }

    /// An action with side effects; never retried automatically.
    pub fn write(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            params: BTreeMap::new(),
            idempotent: false,
        }
    }

    pub fn required(
        mut self,
        name: impl Into<String>,
        kind: ParamKind,
        description: impl Into<String>,
    ) -> Self {
        self.params.insert(
            name.into(),
            ParamSpec {
                kind,
                required: true,
                description: description.into(),
            },
        );
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        kind: ParamKind,
        description: impl Into<String>,
    ) -> Self {
        self.params.insert(
            name.into(),
            ParamSpec {
                kind,
                required: false,
                description: description.into(),
            },
        );
        self
    }

    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
    }
}

/// Registry entry for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub actions: BTreeMap<String, ActionSchema>,
    /// Actions requiring explicit user confirmation before dispatch.
    #[serde(default)]
    pub destructive_actions: BTreeSet<String>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            actions: BTreeMap::new(),
            destructive_actions: BTreeSet::new(),
        }
    }

    pub fn with_action(mut self, name: impl Into<String>, schema: ActionSchema) -> Self {
        self.actions.insert(name.into(), schema);
        self
    }

    /// Add an action that requires confirmation. Destructive actions are
    /// never treated as idempotent.
    pub fn with_destructive_action(mut self, name: impl Into<String>, mut schema: ActionSchema) -> Self {
        let name = name.into();
        schema.idempotent = false;
        self.destructive_actions.insert(name.clone());
        self.actions.insert(name, schema);
        self
    }

    pub fn action(&self, action: &str) -> Option<&ActionSchema> {
        self.actions.get(action)
    }

    pub fn supports(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    pub fn is_destructive(&self, action: &str) -> bool {
        self.destructive_actions.contains(action)
    }

    /// Retry-eligible: declared idempotent and not destructive.
    pub fn is_idempotent(&self, action: &str) -> bool {
        !self.is_destructive(action)
            && self.actions.get(action).map(|a| a.idempotent).unwrap_or(false)
    }
}
