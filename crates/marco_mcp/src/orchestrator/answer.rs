//! Folding free-text clarification answers into parameter values.

use marco_intent::{ClarificationRequest, Parameters, ACTION_FIELD, MODULE_FIELD};
use serde_json::Value;

/// How a clarification answer affects the current step.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Folded {
    /// Apply these values over every candidate.
    Values(Parameters),
    /// The interpretation offered for confirmation was accepted.
    Accepted,
    /// The interpretation offered for confirmation was rejected.
    Rejected,
    /// Not a direct answer; classify this text instead.
    Rephrase(String),
}

pub(crate) fn fold_answer(request: &ClarificationRequest, answer: &str) -> Folded {
    let answer = answer.trim();

    if request.is_confirmation() {
        return match answer.to_ascii_lowercase().as_str() {
            "y" | "yes" | "ok" | "sure" => Folded::Accepted,
            "n" | "no" => Folded::Rejected,
            _ => Folded::Rephrase(answer.to_string()),
        };
    }

    // Structured answers count only when they name asked fields; otherwise
    // `=` or braces are part of the value itself.
    let asked = |values: &Parameters| values.keys().all(|key| request.fields.contains(key));

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(answer) {
        let values: Parameters = map.into_iter().collect();
        if asked(&values) {
            return Folded::Values(values);
        }
    }

    if let Some(values) = parse_pairs(answer).filter(|values| asked(values)) {
        return Folded::Values(values);
    }

    match request.fields.as_slice() {
        [field] if is_operation_field(field) => {
            // "fs.list_dir" picks an operation; a sentence is a rephrase
            if answer.is_empty() || answer.contains(char::is_whitespace) {
                Folded::Rephrase(answer.to_string())
            } else {
                Folded::Values(Parameters::from([(field.clone(), Value::from(answer))]))
            }
        }
        [field] if !answer.is_empty() => {
            Folded::Values(Parameters::from([(field.clone(), Value::from(answer))]))
        }
        _ => Folded::Rephrase(answer.to_string()),
    }
}

fn is_operation_field(field: &str) -> bool {
    field == MODULE_FIELD || field == ACTION_FIELD
}

/// `path=src pattern=TODO` or `path=src, pattern=TODO`.
fn parse_pairs(answer: &str) -> Option<Parameters> {
    let mut values = Parameters::new();
    for token in answer
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        let (key, value) = token.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        values.insert(key.to_string(), Value::from(value.trim()));
    }
    (!values.is_empty()).then_some(values)
}
