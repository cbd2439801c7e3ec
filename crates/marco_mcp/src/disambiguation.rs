//! Disambiguation Engine
//!
//! Decides whether ranked candidates resolve to an intent, need a question, or
//! cannot be resolved. Pure and deterministic: same input, same output.

use crate::policy::DisambiguationPolicy;
use marco_intent::{ClarificationRequest, Intent, IntentCandidate, ACTION_FIELD, MODULE_FIELD};
use serde_json::Value;

pub const CONFIRM_YES: &str = "yes";
pub const CONFIRM_NO: &str = "no";

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Intent),
    Clarify(ClarificationRequest),
    Unresolved {
        reason: String,
        best: Option<IntentCandidate>,
    },
}

/// Rank by confidence (descending), then fewer missing fields. Remaining ties
/// keep input order.
pub fn rank(candidates: &[IntentCandidate]) -> Vec<IntentCandidate> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.missing_fields.len().cmp(&b.missing_fields.len()))
    });
    ranked
}

/// Resolve `candidates` given `rounds_used` clarification rounds so far in
/// the current step.
pub fn resolve(
    candidates: &[IntentCandidate],
    policy: &DisambiguationPolicy,
    rounds_used: u32,
) -> Resolution {
    let ranked = rank(candidates);
    let Some(top) = ranked.first() else {
        return Resolution::Unresolved {
            reason: "no interpretation of the command was produced".to_string(),
            best: None,
        };
    };

    if top.is_complete() && top.confidence >= policy.acceptance_threshold {
        return Resolution::Resolved(top.intent.clone());
    }

    if top.confidence < policy.completion_threshold {
        return Resolution::Unresolved {
            reason: format!(
                "best interpretation has confidence {:.2}, below {:.2}",
                top.confidence, policy.completion_threshold
            ),
            best: Some(top.clone()),
        };
    }

    if rounds_used >= policy.max_clarification_rounds {
        return Resolution::Unresolved {
            reason: format!(
                "still ambiguous after {} clarification round(s)",
                rounds_used
            ),
            best: Some(top.clone()),
        };
    }

    let round = rounds_used + 1;
    if top.is_complete() {
        return Resolution::Clarify(confirm_interpretation(&top.intent, round));
    }

    let fields = top.unresolved_fields();
    let viable: Vec<&IntentCandidate> = ranked
        .iter()
        .filter(|c| c.confidence >= policy.completion_threshold)
        .collect();
    let options = match fields.as_slice() {
        [field] => field_options(field, &viable),
        _ => Vec::new(),
    };
    Resolution::Clarify(clarification_for(&top.intent, fields, options, round))
}

/// Ask the user to confirm `intent` as a whole.
pub fn confirm_interpretation(intent: &Intent, round: u32) -> ClarificationRequest {
    ClarificationRequest {
        question: format!("Did you mean {}?", intent),
        options: vec![CONFIRM_YES.to_string(), CONFIRM_NO.to_string()],
        context: intent.clone(),
        fields: Vec::new(),
        round,
    }
}

/// A question scoped to exactly `fields` of `intent`.
pub fn clarification_for(
    intent: &Intent,
    fields: Vec<String>,
    options: Vec<String>,
    round: u32,
) -> ClarificationRequest {
    let targets_operation = fields
        .iter()
        .any(|f| f == MODULE_FIELD || f == ACTION_FIELD);

    let question = if targets_operation {
        "What would you like me to do?".to_string()
    } else {
        match fields.as_slice() {
            [field] => format!("Which {} should {} use?", field, intent.qualified_name()),
            _ => format!(
                "Please provide {} for {}.",
                fields.join(", "),
                intent.qualified_name()
            ),
        }
    };

    ClarificationRequest {
        question,
        options,
        context: intent.clone(),
        fields,
        round,
    }
}

/// Distinct values the viable candidates give `field`, in rank order.
fn field_options(field: &str, viable: &[&IntentCandidate]) -> Vec<String> {
    let mut options: Vec<String> = Vec::new();
    for candidate in viable {
        let option = if field == MODULE_FIELD || field == ACTION_FIELD {
            candidate
                .intent
                .is_addressed()
                .then(|| candidate.intent.qualified_name())
        } else {
            candidate.intent.parameter(field).map(render_value)
        };
        if let Some(option) = option {
            if !options.contains(&option) {
                options.push(option);
            }
        }
    }
    // a single option is not a choice
    if options.len() < 2 {
        options.clear();
    }
    options
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
