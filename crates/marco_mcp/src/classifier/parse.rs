//! Parsing raw backend output into ranked candidates.
//!
//! Accepted shapes: one intent object, an array of them, or
//! `{"candidates": [...]}`. Anything else becomes a single zero-confidence
//! candidate so the failure reaches disambiguation instead of vanishing.

use marco_intent::{Intent, IntentCandidate, Parameters, ACTION_FIELD, MODULE_FIELD};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Confidence assumed when the backend gives none.
const DEFAULT_CONFIDENCE: f64 = 1.0;

/// Parse `raw` into candidates, highest confidence first (stable).
pub fn parse_candidates(raw: &str, text: &str) -> Vec<IntentCandidate> {
    let Some(value) = extract_json(raw) else {
        return vec![IntentCandidate::unparseable(text)];
    };

    let objects: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("candidates") {
            Some(Value::Array(items)) => items,
            Some(_) => return vec![IntentCandidate::unparseable(text)],
            None => vec![Value::Object(map)],
        },
        _ => return vec![IntentCandidate::unparseable(text)],
    };

    let mut candidates: Vec<IntentCandidate> = objects
        .iter()
        .map(|item| match item {
            Value::Object(map) => candidate_from_object(map, text),
            _ => IntentCandidate::unparseable(text),
        })
        .collect();

    if candidates.is_empty() {
        candidates.push(IntentCandidate::unparseable(text));
    }
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates
}

fn candidate_from_object(map: &Map<String, Value>, text: &str) -> IntentCandidate {
    let mut module = string_field(map, &["module"]);
    let mut action = string_field(map, &["action", "intent"]);

    // "fs.list_dir" in the action slot
    if module.is_empty() {
        if let Some((m, a)) = action.split_once('.') {
            if !m.is_empty() && !a.is_empty() {
                module = m.to_string();
                action = a.to_string();
            }
        }
    }

    let parameters: Parameters = match map.get("parameters").or_else(|| map.get("params")) {
        Some(Value::Object(params)) => params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Parameters::new(),
    };

    let confidence = match map.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => DEFAULT_CONFIDENCE,
    };

    let mut missing = string_set(map, &["missing", "missing_fields"]);
    let ambiguous = string_set(map, &["ambiguous", "ambiguous_fields"]);
    if module.is_empty() {
        missing.insert(MODULE_FIELD.to_string());
    }
    if action.is_empty() {
        missing.insert(ACTION_FIELD.to_string());
    }

    let intent = Intent::new(module, action)
        .with_parameters(parameters)
        .with_raw_input(text);
    IntentCandidate::new(intent, confidence)
        .with_missing(missing)
        .with_ambiguous(ambiguous)
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn string_set(map: &Map<String, Value>, keys: &[&str]) -> BTreeSet<String> {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

/// Find the JSON document in `raw`, tolerating markdown fences and chatter
/// around it.
fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = strip_fences(raw.trim());
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let start = trimmed.find(|c: char| c == '{' || c == '[')?;
    let end = trimmed.rfind(|c: char| c == '}' || c == ']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn strip_fences(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    // drop the language tag line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
