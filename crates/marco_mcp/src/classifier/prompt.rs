//! Prompt construction for LLM-backed classification.

use super::ClassifyContext;
use marco_intent::CapabilityDescriptor;
use std::fmt::Write;

pub const SYSTEM_PROMPT: &str = "You parse user commands into JSON intents. Output *only* JSON.";

const SCHEMA: &str = r#"You are an intent parser. You must output *only* JSON matching this schema:

{
  "module": "<module name>",
  "action": "<action name>",
  "parameters": { ... },
  "confidence": <0.0 - 1.0>,
  "missing": ["<required parameter you could not determine>"],
  "ambiguous": ["<parameter with more than one plausible value>"]
}

If several interpretations are plausible, output {"candidates": [ ... ]} with
one object per interpretation, most likely first."#;

const FEW_SHOTS: &str = r#"Examples:
User: "List all files in src"
{"module":"fs","action":"list_dir","parameters":{"path":"src"},"confidence":0.95}

User: "Find TODO comments in pkg/"
{"module":"fs","action":"find_pattern","parameters":{"pattern":"TODO","path":"pkg"},"confidence":0.9}

User: "delete it"
{"module":"fs","action":"delete_file","parameters":{},"confidence":0.7,"missing":["path"]}"#;

/// A chat prompt: one system message and one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Build the classification prompt for `text`.
pub fn build_prompt(text: &str, context: &ClassifyContext) -> Prompt {
    let mut user = String::new();
    user.push_str(SCHEMA);
    user.push_str("\n\nAvailable modules:\n");
    for descriptor in &context.catalog {
        write_descriptor(&mut user, descriptor);
    }

    user.push('\n');
    user.push_str(FEW_SHOTS);
    user.push('\n');

    if !context.cumulative.is_empty() || !context.session.is_empty() {
        user.push_str("\nKnown context (use it to fill references like \"it\" or \"there\"):\n");
        for (key, value) in context.session.iter().chain(context.cumulative.iter()) {
            let _ = writeln!(user, "- {}: {}", key, value);
        }
    }

    if !context.clarifications.is_empty() {
        user.push_str("\nClarifications so far:\n");
        for exchange in &context.clarifications {
            let _ = writeln!(user, "Q: {}\nA: {}", exchange.question, exchange.answer);
        }
    }

    let _ = write!(
        user,
        "\nNow parse this command into JSON:\n---\n{}\n---\n",
        text
    );

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

fn write_descriptor(out: &mut String, descriptor: &CapabilityDescriptor) {
    let _ = writeln!(out, "- module \"{}\": {}", descriptor.name, descriptor.description);
    for (action, schema) in &descriptor.actions {
        let params: Vec<String> = schema
            .params
            .iter()
            .map(|(name, spec)| {
                format!(
                    "{}{}: {}",
                    name,
                    if spec.required { "" } else { "?" },
                    spec.kind
                )
            })
            .collect();
        let _ = write!(
            out,
            "    - {}({}): {}",
            action,
            params.join(", "),
            schema.description
        );
        if descriptor.is_destructive(action) {
            out.push_str(" [destructive]");
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marco_intent::{ActionSchema, ClarificationExchange, ParamKind};
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ClassifyContext {
        let fs = CapabilityDescriptor::new("fs", "local files")
            .with_action(
                "list_dir",
                ActionSchema::read_only("list a directory").optional(
                    "path",
                    ParamKind::String,
                    "directory",
                ),
            )
            .with_destructive_action(
                "delete_file",
                ActionSchema::write("delete a file").required("path", ParamKind::String, "file"),
            );
        ClassifyContext {
            catalog: vec![Arc::new(fs)],
            ..Default::default()
        }
    }

    #[test]
    fn test_prompt_lists_catalog_and_text() {
        let prompt = build_prompt("list files in src", &context());
        assert_eq!(prompt.system, SYSTEM_PROMPT);
        assert!(prompt.user.contains("module \"fs\""));
        assert!(prompt.user.contains("list_dir(path?: string)"));
        assert!(prompt.user.contains("delete_file(path: string): delete a file [destructive]"));
        assert!(prompt.user.ends_with("---\nlist files in src\n---\n"));
        assert!(!prompt.user.contains("Clarifications so far"));
    }

    #[test]
    fn test_prompt_includes_context_and_clarifications() {
        let mut ctx = context();
        ctx.cumulative.insert("last_dir".into(), json!("src"));
        ctx.clarifications.push(ClarificationExchange {
            question: "Which file?".into(),
            fields: vec!["path".into()],
            answer: "notes.txt".into(),
        });
        let prompt = build_prompt("delete it", &ctx);
        assert!(prompt.user.contains("- last_dir: \"src\""));
        assert!(prompt.user.contains("Q: Which file?\nA: notes.txt"));
    }
}
