//! Converts the raw text a model returns for one turn into exactly one
//! [`Action`]. The expected shape is line-oriented and label-based:
//!
//! ```text
//! Thought: I should check the weather first.
//! Action: tool
//! Tool: get_weather
//! Arguments: {"city": "Beijing"}
//! ```
//!
//! Labels are matched case-insensitively; a field's body runs until the next
//! recognized label or the end of the text, so multi-line JSON or prose is
//! fine. This is a small hand-rolled line scanner in the same shape as a
//! frontmatter reader: no grammar crate, just a match on lowercased label
//! prefixes with an accumulating body.

use crate::action::{Action, LaunchSpec};
use std::collections::HashMap;

const LABELS: &[&str] = &[
    "thought",
    "action",
    "tool",
    "arguments",
    "agents",
    "tasks",
    "to",
    "content",
    "response",
];

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing required 'Action:' field")]
    MissingAction,
    #[error("unknown action '{0}'; expected one of tool, launch_subagents, wait_for_subagents, wait, send_message, finish")]
    UnknownAction(String),
    #[error("missing required field '{field}' for action '{action}'")]
    MissingField { action: String, field: String },
    #[error("invalid JSON in field '{field}': {reason} (got: {snippet})")]
    InvalidJson {
        field: String,
        reason: String,
        snippet: String,
    },
    #[error("'Agents' and 'Tasks' arrays have different lengths ({agents} vs {tasks})")]
    LengthMismatch { agents: usize, tasks: usize },
}

impl ParseError {
    /// Human-readable message appended to the next re-prompt, per the
    /// retry-with-feedback policy.
    pub fn feedback(&self) -> String {
        format!("Your previous response could not be parsed: {self}. Please respond again using the exact label format (Thought/Action/...).")
    }
}

/// Scan `text` into a map from lowercased label to its accumulated,
/// trimmed body. Later occurrences of the same label overwrite earlier
/// ones (the model is expected to emit each label at most once).
fn scan_fields(text: &str) -> HashMap<String, String> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut current: Option<(String, Vec<String>)> = None;

    let flush = |current: Option<(String, Vec<String>)>, fields: &mut HashMap<String, String>| {
        if let Some((label, body)) = current {
            fields.insert(label, body.join("\n").trim().to_string());
        }
    };

    for line in text.lines() {
        if let Some((label, rest)) = match_label(line) {
            flush(current.take(), &mut fields);
            current = Some((label, vec![rest.to_string()]));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line.to_string());
        }
    }
    flush(current, &mut fields);
    fields
}

/// If `line` begins with `"<label>:"` for a recognized label (any case,
/// leading whitespace ignored), return the lowercased label and the
/// remainder of the line.
fn match_label(line: &str) -> Option<(String, &str)> {
    let trimmed = line.trim_start();
    let colon = trimmed.find(':')?;
    let candidate = trimmed[..colon].trim().to_lowercase();
    if LABELS.contains(&candidate.as_str()) {
        Some((candidate, trimmed[colon + 1..].trim()))
    } else {
        None
    }
}

fn parse_json(fields: &HashMap<String, String>, action: &str, field: &str) -> Result<serde_json::Value, ParseError> {
    let raw = fields
        .get(field)
        .ok_or_else(|| ParseError::MissingField {
            action: action.to_string(),
            field: field.to_string(),
        })?;
    serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson {
        field: field.to_string(),
        reason: e.to_string(),
        snippet: snippet(raw),
    })
}

fn snippet(s: &str) -> String {
    const MAX: usize = 80;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(MAX).collect::<String>())
    }
}

fn require_field(
    fields: &HashMap<String, String>,
    action: &str,
    field: &str,
) -> Result<String, ParseError> {
    fields
        .get(field)
        .cloned()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::MissingField {
            action: action.to_string(),
            field: field.to_string(),
        })
}

/// Parse the raw model text for one turn into exactly one [`Action`].
pub fn parse(text: &str) -> Result<Action, ParseError> {
    let fields = scan_fields(text);
    let thought = fields.get("thought").cloned().filter(|s| !s.is_empty());
    let action_kind = fields
        .get("action")
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingAction)?;

    match action_kind.as_str() {
        "tool" => {
            let name = require_field(&fields, "tool", "tool")?;
            let arguments = parse_json(&fields, "tool", "arguments")?;
            Ok(Action::Tool {
                name,
                arguments,
                thought,
            })
        }
        "launch_subagents" => {
            let agents_raw = parse_json(&fields, "launch_subagents", "agents")?;
            let tasks_raw = parse_json(&fields, "launch_subagents", "tasks")?;
            let agents: Vec<String> = serde_json::from_value(agents_raw).map_err(|e| {
                ParseError::InvalidJson {
                    field: "agents".to_string(),
                    reason: e.to_string(),
                    snippet: snippet(fields.get("agents").map(String::as_str).unwrap_or("")),
                }
            })?;
            let tasks: Vec<String> = serde_json::from_value(tasks_raw).map_err(|e| {
                ParseError::InvalidJson {
                    field: "tasks".to_string(),
                    reason: e.to_string(),
                    snippet: snippet(fields.get("tasks").map(String::as_str).unwrap_or("")),
                }
            })?;
            if agents.len() != tasks.len() {
                return Err(ParseError::LengthMismatch {
                    agents: agents.len(),
                    tasks: tasks.len(),
                });
            }
            let specs = agents
                .into_iter()
                .zip(tasks)
                .map(|(subagent_name, task)| LaunchSpec {
                    subagent_name,
                    task,
                    child_display_name: None,
                    context: None,
                })
                .collect();
            Ok(Action::LaunchSubagents { specs, thought })
        }
        "wait_for_subagents" => Ok(Action::WaitForSubagents { thought }),
        "wait" => Ok(Action::Wait { thought }),
        "send_message" => {
            let to = require_field(&fields, "send_message", "to")?;
            let content = require_field(&fields, "send_message", "content")?;
            Ok(Action::SendMessage {
                to,
                content,
                thought,
            })
        }
        "finish" => {
            let content = fields
                .get("response")
                .or_else(|| fields.get("content"))
                .cloned()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ParseError::MissingField {
                    action: "finish".to_string(),
                    field: "response".to_string(),
                })?;
            Ok(Action::Finish { content, thought })
        }
        other => Err(ParseError::UnknownAction(other.to_string())),
    }
}
