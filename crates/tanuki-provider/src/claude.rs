//! Claude Code CLI adapter.
//!
//! Structured mode runs `claude -p <prompt> --output-format stream-json`, which
//! prints one JSON event per line: a `system/init` event carrying the session
//! id, `assistant` events with text and tool-use blocks, and a final `result`
//! event with the answer text.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::adapter::{first_line, merge_env, ProviderAdapter};
use crate::types::{
    ExecutionConfig, ExecutionContext, OutputFormat, ParsedOutput, ProviderId, ProviderSettings,
    SessionOptions,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeAdapter {
    settings: ProviderSettings,
}

impl ClaudeAdapter {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new(ProviderSettings::default_for(ProviderId::Claude))
    }
}

impl ProviderAdapter for ClaudeAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Claude
    }

    fn binary(&self) -> &str {
        &self.settings.binary
    }

    fn build_env(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = merge_env(base, &self.settings.env);
        // A nested Claude Code session refuses to start when this is inherited.
        env.remove("CLAUDECODE");
        env
    }

    fn create_execution_config(
        &self,
        prompt: &str,
        context: &ExecutionContext,
        options: &SessionOptions,
    ) -> ExecutionConfig {
        let user_prompt = [context.context.trim(), prompt.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut args = vec!["-p".to_string(), user_prompt];
        match options.output_format {
            OutputFormat::Json => {
                args.extend(["--output-format", "stream-json", "--verbose"].map(String::from));
            }
            OutputFormat::Text => {
                args.extend(["--output-format", "text"].map(String::from));
            }
        }
        if let Some(session_id) = options.resume_id() {
            args.push("--resume".to_string());
            args.push(session_id.to_string());
        }
        if !context.system_prompt.trim().is_empty() {
            args.push("--append-system-prompt".to_string());
            args.push(context.system_prompt.trim().to_string());
        }
        if let Some(model) = self.settings.model.as_deref() {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        args.push("--dangerously-skip-permissions".to_string());
        args.extend(self.settings.extra_args.iter().cloned());
        ExecutionConfig { args }
    }

    fn parse_result(&self, raw_output: &str) -> ParsedOutput {
        let raw = raw_output.to_string();
        let trimmed = raw_output.trim();
        if trimmed.is_empty() {
            return ParsedOutput {
                raw,
                ..ParsedOutput::default()
            };
        }

        let events = trimmed
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
            .collect::<Vec<_>>();
        let events = if events.is_empty() {
            serde_json::from_str::<Value>(trimmed)
                .map(|value| match value {
                    Value::Array(entries) => entries,
                    other => vec![other],
                })
                .unwrap_or_default()
        } else {
            events
        };
        if events.is_empty() {
            return ParsedOutput {
                text: trimmed.to_string(),
                raw,
                session_id: None,
            };
        }

        let session_id = events.iter().rev().find_map(session_id_of);
        let text = events
            .iter()
            .rev()
            .find_map(result_text_of)
            .unwrap_or_else(|| collect_assistant_text(&events));
        ParsedOutput {
            text,
            raw,
            session_id,
        }
    }

    fn extract_progress_message(&self, partial: &str) -> String {
        let trimmed = partial.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        let Ok(event) = serde_json::from_str::<Value>(trimmed) else {
            return first_line(trimmed);
        };
        if event.get("type").and_then(Value::as_str) != Some("assistant") {
            return String::new();
        }
        let Some(blocks) = event
            .pointer("/message/content")
            .and_then(Value::as_array)
        else {
            return String::new();
        };
        blocks
            .iter()
            .map(describe_block)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
    }
}

fn session_id_of(event: &Value) -> Option<String> {
    event
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn result_text_of(event: &Value) -> Option<String> {
    if event.get("type").and_then(Value::as_str) != Some("result") && event.get("type").is_some() {
        return None;
    }
    event
        .get("result")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|result| !result.is_empty())
        .map(str::to_string)
}

fn collect_assistant_text(events: &[Value]) -> String {
    events
        .iter()
        .filter(|event| event.get("type").and_then(Value::as_str) == Some("assistant"))
        .filter_map(|event| event.pointer("/message/content").and_then(Value::as_array))
        .flatten()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn describe_block(block: &Value) -> String {
    match block.get("type").and_then(Value::as_str) {
        Some("text") => block
            .get("text")
            .and_then(Value::as_str)
            .map(first_line)
            .unwrap_or_default(),
        Some("tool_use") => {
            let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
            let input = block.get("input");
            let field = |key: &str| {
                input
                    .and_then(|input| input.get(key))
                    .and_then(Value::as_str)
                    .map(first_line)
                    .unwrap_or_default()
            };
            match name {
                "Bash" => format!("Running `{}`", field("command")),
                "Edit" | "MultiEdit" | "Write" => format!("Editing `{}`", field("file_path")),
                "Read" => format!("Reading `{}`", field("file_path")),
                "Grep" | "Glob" => format!("Searching `{}`", field("pattern")),
                other => format!("Using tool `{other}`"),
            }
        }
        _ => String::new(),
    }
}
