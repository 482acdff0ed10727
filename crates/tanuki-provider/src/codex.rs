//! Codex CLI adapter.
//!
//! Structured mode runs `codex exec --json`, which emits newline-delimited
//! events: `thread.started` (session created), `item.started` /
//! `item.completed` for commands, file changes and reasoning, and
//! `item.completed` with an `agent_message` item for assistant replies.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::adapter::{compose_prompt, first_line, merge_env, ProviderAdapter};
use crate::types::{
    ExecutionConfig, ExecutionContext, OutputFormat, ParsedOutput, ProviderId, ProviderSettings,
    SessionOptions,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexAdapter {
    settings: ProviderSettings,
}

impl CodexAdapter {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new(ProviderSettings::default_for(ProviderId::Codex))
    }
}

impl ProviderAdapter for CodexAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Codex
    }

    fn binary(&self) -> &str {
        &self.settings.binary
    }

    fn build_env(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        merge_env(base, &self.settings.env)
    }

    fn create_execution_config(
        &self,
        prompt: &str,
        context: &ExecutionContext,
        options: &SessionOptions,
    ) -> ExecutionConfig {
        let mut args = vec!["exec".to_string()];
        if options.output_format == OutputFormat::Json {
            args.push("--json".to_string());
        }
        args.push("--full-auto".to_string());
        args.push("--skip-git-repo-check".to_string());
        if let Some(model) = self.settings.model.as_deref() {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        args.extend(self.settings.extra_args.iter().cloned());
        if let Some(session_id) = options.resume_id() {
            args.push("resume".to_string());
            args.push(session_id.to_string());
        }
        args.push(compose_prompt(
            &context.system_prompt,
            &context.context,
            prompt,
        ));
        ExecutionConfig { args }
    }

    fn parse_result(&self, raw_output: &str) -> ParsedOutput {
        let raw = raw_output.to_string();
        let events = raw_output
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
            .filter(Value::is_object)
            .collect::<Vec<_>>();
        if events.is_empty() {
            return ParsedOutput {
                text: raw_output.trim().to_string(),
                raw,
                session_id: None,
            };
        }

        let session_id = events.iter().find_map(session_id_of);
        let text = events
            .iter()
            .rev()
            .find_map(agent_message_of)
            .unwrap_or_default();
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
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
        let Some(item) = event.get("item") else {
            return String::new();
        };
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();
        match (event_type, item_type) {
            ("item.started", "command_execution") => item
                .get("command")
                .and_then(Value::as_str)
                .map(|command| format!("Running `{}`", first_line(command)))
                .unwrap_or_default(),
            ("item.completed", "agent_message") => item
                .get("text")
                .and_then(Value::as_str)
                .map(first_line)
                .unwrap_or_default(),
            ("item.completed", "reasoning") => item
                .get("text")
                .and_then(Value::as_str)
                .map(|text| first_line(text).trim_matches('*').trim().to_string())
                .unwrap_or_default(),
            ("item.completed", "file_change") => {
                let paths = item
                    .get("changes")
                    .and_then(Value::as_array)
                    .map(|changes| {
                        changes
                            .iter()
                            .filter_map(|change| change.get("path").and_then(Value::as_str))
                            .map(|path| format!("`{path}`"))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                if paths.is_empty() {
                    String::new()
                } else {
                    format!("Updated {}", paths.join(", "))
                }
            }
            _ => String::new(),
        }
    }
}

fn session_id_of(event: &Value) -> Option<String> {
    let event_type = event.get("type").and_then(Value::as_str)?;
    let value = match event_type {
        "thread.started" => event.get("thread_id"),
        "session.created" | "session_configured" => event.get("session_id"),
        _ => None,
    }?;
    value
        .as_str()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn agent_message_of(event: &Value) -> Option<String> {
    if event.get("type").and_then(Value::as_str) != Some("item.completed") {
        return None;
    }
    let item = event.get("item")?;
    if item.get("type").and_then(Value::as_str) != Some("agent_message") {
        return None;
    }
    item.get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext {
            provider: ProviderId::Codex,
            system_prompt: "System rules".to_string(),
            context: String::new(),
        }
    }

    #[test]
    fn unit_create_execution_config_places_prompt_last() {
        let config = CodexAdapter::default().create_execution_config(
            "add tests",
            &context(),
            &SessionOptions::default(),
        );
        assert_eq!(
            config.args,
            vec![
                "exec",
                "--json",
                "--full-auto",
                "--skip-git-repo-check",
                "System rules\n\nadd tests"
            ]
        );
    }

    #[test]
    fn functional_create_execution_config_uses_resume_subcommand() {
        let config = CodexAdapter::default().create_execution_config(
            "continue",
            &context(),
            &SessionOptions::resume("thread-7"),
        );
        let resume_at = config
            .args
            .iter()
            .position(|arg| arg == "resume")
            .expect("resume subcommand");
        assert_eq!(config.args[resume_at + 1], "thread-7");
        assert_eq!(config.args.len(), resume_at + 3);
    }

    #[test]
    fn integration_parse_result_reads_thread_id_and_last_agent_message() {
        let raw = concat!(
            "{\"type\":\"thread.started\",\"thread_id\":\"thread-42\"}\n",
            "{\"type\":\"turn.started\"}\n",
            "{\"type\":\"item.completed\",\"item\":{\"id\":\"1\",\"type\":\"agent_message\",\"text\":\"first\"}}\n",
            "{\"type\":\"item.completed\",\"item\":{\"id\":\"2\",\"type\":\"agent_message\",\"text\":\"final answer\"}}\n",
            "{\"type\":\"turn.completed\",\"usage\":{\"input_tokens\":1}}\n"
        );
        let parsed = CodexAdapter::default().parse_result(raw);
        assert_eq!(parsed.session_id.as_deref(), Some("thread-42"));
        assert_eq!(parsed.text, "final answer");
    }

    #[test]
    fn regression_parse_result_keeps_plain_text_output() {
        let parsed = CodexAdapter::default().parse_result("just text\n");
        assert_eq!(parsed.text, "just text");
        assert!(parsed.session_id.is_none());
    }

    #[test]
    fn unit_extract_progress_message_maps_known_items() {
        let adapter = CodexAdapter::default();
        assert_eq!(
            adapter.extract_progress_message(
                "{\"type\":\"item.started\",\"item\":{\"type\":\"command_execution\",\"command\":\"bash -lc ls\"}}"
            ),
            "Running `bash -lc ls`"
        );
        assert_eq!(
            adapter.extract_progress_message(
                "{\"type\":\"item.completed\",\"item\":{\"type\":\"file_change\",\"changes\":[{\"path\":\"a.rs\",\"kind\":\"update\"}]}}"
            ),
            "Updated `a.rs`"
        );
        assert_eq!(
            adapter.extract_progress_message(
                "{\"type\":\"item.completed\",\"item\":{\"type\":\"reasoning\",\"text\":\"**Planning changes**\"}}"
            ),
            "Planning changes"
        );
    }

    #[test]
    fn regression_extract_progress_message_ignores_lifecycle_events() {
        let adapter = CodexAdapter::default();
        assert!(adapter
            .extract_progress_message("{\"type\":\"thread.started\",\"thread_id\":\"t\"}")
            .is_empty());
        assert!(adapter
            .extract_progress_message("{\"type\":\"turn.completed\"}")
            .is_empty());
    }
}
