//! Streaming subprocess executor for provider CLIs.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::adapter::ProviderAdapter;
use crate::cli_executable::is_executable_available_in;
use crate::error::ProviderError;
use crate::registry::AdapterRegistry;
use crate::types::{ExecutionContext, ExecutionOutcome, ParsedOutput, SessionOptions};

pub const DEFAULT_HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
/// Receives incremental output of one execution.
pub trait ExecutionCallback: Send + Sync {
    async fn on_progress(&self, message: String);

    async fn on_error(&self, error: String);
}

/// Callback that discards everything.
pub struct NoopCallback;

#[async_trait]
impl ExecutionCallback for NoopCallback {
    async fn on_progress(&self, _message: String) {}

    async fn on_error(&self, _error: String) {}
}

#[async_trait]
/// Runs one prompt against an assistant CLI. Never fails: errors are reported
/// through the callback and a failed [`ExecutionOutcome`].
pub trait AiExecutor: Send + Sync {
    async fn execute_with_session(
        &self,
        prompt: &str,
        work_dir: &Path,
        context: &ExecutionContext,
        callback: &dyn ExecutionCallback,
        options: &SessionOptions,
    ) -> ExecutionOutcome;

    async fn execute_with_streaming(
        &self,
        prompt: &str,
        work_dir: &Path,
        context: &ExecutionContext,
        callback: &dyn ExecutionCallback,
    ) -> ExecutionOutcome {
        self.execute_with_session(
            prompt,
            work_dir,
            context,
            callback,
            &SessionOptions::default(),
        )
        .await
    }
}

pub struct StreamingExecutor {
    registry: AdapterRegistry,
    health_probe_timeout: Duration,
    base_env: BTreeMap<String, String>,
}

impl StreamingExecutor {
    /// Executor inheriting the current process environment.
    pub fn new(registry: AdapterRegistry) -> Self {
        Self {
            registry,
            health_probe_timeout: DEFAULT_HEALTH_PROBE_TIMEOUT,
            base_env: std::env::vars().collect(),
        }
    }

    pub fn with_health_probe_timeout(mut self, timeout: Duration) -> Self {
        self.health_probe_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Verifies the adapter's CLI answers its version probe within the timeout.
    pub async fn check_availability(
        &self,
        adapter: &dyn ProviderAdapter,
    ) -> Result<String, ProviderError> {
        let unavailable = |detail: String| ProviderError::CliUnavailable {
            provider: adapter.id(),
            binary: adapter.binary().to_string(),
            detail,
        };
        let search_path = self.base_env.get("PATH").map(String::as_str);
        if !is_executable_available_in(adapter.binary(), search_path) {
            return Err(unavailable("executable not found".to_string()));
        }

        let mut command = Command::new(adapter.binary());
        command
            .kill_on_drop(true)
            .args(adapter.health_check_args())
            .env_clear()
            .envs(adapter.build_env(&self.base_env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = spawn_with_text_file_busy_retry(&mut command, adapter).await?;
        let output = tokio::time::timeout(self.health_probe_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                unavailable(format!(
                    "health probe timed out after {}ms",
                    self.health_probe_timeout.as_millis()
                ))
            })?
            .map_err(|error| unavailable(format!("health probe failed: {error}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(unavailable(format!(
                "health probe exited with status {}: {}",
                exit_status_label(output.status.code()),
                summarize_process_failure(&stderr, &stdout)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run(
        &self,
        prompt: &str,
        work_dir: &Path,
        context: &ExecutionContext,
        callback: &dyn ExecutionCallback,
        options: &SessionOptions,
    ) -> Result<ParsedOutput, ProviderError> {
        let adapter = self.registry.get(context.provider)?;
        self.check_availability(adapter.as_ref()).await?;

        let config = adapter.create_execution_config(prompt, context, options);
        tracing::debug!(
            provider = context.provider.as_str(),
            work_dir = %work_dir.display(),
            resume = options.resume_id().unwrap_or("none"),
            arg_count = config.args.len(),
            "spawning provider cli"
        );
        let mut command = Command::new(adapter.binary());
        command
            .kill_on_drop(true)
            .current_dir(work_dir)
            .args(&config.args)
            .env_clear()
            .envs(adapter.build_env(&self.base_env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = spawn_with_text_file_busy_retry(&mut command, adapter.as_ref()).await?;
        let io_error = |source: std::io::Error| ProviderError::Io {
            provider: context.provider,
            source,
        };

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let _ = stderr.read_to_end(&mut buffer).await;
                String::from_utf8_lossy(&buffer).to_string()
            })
        });

        let mut collected = String::new();
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut line = Vec::new();
            loop {
                line.clear();
                let read = reader.read_until(b'\n', &mut line).await.map_err(io_error)?;
                if read == 0 {
                    break;
                }
                let chunk = String::from_utf8_lossy(&line);
                collected.push_str(&chunk);
                let progress = adapter.extract_progress_message(&chunk);
                if !progress.trim().is_empty() {
                    callback.on_progress(progress).await;
                }
            }
        }

        let status = child.wait().await.map_err(io_error)?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            return Err(ProviderError::NonZeroExit {
                provider: context.provider,
                status: exit_status_label(status.code()),
                summary: summarize_process_failure(&stderr, &collected),
            });
        }
        Ok(adapter.parse_result(&collected))
    }
}

#[async_trait]
impl AiExecutor for StreamingExecutor {
    async fn execute_with_session(
        &self,
        prompt: &str,
        work_dir: &Path,
        context: &ExecutionContext,
        callback: &dyn ExecutionCallback,
        options: &SessionOptions,
    ) -> ExecutionOutcome {
        match self.run(prompt, work_dir, context, callback, options).await {
            Ok(parsed) => {
                tracing::debug!(
                    provider = context.provider.as_str(),
                    session_id = parsed.session_id.as_deref().unwrap_or("none"),
                    output_chars = parsed.text.chars().count(),
                    "provider cli completed"
                );
                ExecutionOutcome::succeeded(parsed.text, parsed.session_id)
            }
            Err(error) => {
                let message = error.to_string();
                tracing::warn!(
                    provider = context.provider.as_str(),
                    error = %message,
                    "provider cli execution failed"
                );
                callback.on_error(message.clone()).await;
                ExecutionOutcome::failed(message)
            }
        }
    }
}

async fn spawn_with_text_file_busy_retry(
    command: &mut Command,
    adapter: &dyn ProviderAdapter,
) -> Result<Child, ProviderError> {
    const MAX_TEXT_FILE_BUSY_RETRIES: u32 = 5;
    const TEXT_FILE_BUSY_ERRNO: i32 = 26;
    let mut attempt = 0;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(error)
                if error.raw_os_error() == Some(TEXT_FILE_BUSY_ERRNO)
                    && attempt < MAX_TEXT_FILE_BUSY_RETRIES =>
            {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(error) => {
                return Err(ProviderError::Spawn {
                    provider: adapter.id(),
                    binary: adapter.binary().to_string(),
                    detail: error.to_string(),
                });
            }
        }
    }
}

fn exit_status_label(code: Option<i32>) -> String {
    code.map(|value| value.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

fn summarize_process_failure(stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return tanuki_core::truncate_for_log(stderr);
    }

    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return tanuki_core::truncate_for_log(stdout);
    }

    "no error output".to_string()
}
