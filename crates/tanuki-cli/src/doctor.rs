use anyhow::Result;
use tanuki_provider::StreamingExecutor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DoctorReport {
    pub(crate) lines: Vec<String>,
    pub(crate) unavailable: usize,
}

impl DoctorReport {
    pub(crate) fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// Runs the availability probe for every registered provider.
pub(crate) async fn run_doctor(executor: &StreamingExecutor) -> Result<DoctorReport> {
    let mut report = DoctorReport {
        lines: Vec::new(),
        unavailable: 0,
    };
    for provider in executor.registry().providers() {
        let adapter = executor.registry().get(provider)?;
        match executor.check_availability(adapter.as_ref()).await {
            Ok(version) => {
                let version = if version.is_empty() {
                    String::new()
                } else {
                    format!(" {version}")
                };
                report
                    .lines
                    .push(format!("{provider}: ok ({}){version}", adapter.binary()));
            }
            Err(error) => {
                tracing::warn!(provider = %provider, error = %error, "provider unavailable");
                report.unavailable += 1;
                report.lines.push(format!("{provider}: unavailable: {error}"));
            }
        }
    }
    Ok(report)
}
