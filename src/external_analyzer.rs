//! Supervised execution of third-party analyzer subprocesses.
//!
//! Each invocation spawns the tool with piped output, drains stdout/stderr
//! concurrently, and races completion against a hard timeout and a
//! cancellation signal. On either, the subprocess is killed before the
//! call returns; `kill_on_drop` backstops every other exit path. Malformed
//! tool output degrades to a raw-output fallback instead of an error.

use crate::threat_types::{threat_score, Finding, FindingLocation, Severity, ThreatCategory};
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// External analyzers the orchestrator knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Static analysis of contract sources.
    Slither,
    /// Symbolic execution of contract sources.
    Mythril,
}

impl ToolKind {
    pub fn executable(self) -> &'static str {
        match self {
            ToolKind::Slither => "slither",
            ToolKind::Mythril => "myth",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::Slither => "slither",
            ToolKind::Mythril => "mythril",
        }
    }

    fn args(self, project_path: &Path) -> Vec<String> {
        let target = project_path.display().to_string();
        match self {
            ToolKind::Slither => vec![target, "--json".to_string(), "-".to_string()],
            ToolKind::Mythril => vec![
                "analyze".to_string(),
                target,
                "-o".to_string(),
                "json".to_string(),
            ],
        }
    }
}

/// Errors from the adapter. Timeouts and cancellations are expected
/// degradations, not scan failures.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("{tool} exceeded its {timeout_ms}ms budget and was killed")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("{tool} was cancelled and killed")]
    Cancelled { tool: String },

    #[error("failed to spawn {tool}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o failure while supervising {tool}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parsed (or raw-fallback) output of one analyzer run.
#[derive(Debug)]
pub struct AnalyzerOutput {
    pub tool: String,
    pub findings: Vec<Finding>,
    /// Populated when the tool's output was not parseable JSON.
    pub raw: Option<String>,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
}

/// Map an external tool's severity vocabulary onto ours. External tools are
/// treated as conservative, so the mapping shifts one level up: "high" maps
/// to Critical, "medium" to High, "low" to Medium, anything else to Low.
pub fn map_external_severity(raw: &str) -> Severity {
    match raw.to_ascii_lowercase().as_str() {
        "high" => Severity::Critical,
        "medium" => Severity::High,
        "low" => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Raw process result before tool-specific parsing.
pub struct RawProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

/// Resolves only when the cancellation flag becomes true. A dropped sender
/// means no cancellation can ever arrive, not that one did.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Spawn `program` and supervise it until exit, timeout, or cancellation.
/// The subprocess never outlives this call.
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
    mut cancel: watch::Receiver<bool>,
) -> Result<RawProcessOutput, AnalyzerError> {
    let started = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| AnalyzerError::Spawn {
            tool: program.to_string(),
            source,
        })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    let status = tokio::select! {
        waited = tokio::time::timeout(timeout, child.wait()) => match waited {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(source)) => {
                return Err(AnalyzerError::Io { tool: program.to_string(), source });
            }
            Err(_) => {
                warn!(tool = program, timeout_ms = timeout.as_millis() as u64,
                      "analyzer timed out, killing subprocess");
                let _ = child.start_kill();
                let _ = child.wait().await;
                crate::metrics::ANALYZER_TIMEOUTS_TOTAL
                    .with_label_values(&[program])
                    .inc();
                Err(AnalyzerError::Timeout {
                    tool: program.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        },
        _ = cancelled(&mut cancel) => {
            info!(tool = program, "analyzer cancelled, killing subprocess");
            let _ = child.start_kill();
            let _ = child.wait().await;
            Err(AnalyzerError::Cancelled { tool: program.to_string() })
        }
    }?;

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    Ok(RawProcessOutput {
        stdout,
        stderr,
        exit_code: status.code(),
        duration: started.elapsed(),
    })
}

/// Run one analyzer against `project_path` and parse its output into the
/// common finding shape.
pub async fn run(
    tool: ToolKind,
    project_path: &Path,
    timeout: Duration,
    cancel: watch::Receiver<bool>,
) -> Result<AnalyzerOutput, AnalyzerError> {
    let args = tool.args(project_path);
    let raw = run_command(tool.executable(), &args, timeout, cancel).await?;
    let duration_ms = raw.duration.as_millis() as u64;
    debug!(tool = tool.as_str(), duration_ms, exit_code = ?raw.exit_code, "analyzer finished");

    let stdout = String::from_utf8_lossy(&raw.stdout).into_owned();
    let output = match serde_json::from_str::<Value>(&stdout) {
        Ok(json) => AnalyzerOutput {
            tool: tool.as_str().to_string(),
            findings: parse_findings(tool, &json),
            raw: None,
            duration_ms,
            exit_code: raw.exit_code,
        },
        Err(_) => AnalyzerOutput {
            tool: tool.as_str().to_string(),
            findings: Vec::new(),
            raw: Some(if stdout.is_empty() {
                String::from_utf8_lossy(&raw.stderr).into_owned()
            } else {
                stdout
            }),
            duration_ms,
            exit_code: raw.exit_code,
        },
    };
    Ok(output)
}

/// Parse tool-specific JSON into findings.
pub fn parse_findings(tool: ToolKind, json: &Value) -> Vec<Finding> {
    match tool {
        ToolKind::Slither => parse_slither(json),
        ToolKind::Mythril => parse_mythril(json),
    }
}

fn parse_slither(json: &Value) -> Vec<Finding> {
    let Some(detectors) = json
        .pointer("/results/detectors")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    detectors
        .iter()
        .map(|item| {
            let severity =
                map_external_severity(item.get("impact").and_then(Value::as_str).unwrap_or(""));
            let check = item
                .get("check")
                .and_then(Value::as_str)
                .unwrap_or("slither-detector");
            let description = item
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let mut finding = Finding::new(
                severity,
                ThreatCategory::Vulnerability,
                format!("Static Analysis: {check}"),
                description,
            );
            finding.location = FindingLocation {
                file: item
                    .pointer("/elements/0/source_mapping/filename_short")
                    .and_then(Value::as_str)
                    .map(String::from),
                line: item
                    .pointer("/elements/0/source_mapping/lines/0")
                    .and_then(Value::as_u64)
                    .map(|l| l as usize),
                function: item
                    .pointer("/elements/0/name")
                    .and_then(Value::as_str)
                    .map(String::from),
            };
            finding.recommendation =
                "Review the static-analysis report and remediate the flagged construct"
                    .to_string();
            finding.threat_score = threat_score(severity_to_cvss(severity), severity);
            finding.attack_vectors = vec!["static-analysis".to_string()];
            finding.confidence = 80;
            finding
        })
        .collect()
}

fn parse_mythril(json: &Value) -> Vec<Finding> {
    let Some(issues) = json.get("issues").and_then(Value::as_array) else {
        return Vec::new();
    };
    issues
        .iter()
        .map(|item| {
            let severity =
                map_external_severity(item.get("severity").and_then(Value::as_str).unwrap_or(""));
            let title = item
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("mythril-issue");
            let mut finding = Finding::new(
                severity,
                ThreatCategory::Vulnerability,
                format!("Symbolic Analysis: {title}"),
                item.get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
            );
            finding.location = FindingLocation {
                file: item
                    .get("filename")
                    .and_then(Value::as_str)
                    .map(String::from),
                line: item
                    .get("lineno")
                    .and_then(Value::as_u64)
                    .map(|l| l as usize),
                function: item
                    .get("function")
                    .and_then(Value::as_str)
                    .map(String::from),
            };
            finding.recommendation =
                "Reproduce the symbolic trace and guard the vulnerable path".to_string();
            finding.threat_score = threat_score(severity_to_cvss(severity), severity);
            finding.attack_vectors = vec!["symbolic-analysis".to_string()];
            finding.confidence = 80;
            finding
        })
        .collect()
}

fn severity_to_cvss(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 9.0,
        Severity::High => 7.5,
        Severity::Medium => 5.5,
        Severity::Low => 3.0,
    }
}

/// Whether `program` resolves to an executable file on PATH.
pub fn tool_available(program: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(program);
        candidate.is_file()
    })
}

/// Whether the staged project contains contract-language sources.
pub fn project_has_contract_sources(project_path: &Path) -> bool {
    WalkDir::new(project_path)
        .max_depth(8)
        .into_iter()
        .filter_map(Result::ok)
        .any(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("sol"))
        })
}

/// A tool is supported for a scan when its executable is installed and the
/// staged project contains sources it can analyze.
pub fn supports(tool: ToolKind, project_path: &Path) -> bool {
    project_has_contract_sources(project_path) && tool_available(tool.executable())
}
