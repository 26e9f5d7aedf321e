//! Multi-phase scan pipeline.
//!
//! A scan walks a fixed state machine: pattern analysis (mandatory), then
//! optional static, symbolic, and deep phases, then risk assessment. Each
//! optional phase is gated by the scan options and by whether the staged
//! project contains sources the analyzer can handle. A failing optional
//! phase contributes no findings and a metadata note; only the pattern
//! phase is fatal. Progress is reported through an optional channel so a
//! caller can render it live.

use crate::behavioral_analyzer;
use crate::external_analyzer::{self, AnalyzerError, ToolKind};
use crate::threat_patterns;
use crate::threat_types::{
    Finding, FindingCounts, ScanResult, Severity, ThreatCategory,
};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Bound on the scan-history map. Oldest results are evicted first.
pub const SCAN_HISTORY_CAPACITY: usize = 1000;

/// Scan depth selected by the caller.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanMode {
    Fast,
    #[default]
    Comprehensive,
    MilitaryGrade,
}

/// Phases of the scan state machine, with their progress percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Init,
    PatternAnalysis,
    StaticAnalysis,
    SymbolicAnalysis,
    DeepAnalysis,
    RiskAssessment,
    Done,
}

impl ScanPhase {
    pub fn percent(self) -> u8 {
        match self {
            ScanPhase::Init => 0,
            ScanPhase::PatternAnalysis => 20,
            ScanPhase::StaticAnalysis => 40,
            ScanPhase::SymbolicAnalysis => 60,
            ScanPhase::DeepAnalysis => 80,
            ScanPhase::RiskAssessment => 90,
            ScanPhase::Done => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScanPhase::Init => "initializing",
            ScanPhase::PatternAnalysis => "pattern analysis",
            ScanPhase::StaticAnalysis => "static analysis",
            ScanPhase::SymbolicAnalysis => "symbolic analysis",
            ScanPhase::DeepAnalysis => "deep analysis",
            ScanPhase::RiskAssessment => "risk assessment",
            ScanPhase::Done => "done",
        }
    }
}

/// Progress event emitted after each completed phase.
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    pub scan_id: String,
    pub phase: &'static str,
    pub percent: u8,
}

/// Caller-supplied rule compiled for a premium scan.
#[derive(Debug, Clone)]
pub struct CustomRule {
    pub id: String,
    pub pattern: Regex,
    pub severity: Severity,
    pub title: String,
}

/// Options controlling which phases run.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub mode: ScanMode,
    pub project_name: Option<String>,
    pub language: Option<String>,
    pub enable_static: bool,
    pub enable_symbolic: bool,
    pub enable_deep: bool,
    pub analyzer_timeout: Duration,
    pub custom_rules: Vec<CustomRule>,
}

impl ScanOptions {
    /// Phase gating per mode: FAST runs only pattern analysis,
    /// COMPREHENSIVE adds static and deep analysis, MILITARY_GRADE adds
    /// symbolic execution.
    pub fn for_mode(mode: ScanMode, analyzer_timeout: Duration) -> Self {
        let (enable_static, enable_symbolic, enable_deep) = match mode {
            ScanMode::Fast => (false, false, false),
            ScanMode::Comprehensive => (true, false, true),
            ScanMode::MilitaryGrade => (true, true, true),
        };
        Self {
            mode,
            project_name: None,
            language: None,
            enable_static,
            enable_symbolic,
            enable_deep,
            analyzer_timeout,
            custom_rules: Vec::new(),
        }
    }
}

/// Scan failures visible to the caller. Optional-phase errors never
/// surface here.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("pattern analysis failed: {reason}")]
    PatternAnalysis { reason: String },

    #[error("failed to stage scan target")]
    Staging(#[from] std::io::Error),
}

struct ScanHistory {
    order: VecDeque<String>,
    results: HashMap<String, ScanResult>,
}

/// Drives scans and owns the bounded scan history plus the cancellation
/// handles of in-flight external analyzers.
pub struct ScanOrchestrator {
    history: RwLock<ScanHistory>,
    /// One cancellation sender per in-flight scan, keyed by scan id, so
    /// shutdown can kill whichever subprocess that scan is running.
    active: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl Default for ScanOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanOrchestrator {
    pub fn new() -> Self {
        Self {
            history: RwLock::new(ScanHistory {
                order: VecDeque::new(),
                results: HashMap::new(),
            }),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Run a full scan of `code` under `options`, reporting progress on
    /// `progress` when supplied.
    pub async fn scan(
        &self,
        code: &str,
        options: ScanOptions,
        progress: Option<mpsc::UnboundedSender<ScanProgress>>,
    ) -> Result<ScanResult, ScanError> {
        let scan_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut findings: Vec<Finding> = Vec::new();
        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("scan_mode".into(), serde_json::json!(options.mode));
        if let Some(name) = &options.project_name {
            metadata.insert("project_name".into(), serde_json::json!(name));
        }

        let report = |phase: ScanPhase| {
            if let Some(tx) = &progress {
                let _ = tx.send(ScanProgress {
                    scan_id: scan_id.clone(),
                    phase: phase.label(),
                    percent: phase.percent(),
                });
            }
        };

        info!(scan_id = %scan_id, mode = ?options.mode, bytes = code.len(), "scan started");

        // Mandatory pattern phase. Failure here aborts the scan.
        findings.extend(self.run_pattern_phase(code, &options)?);
        report(ScanPhase::PatternAnalysis);

        // Stage the code on disk for external analyzers.
        let staged = self.stage_project(code, &options)?;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active
            .lock()
            .await
            .insert(scan_id.clone(), cancel_tx);

        if options.enable_static {
            match self
                .run_tool_phase(ToolKind::Slither, staged.path(), &options, cancel_rx.clone())
                .await
            {
                Ok(Some(tool_findings)) => findings.extend(tool_findings),
                Ok(None) => {
                    metadata.insert(
                        "static_analysis".into(),
                        serde_json::json!("skipped: tool unsupported for this target"),
                    );
                }
                Err(err) => {
                    warn!(scan_id = %scan_id, error = %err, "static analysis degraded");
                    metadata.insert("static_analysis_error".into(), serde_json::json!(err.to_string()));
                }
            }
        }
        report(ScanPhase::StaticAnalysis);

        if options.enable_symbolic {
            match self
                .run_tool_phase(ToolKind::Mythril, staged.path(), &options, cancel_rx.clone())
                .await
            {
                Ok(Some(tool_findings)) => findings.extend(tool_findings),
                Ok(None) => {
                    metadata.insert(
                        "symbolic_analysis".into(),
                        serde_json::json!("skipped: tool unsupported for this target"),
                    );
                }
                Err(err) => {
                    warn!(scan_id = %scan_id, error = %err, "symbolic analysis degraded");
                    metadata.insert(
                        "symbolic_analysis_error".into(),
                        serde_json::json!(err.to_string()),
                    );
                }
            }
        }
        report(ScanPhase::SymbolicAnalysis);

        if options.enable_deep {
            let behavioral = behavioral_analyzer::analyze(code);
            if !behavioral.risk_factors.is_empty() {
                metadata.insert(
                    "risk_factors".into(),
                    serde_json::json!(behavioral.risk_factors),
                );
            }
            findings.extend(behavioral.findings);
        }
        report(ScanPhase::DeepAnalysis);

        self.active.lock().await.remove(&scan_id);

        // Risk assessment over everything the phases accumulated.
        let counts = FindingCounts::tally(&findings);
        let result = ScanResult {
            scan_id: scan_id.clone(),
            timestamp: Utc::now(),
            status: counts.status(),
            overall_score: counts.overall_score(),
            findings,
            files_scanned: staged.files_written,
            duration_ms: started.elapsed().as_millis() as u64,
            risk_level: counts.risk_level(),
            compliance: counts.compliance(),
            metadata,
        };
        report(ScanPhase::RiskAssessment);

        self.store(result.clone()).await;
        report(ScanPhase::Done);

        crate::metrics::SCANS_TOTAL
            .with_label_values(&[
                match result.status {
                    crate::threat_types::ScanStatus::Pass => "pass",
                    crate::threat_types::ScanStatus::Review => "review",
                    crate::threat_types::ScanStatus::Fail => "fail",
                    crate::threat_types::ScanStatus::Inconclusive => "inconclusive",
                },
            ])
            .inc();
        crate::metrics::SCAN_DURATION_SECONDS.observe(result.duration_ms as f64 / 1000.0);
        info!(scan_id = %scan_id, status = ?result.status, score = result.overall_score,
              findings = result.findings.len(), "scan finished");

        Ok(result)
    }

    fn run_pattern_phase(
        &self,
        code: &str,
        options: &ScanOptions,
    ) -> Result<Vec<Finding>, ScanError> {
        if code.is_empty() {
            return Err(ScanError::PatternAnalysis {
                reason: "empty scan target".to_string(),
            });
        }
        let mut findings = threat_patterns::detect(code);
        for rule in &options.custom_rules {
            for m in rule.pattern.find_iter(code) {
                let mut finding = Finding::new(
                    rule.severity,
                    ThreatCategory::PolicyViolation,
                    rule.title.clone(),
                    format!("custom rule `{}` matched", rule.id),
                );
                finding.evidence = vec![m.as_str().chars().take(120).collect()];
                finding.location.line =
                    Some(code[..m.start()].bytes().filter(|b| *b == b'\n').count() + 1);
                finding.threat_score = crate::threat_types::threat_score(5.0, rule.severity);
                findings.push(finding);
            }
        }
        Ok(findings)
    }

    /// Returns Ok(None) when the tool is not supported for this target.
    async fn run_tool_phase(
        &self,
        tool: ToolKind,
        project_path: &std::path::Path,
        options: &ScanOptions,
        cancel: watch::Receiver<bool>,
    ) -> Result<Option<Vec<Finding>>, AnalyzerError> {
        if !external_analyzer::supports(tool, project_path) {
            return Ok(None);
        }
        let output =
            external_analyzer::run(tool, project_path, options.analyzer_timeout, cancel).await?;
        if let Some(raw) = &output.raw {
            warn!(tool = %output.tool, bytes = raw.len(), "analyzer output was not parseable JSON");
        }
        Ok(Some(output.findings))
    }

    fn stage_project(&self, code: &str, options: &ScanOptions) -> Result<StagedProject, ScanError> {
        let dir = tempfile::tempdir()?;
        let extension = match options.language.as_deref() {
            Some("solidity") => "sol",
            Some("python") => "py",
            Some("rust") => "rs",
            Some("typescript") => "ts",
            _ => "js",
        };
        std::fs::write(dir.path().join(format!("target.{extension}")), code)?;
        Ok(StagedProject {
            dir,
            files_written: 1,
        })
    }

    async fn store(&self, result: ScanResult) {
        let mut history = self.history.write().await;
        if history.order.len() >= SCAN_HISTORY_CAPACITY {
            if let Some(evicted) = history.order.pop_front() {
                history.results.remove(&evicted);
            }
        }
        history.order.push_back(result.scan_id.clone());
        history.results.insert(result.scan_id.clone(), result);
    }

    /// Look up a completed scan by id.
    pub async fn result(&self, scan_id: &str) -> Option<ScanResult> {
        self.history.read().await.results.get(scan_id).cloned()
    }

    /// Most recent completed scans, newest first.
    pub async fn recent_results(&self, limit: usize) -> Vec<ScanResult> {
        let history = self.history.read().await;
        history
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| history.results.get(id).cloned())
            .collect()
    }

    /// Kill every in-flight external analyzer. Called on shutdown signals.
    pub async fn cancel_active_analyzers(&self) {
        let active = self.active.lock().await;
        for (scan_id, cancel) in active.iter() {
            info!(scan_id = %scan_id, "cancelling in-flight analyzer");
            let _ = cancel.send(true);
        }
    }
}

struct StagedProject {
    dir: tempfile::TempDir,
    files_written: u32,
}

impl StagedProject {
    fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}
