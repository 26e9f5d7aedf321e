//! Core threat domain types shared by the scanners, the zero-trust engine,
//! and the correlation layer.
//!
//! Everything that crosses a module boundary lives here: findings, scan
//! results, threat-intelligence records, and the deterministic scoring rules
//! derived from finding-severity counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity assigned to a finding or threat-intelligence record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Multiplier applied to the CVSS-derived base when computing a
    /// finding's threat score.
    pub fn multiplier(self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.8,
            Severity::Medium => 0.6,
            Severity::Low => 0.4,
        }
    }

    /// Weight used by the correlation engine when aggregating threats.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Critical => 25.0,
            Severity::High => 15.0,
            Severity::Medium => 8.0,
            Severity::Low => 3.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// Category of a detected issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    Vulnerability,
    Malware,
    Suspicious,
    PolicyViolation,
}

impl ThreatCategory {
    /// Type weight applied when a finding (rather than an intel record)
    /// contributes to an aggregated risk score.
    pub fn weight(self) -> f64 {
        match self {
            ThreatCategory::Malware => 1.2,
            ThreatCategory::Vulnerability => 1.1,
            ThreatCategory::Suspicious => 1.0,
            ThreatCategory::PolicyViolation => 0.9,
        }
    }
}

/// Best-effort source location for a finding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FindingLocation {
    pub file: Option<String>,
    pub line: Option<usize>,
    pub function: Option<String>,
}

/// One detected issue from any detector, normalized to a common shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub category: ThreatCategory,
    pub title: String,
    pub description: String,
    pub evidence: Vec<String>,
    pub location: FindingLocation,
    pub recommendation: String,
    /// Normalized threat score in [0, 100].
    pub threat_score: u8,
    pub cvss: Option<f64>,
    pub attack_vectors: Vec<String>,
    pub mitigation_steps: Vec<String>,
    /// Detector confidence in [0, 100].
    pub confidence: u8,
}

impl Finding {
    pub fn new(
        severity: Severity,
        category: ThreatCategory,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            severity,
            category,
            title: title.into(),
            description: description.into(),
            evidence: Vec::new(),
            location: FindingLocation::default(),
            recommendation: String::new(),
            threat_score: 0,
            cvss: None,
            attack_vectors: Vec::new(),
            mitigation_steps: Vec::new(),
            confidence: 100,
        }
    }
}

/// Compute a finding threat score from a CVSS estimate and severity.
pub fn threat_score(cvss: f64, severity: Severity) -> u8 {
    let base = (cvss * 10.0).min(100.0);
    (base * severity.multiplier()).round().clamp(0.0, 100.0) as u8
}

/// Final verdict of a scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Pass,
    Review,
    Fail,
    Inconclusive,
}

/// Risk tier shared by scan verdicts and per-request threat levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a [0, 100] risk score onto the fixed tier bands.
    pub fn from_risk_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => RiskLevel::Critical,
            60..=79 => RiskLevel::High,
            40..=59 => RiskLevel::Medium,
            20..=39 => RiskLevel::Low,
            _ => RiskLevel::Minimal,
        }
    }
}

/// Per-framework compliance flags derived from finding-severity counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComplianceStatus {
    pub nist: bool,
    pub iso27001: bool,
    pub owasp: bool,
}

/// Finding counts by severity, the sole input to the scoring rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindingCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl FindingCounts {
    pub fn tally(findings: &[Finding]) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            match finding.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
        }
        counts
    }

    /// Aggregate score: 100 − 25c − 15h − 8m − 3l, clamped to [0, 100].
    pub fn overall_score(&self) -> u8 {
        let deduction = 25 * self.critical as i64
            + 15 * self.high as i64
            + 8 * self.medium as i64
            + 3 * self.low as i64;
        (100 - deduction).clamp(0, 100) as u8
    }

    /// Verdict derivation, evaluated in priority order. Total over all
    /// count combinations.
    pub fn status(&self) -> ScanStatus {
        if self.critical > 0 {
            ScanStatus::Fail
        } else if self.high > 0 {
            ScanStatus::Fail
        } else if self.medium > 3 || (self.medium > 0 && self.high > 0) {
            ScanStatus::Inconclusive
        } else if self.medium > 0 || self.low > 5 {
            ScanStatus::Review
        } else {
            ScanStatus::Pass
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        if self.critical > 0 {
            RiskLevel::Critical
        } else if self.high > 0 {
            RiskLevel::High
        } else if self.medium > 0 {
            RiskLevel::Medium
        } else if self.low > 0 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    /// NIST: zero critical and zero high. ISO 27001: at most one high.
    /// OWASP: at most two medium. All frameworks require zero critical.
    pub fn compliance(&self) -> ComplianceStatus {
        ComplianceStatus {
            nist: self.critical == 0 && self.high == 0,
            iso27001: self.critical == 0 && self.high <= 1,
            owasp: self.critical == 0 && self.medium <= 2,
        }
    }
}

/// Completed scan output kept in the bounded scan history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub scan_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: ScanStatus,
    pub overall_score: u8,
    pub findings: Vec<Finding>,
    pub files_scanned: u32,
    pub duration_ms: u64,
    pub risk_level: RiskLevel,
    pub compliance: ComplianceStatus,
    /// Raw external-tool metadata and degraded-phase notes.
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Classification of a threat-intelligence record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ThreatType {
    Malware,
    Scam,
    Phishing,
    Rugpull,
    Exploit,
    Apt,
}

impl ThreatType {
    /// Weight applied to an intel record's contribution during correlation.
    pub fn weight(self) -> f64 {
        match self {
            ThreatType::Apt => 1.3,
            ThreatType::Malware => 1.2,
            ThreatType::Exploit => 1.1,
            ThreatType::Rugpull => 1.1,
            ThreatType::Scam => 1.0,
            ThreatType::Phishing => 0.9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThreatType::Malware => "malware",
            ThreatType::Scam => "scam",
            ThreatType::Phishing => "phishing",
            ThreatType::Rugpull => "rugpull",
            ThreatType::Exploit => "exploit",
            ThreatType::Apt => "apt",
        }
    }
}

/// Indicator sets attached to a threat-intelligence record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThreatIndicators {
    pub addresses: Vec<String>,
    pub domains: Vec<String>,
    pub file_hashes: Vec<String>,
    /// Regex source patterns matched against scanned content.
    pub patterns: Vec<String>,
    pub ips: Vec<String>,
}

/// A cataloged known-bad indicator set, independent of any single scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThreatIntelligence {
    pub id: String,
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub indicators: ThreatIndicators,
    pub description: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Source confidence in [0, 100].
    pub confidence: u8,
    pub source: String,
    pub tags: Vec<String>,
    pub attribution: Option<String>,
}

/// Indicator summary attached to a threat assessment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSummary {
    pub suspicious_patterns: Vec<String>,
    pub known_bad_actors: Vec<String>,
    pub risk_factors: Vec<String>,
}

/// Aggregated verdict produced by the threat correlator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAssessment {
    pub risk_score: u8,
    pub matched_intel: Vec<ThreatIntelligence>,
    pub findings: Vec<Finding>,
    pub indicators: IndicatorSummary,
    pub recommendations: Vec<String>,
    pub automated_actions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threat_score_formula() {
        // Critical at CVSS 9.1: min(100, 91) * 1.0
        assert_eq!(threat_score(9.1, Severity::Critical), 91);
        // High at CVSS 7.0: 70 * 0.8
        assert_eq!(threat_score(7.0, Severity::High), 56);
        // CVSS cap: 10.0 maps to 100 before the multiplier
        assert_eq!(threat_score(12.0, Severity::Critical), 100);
        assert_eq!(threat_score(5.0, Severity::Low), 20);
    }

    #[test]
    fn status_priority_order() {
        let case = |critical, high, medium, low| FindingCounts {
            critical,
            high,
            medium,
            low,
        };
        assert_eq!(case(1, 0, 0, 0).status(), ScanStatus::Fail);
        assert_eq!(case(1, 5, 9, 9).status(), ScanStatus::Fail);
        assert_eq!(case(0, 1, 0, 0).status(), ScanStatus::Fail);
        assert_eq!(case(0, 0, 4, 0).status(), ScanStatus::Inconclusive);
        assert_eq!(case(0, 0, 1, 0).status(), ScanStatus::Review);
        assert_eq!(case(0, 0, 0, 6).status(), ScanStatus::Review);
        assert_eq!(case(0, 0, 0, 5).status(), ScanStatus::Pass);
        assert_eq!(case(0, 0, 0, 0).status(), ScanStatus::Pass);
    }

    #[test]
    fn overall_score_clamps() {
        let counts = FindingCounts {
            critical: 5,
            high: 0,
            medium: 0,
            low: 0,
        };
        assert_eq!(counts.overall_score(), 0);
        assert_eq!(FindingCounts::default().overall_score(), 100);
        let mixed = FindingCounts {
            critical: 1,
            high: 1,
            medium: 0,
            low: 0,
        };
        assert_eq!(mixed.overall_score(), 60);
    }

    #[test]
    fn compliance_thresholds() {
        let clean = FindingCounts::default().compliance();
        assert!(clean.nist && clean.iso27001 && clean.owasp);

        let one_high = FindingCounts {
            high: 1,
            ..Default::default()
        }
        .compliance();
        assert!(!one_high.nist);
        assert!(one_high.iso27001);

        let three_medium = FindingCounts {
            medium: 3,
            ..Default::default()
        }
        .compliance();
        assert!(!three_medium.owasp);

        let critical = FindingCounts {
            critical: 1,
            ..Default::default()
        }
        .compliance();
        assert!(!critical.nist && !critical.iso27001 && !critical.owasp);
    }

    #[test]
    fn risk_level_bands() {
        assert_eq!(RiskLevel::from_risk_score(100), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_risk_score(80), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_risk_score(79), RiskLevel::High);
        assert_eq!(RiskLevel::from_risk_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_risk_score(40), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_risk_score(20), RiskLevel::Low);
        assert_eq!(RiskLevel::from_risk_score(19), RiskLevel::Minimal);
        assert_eq!(RiskLevel::from_risk_score(0), RiskLevel::Minimal);
    }
}
