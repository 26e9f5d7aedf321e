//! Request and response shapes for the JSON API.

use crate::scan_orchestrator::ScanMode;
use crate::threat_types::{
    ComplianceStatus, RiskLevel, ScanResult, ScanStatus, Severity, ThreatAssessment, ThreatType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub code: String,
    #[serde(default)]
    pub scan_mode: Option<ScanMode>,
    pub project_name: Option<String>,
    pub language: Option<String>,
}

/// Caller-supplied rule for premium scans, compiled during validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRuleSpec {
    pub id: String,
    pub pattern: String,
    pub severity: Option<Severity>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumScanRequest {
    pub code: String,
    #[serde(default)]
    pub scan_mode: Option<ScanMode>,
    pub project_name: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub include_remediation: Option<bool>,
    #[serde(default)]
    pub generate_report: Option<bool>,
    #[serde(default)]
    pub custom_rules: Option<Vec<CustomRuleSpec>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FortressSummary {
    pub threats_found: usize,
    pub scan_duration_ms: u64,
    pub files_scanned: u32,
    pub compliance: ComplianceStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelSummary {
    pub risk_score: u8,
    pub threats_detected: usize,
    /// Capped at three entries on the free tier.
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingInfo {
    pub tier: &'static str,
    pub upgrade_url: &'static str,
}

/// Free-tier scan response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummaryResponse {
    pub scan_id: String,
    pub status: ScanStatus,
    pub overall_score: u8,
    pub risk_level: RiskLevel,
    pub fortress: FortressSummary,
    pub threat_intelligence: IntelSummary,
    pub pricing: PricingInfo,
    pub limitations: Vec<&'static str>,
    pub upgrade_prompt: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationItem {
    pub finding_id: String,
    pub title: String,
    pub severity: Severity,
    pub recommendation: String,
    /// 1 is most urgent.
    pub priority: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessImpact {
    pub estimated_remediation_hours: u32,
    pub estimated_exposure_usd: u64,
    pub breach_likelihood: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumScanResponse {
    pub scan: ScanResult,
    pub assessment: ThreatAssessment,
    pub remediation_plan: Option<Vec<RemediationItem>>,
    pub compliance_mapping: ComplianceStatus,
    pub business_impact: BusinessImpact,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<usize>,
    pub severity: Option<Severity>,
    #[serde(rename = "type")]
    pub threat_type: Option<ThreatType>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertThresholds {
    pub min_risk_score: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRequest {
    pub application_id: String,
    pub webhook_url: String,
    #[serde(default)]
    pub alert_thresholds: Option<AlertThresholds>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResponse {
    pub monitor_id: String,
    pub status: &'static str,
}

/// Registered monitor, kept in application state.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub monitor_id: String,
    pub application_id: String,
    pub webhook_url: String,
    pub min_risk_score: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub framework: String,
    pub score: u8,
    pub status: &'static str,
    pub gaps: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
    pub scans_considered: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficStats {
    pub requests_per_minute: u64,
    pub unique_clients: u64,
    pub blocked_requests: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub overall_score: u8,
    pub status: &'static str,
    pub risk_level: RiskLevel,
    pub threats_blocked: usize,
    pub active_threats: usize,
    pub quarantined_ips: usize,
    pub traffic: TrafficStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}
