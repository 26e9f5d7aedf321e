//! HTTP handlers for the scanning and security API.
//!
//! Every route is gated through the zero-trust engine before its own logic
//! runs; denials surface as 403 responses carrying a machine-readable
//! reason code.

use crate::errors::AppError;
use crate::models::{
    BusinessImpact, ComplianceReport, DashboardMetrics, FeedQuery, FortressSummary,
    HealthResponse, IntelSummary, MonitorConfig, MonitorRequest, MonitorResponse,
    PremiumScanRequest, PremiumScanResponse, PricingInfo, RemediationItem, ScanRequest,
    ScanSummaryResponse, TrafficStats,
};
use crate::scan_orchestrator::ScanOptions;
use crate::security_logging::{SecurityEventType, SecuritySeverity};
use crate::threat_correlation;
use crate::threat_types::{FindingCounts, RiskLevel, ScanResult, ThreatAssessment};
use crate::validation;
use crate::zero_trust::{DenyReason, InboundRequest, SecurityContext};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, Uri},
    Json,
};
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const FREE_TIER_RECOMMENDATION_CAP: usize = 3;

fn inbound_request(method: &Method, uri: &Uri, headers: &HeaderMap) -> InboundRequest {
    let mut header_map = std::collections::HashMap::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            header_map.insert(name.as_str().to_ascii_lowercase(), v.to_string());
        }
    }

    let ip = header_map
        .get("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| header_map.get("x-real-ip").cloned())
        .unwrap_or_else(|| "unknown".to_string());

    let authenticated = header_map
        .get("authorization")
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);
    let mfa_verified = header_map
        .get("x-mfa-verified")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    InboundRequest {
        ip,
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: header_map,
        body_excerpt: None,
        authenticated,
        mfa_verified,
    }
}

/// Evaluate the request against the zero-trust engine. Denials for attack
/// patterns and quarantined sources also notify registered monitors.
fn gate(
    state: &Arc<AppState>,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<SecurityContext, AppError> {
    let request = inbound_request(method, uri, headers);
    match state.engine.evaluate(&request) {
        Ok(context) => Ok(context),
        Err(denied) => {
            if matches!(
                denied.reason,
                DenyReason::AttackPatternDetected | DenyReason::IpQuarantined
            ) {
                notify_monitors(
                    state,
                    100,
                    serde_json::json!({
                        "event": "access_denied",
                        "reason": denied.reason.code(),
                        "requestId": denied.request_id,
                        "sourceIp": request.ip,
                        "endpoint": request.path,
                        "timestamp": Utc::now(),
                    }),
                );
            }
            Err(denied.into())
        }
    }
}

/// Fire-and-forget webhook delivery to every monitor whose threshold the
/// risk score meets.
fn notify_monitors(state: &Arc<AppState>, risk_score: u8, payload: serde_json::Value) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        let monitors: Vec<MonitorConfig> = {
            let registry = state.monitors.read().await;
            registry
                .values()
                .filter(|m| risk_score >= m.min_risk_score)
                .cloned()
                .collect()
        };
        for monitor in monitors {
            let mut body = payload.clone();
            if let Some(map) = body.as_object_mut() {
                map.insert("monitorId".into(), serde_json::json!(monitor.monitor_id));
                map.insert(
                    "applicationId".into(),
                    serde_json::json!(monitor.application_id),
                );
            }
            if let Err(err) = state.http.post(&monitor.webhook_url).json(&body).send().await {
                warn!(monitor_id = %monitor.monitor_id, error = %err,
                      "monitor webhook delivery failed");
            }
        }
    });
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

pub async fn scan(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanSummaryResponse>, AppError> {
    gate(&state, &method, &uri, &headers)?;
    validation::validate_scan_request(&request, state.config.max_code_bytes)?;

    let mut options = ScanOptions::for_mode(
        request.scan_mode.unwrap_or_default(),
        state.config.analyzer_timeout,
    );
    options.project_name = request.project_name.clone();
    options.language = request.language.clone();

    let result = state.orchestrator.scan(&request.code, options, None).await?;
    let intel_hits = state.intel.matches_in_text(&request.code).await;
    let assessment = threat_correlation::assess(&result, intel_hits);
    alert_on_assessment(&state, &result, &assessment);

    let mut recommendations = assessment.recommendations;
    recommendations.truncate(FREE_TIER_RECOMMENDATION_CAP);

    Ok(Json(ScanSummaryResponse {
        scan_id: result.scan_id.clone(),
        status: result.status,
        overall_score: result.overall_score,
        risk_level: result.risk_level,
        fortress: FortressSummary {
            threats_found: result.findings.len(),
            scan_duration_ms: result.duration_ms,
            files_scanned: result.files_scanned,
            compliance: result.compliance,
        },
        threat_intelligence: IntelSummary {
            risk_score: assessment.risk_score,
            threats_detected: assessment.matched_intel.len(),
            recommendations,
        },
        pricing: PricingInfo {
            tier: "free",
            upgrade_url: "/pricing",
        },
        limitations: vec![
            "finding details are truncated on the free tier",
            "custom rules require a premium subscription",
            "remediation plans require a premium subscription",
        ],
        upgrade_prompt: "Upgrade to premium for full findings, custom rules, and remediation plans",
    }))
}

pub async fn scan_premium(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<PremiumScanRequest>,
) -> Result<Json<PremiumScanResponse>, AppError> {
    gate(&state, &method, &uri, &headers)?;
    if !headers.contains_key("authorization") {
        return Err(AppError::Unauthorized);
    }
    let tier = headers
        .get("x-subscription-tier")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !tier.eq_ignore_ascii_case("premium") {
        return Err(AppError::PremiumRequired);
    }

    let custom_rules =
        validation::validate_premium_request(&request, state.config.max_premium_code_bytes)?;

    let mut options = ScanOptions::for_mode(
        request.scan_mode.unwrap_or_default(),
        state.config.analyzer_timeout,
    );
    options.project_name = request.project_name.clone();
    options.language = request.language.clone();
    options.custom_rules = custom_rules;

    let result = state.orchestrator.scan(&request.code, options, None).await?;
    let intel_hits = state.intel.matches_in_text(&request.code).await;
    let assessment = threat_correlation::assess(&result, intel_hits);
    alert_on_assessment(&state, &result, &assessment);

    let remediation_plan = if request.include_remediation.unwrap_or(true) {
        Some(remediation_plan(&result))
    } else {
        None
    };

    Ok(Json(PremiumScanResponse {
        business_impact: business_impact(&result),
        compliance_mapping: result.compliance,
        assessment,
        remediation_plan,
        scan: result,
    }))
}

fn alert_on_assessment(state: &Arc<AppState>, result: &ScanResult, assessment: &ThreatAssessment) {
    notify_monitors(
        state,
        assessment.risk_score,
        serde_json::json!({
            "event": "scan_alert",
            "scanId": result.scan_id,
            "riskScore": assessment.risk_score,
            "status": result.status,
            "timestamp": Utc::now(),
        }),
    );
}

/// Findings ordered most severe first, each with a remediation priority.
fn remediation_plan(result: &ScanResult) -> Vec<RemediationItem> {
    let mut findings = result.findings.clone();
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));
    findings
        .into_iter()
        .enumerate()
        .map(|(i, finding)| RemediationItem {
            finding_id: finding.id,
            title: finding.title,
            severity: finding.severity,
            recommendation: finding.recommendation,
            priority: i + 1,
        })
        .collect()
}

fn business_impact(result: &ScanResult) -> BusinessImpact {
    let counts = FindingCounts::tally(&result.findings);
    let hours = (4 * counts.critical + 2 * counts.high + counts.medium) as u32;
    let exposure = 250_000 * counts.critical as u64
        + 75_000 * counts.high as u64
        + 10_000 * counts.medium as u64;
    let likelihood = match result.risk_level {
        RiskLevel::Critical | RiskLevel::High => "high",
        RiskLevel::Medium => "moderate",
        RiskLevel::Low | RiskLevel::Minimal => "low",
    };
    BusinessImpact {
        estimated_remediation_hours: hours,
        estimated_exposure_usd: exposure,
        breach_likelihood: likelihood,
    }
}

pub async fn scan_result(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(scan_id): Path<String>,
) -> Result<Json<ScanResult>, AppError> {
    gate(&state, &method, &uri, &headers)?;
    state
        .orchestrator
        .result(&scan_id)
        .await
        .map(Json)
        .ok_or(AppError::ScanNotFound { scan_id })
}

pub async fn threats_feed(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    gate(&state, &method, &uri, &headers)?;
    let limit = validation::validate_feed_query(&query)?;
    let records = state
        .intel
        .recent(limit, query.severity, query.threat_type)
        .await;
    let statistics = state.intel.statistics().await;
    let count = records.len();
    Ok(Json(serde_json::json!({
        "threats": records,
        "count": count,
        "statistics": statistics,
    })))
}

pub async fn register_monitor(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<MonitorRequest>,
) -> Result<Json<MonitorResponse>, AppError> {
    gate(&state, &method, &uri, &headers)?;
    validation::validate_monitor_request(&request)?;

    let monitor = MonitorConfig {
        monitor_id: Uuid::new_v4().to_string(),
        application_id: request.application_id,
        webhook_url: request.webhook_url,
        min_risk_score: request
            .alert_thresholds
            .and_then(|t| t.min_risk_score)
            .unwrap_or(70),
    };
    let monitor_id = monitor.monitor_id.clone();
    state
        .monitors
        .write()
        .await
        .insert(monitor_id.clone(), monitor);

    Ok(Json(MonitorResponse {
        monitor_id,
        status: "active",
    }))
}

const COMPLIANCE_SCAN_SAMPLE: usize = 50;

pub async fn compliance_report(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(framework): Path<String>,
) -> Result<Json<ComplianceReport>, AppError> {
    gate(&state, &method, &uri, &headers)?;

    let framework = framework.to_ascii_lowercase();
    let scans = state.orchestrator.recent_results(COMPLIANCE_SCAN_SAMPLE).await;

    let compliant = |scan: &ScanResult| -> bool {
        let counts = FindingCounts::tally(&scan.findings);
        match framework.as_str() {
            "nist" => scan.compliance.nist,
            "iso27001" => scan.compliance.iso27001,
            "owasp" => scan.compliance.owasp,
            "pci-dss" => counts.critical == 0 && counts.high == 0,
            "sox" => counts.critical == 0,
            "gdpr" => counts.critical == 0 && counts.high <= 2,
            _ => false,
        }
    };
    if !matches!(
        framework.as_str(),
        "nist" | "iso27001" | "owasp" | "pci-dss" | "sox" | "gdpr"
    ) {
        return Err(AppError::UnsupportedFramework { framework });
    }

    let total = scans.len();
    let passing = scans.iter().filter(|s| compliant(s)).count();
    let score = if total == 0 {
        100
    } else {
        ((passing * 100) / total) as u8
    };
    let gaps: Vec<String> = scans
        .iter()
        .filter(|s| !compliant(s))
        .take(10)
        .map(|s| format!("scan {} does not meet {framework} requirements", s.scan_id))
        .collect();
    let status = match score {
        100 => "compliant",
        60..=99 => "partially_compliant",
        _ => "non_compliant",
    };

    Ok(Json(ComplianceReport {
        framework,
        score,
        status,
        gaps,
        evaluated_at: Utc::now(),
        scans_considered: total,
    }))
}

pub async fn dashboard_metrics(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<DashboardMetrics>, AppError> {
    gate(&state, &method, &uri, &headers)?;

    let events = state.logger.last_hour();
    let threats_blocked = events
        .iter()
        .filter(|e| {
            matches!(
                e.event_type,
                SecurityEventType::AttackDetected
                    | SecurityEventType::AccessDenied
                    | SecurityEventType::RateLimitExceeded
            )
        })
        .count();
    let active_threats = events
        .iter()
        .filter(|e| matches!(e.severity, SecuritySeverity::Critical))
        .count();
    let quarantined_ips = state.engine.quarantined().len();

    let pressure = (2 * threats_blocked + 10 * active_threats).min(100) as u8;
    let overall_score = 100 - pressure;
    let status = match overall_score {
        80..=100 => "protected",
        50..=79 => "elevated",
        _ => "under_attack",
    };

    // Simulated traffic baseline; the engine does not sit in the data path
    // of the protected applications.
    let mut rng = rand::thread_rng();
    let traffic = TrafficStats {
        requests_per_minute: rng.gen_range(800..1200),
        unique_clients: rng.gen_range(100..300),
        blocked_requests: threats_blocked as u64,
    };

    Ok(Json(DashboardMetrics {
        overall_score,
        status,
        risk_level: RiskLevel::from_risk_score(pressure),
        threats_blocked,
        active_threats,
        quarantined_ips,
        traffic,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threat_types::{Finding, Severity, ThreatCategory};

    fn finding(severity: Severity) -> Finding {
        Finding::new(severity, ThreatCategory::Vulnerability, "Test finding", "test")
    }

    fn scan_with(findings: Vec<Finding>) -> ScanResult {
        let counts = FindingCounts::tally(&findings);
        ScanResult {
            scan_id: "scan-1".to_string(),
            timestamp: Utc::now(),
            status: counts.status(),
            overall_score: counts.overall_score(),
            findings,
            files_scanned: 1,
            duration_ms: 5,
            risk_level: counts.risk_level(),
            compliance: counts.compliance(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn remediation_plan_orders_by_severity() {
        let result = scan_with(vec![
            finding(Severity::Low),
            finding(Severity::Critical),
            finding(Severity::High),
        ]);
        let plan = remediation_plan(&result);
        assert_eq!(plan[0].severity, Severity::Critical);
        assert_eq!(plan[0].priority, 1);
        assert_eq!(plan[1].severity, Severity::High);
        assert_eq!(plan[2].severity, Severity::Low);
    }

    #[test]
    fn business_impact_scales_with_severity() {
        let result = scan_with(vec![finding(Severity::Critical), finding(Severity::High)]);
        let impact = business_impact(&result);
        assert_eq!(impact.estimated_remediation_hours, 6);
        assert_eq!(impact.estimated_exposure_usd, 325_000);
        assert_eq!(impact.breach_likelihood, "high");
    }

    #[test]
    fn inbound_request_extracts_forwarded_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        headers.insert("authorization", "Bearer token".parse().unwrap());
        let uri: Uri = "/api/v1/scan?x=1".parse().unwrap();
        let request = inbound_request(&Method::POST, &uri, &headers);
        assert_eq!(request.ip, "203.0.113.9");
        assert_eq!(request.path, "/api/v1/scan");
        assert_eq!(request.query.as_deref(), Some("x=1"));
        assert!(request.authenticated);
        assert!(!request.mfa_verified);
    }

    #[test]
    fn inbound_request_defaults_to_unknown_ip() {
        let uri: Uri = "/health".parse().unwrap();
        let request = inbound_request(&Method::GET, &uri, &HeaderMap::new());
        assert_eq!(request.ip, "unknown");
        assert!(!request.authenticated);
    }
}
