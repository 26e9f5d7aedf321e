//! Cross-module scenarios: the zero-trust engine, the scan pipeline, the
//! intelligence store, and the correlator working together.

use fortress_security::scan_orchestrator::{ScanMode, ScanOptions, ScanOrchestrator};
use fortress_security::security_logging::{SecurityEventType, SecurityLogger};
use fortress_security::threat_correlation;
use fortress_security::threat_intelligence::ThreatIntelStore;
use fortress_security::threat_types::{ScanStatus, ThreatType};
use fortress_security::zero_trust::{
    DenyReason, InboundRequest, ZeroTrustConfig, ZeroTrustEngine,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn engine() -> (ZeroTrustEngine, Arc<SecurityLogger>) {
    let logger = Arc::new(SecurityLogger::default());
    (
        ZeroTrustEngine::new(ZeroTrustConfig::default(), Arc::clone(&logger)),
        logger,
    )
}

fn request(ip: &str, path: &str, query: Option<&str>) -> InboundRequest {
    let mut headers = HashMap::new();
    headers.insert(
        "user-agent".to_string(),
        "Mozilla/5.0 (integration)".to_string(),
    );
    InboundRequest {
        ip: ip.to_string(),
        method: "GET".to_string(),
        path: path.to_string(),
        query: query.map(str::to_string),
        headers,
        body_excerpt: None,
        authenticated: false,
        mfa_verified: false,
    }
}

#[test]
fn traversal_attack_quarantines_the_source() {
    let (engine, logger) = engine();
    let probe = request("198.51.100.7", "/files", Some("file=../../etc/passwd"));

    // The traversal rule quarantines without blocking, so the probing
    // request itself still passes.
    let context = engine.evaluate(&probe).expect("first request passes");
    assert!(context.risk_score >= 30);
    assert!(engine.is_quarantined("198.51.100.7"));

    let denied = engine
        .evaluate(&request("198.51.100.7", "/files", None))
        .unwrap_err();
    assert_eq!(denied.reason, DenyReason::IpQuarantined);

    // The attack left an audit trail with the responses taken.
    let events = logger.last_hour();
    assert!(events
        .iter()
        .any(|e| matches!(e.event_type, SecurityEventType::AttackDetected)
            && e.responses.iter().any(|r| r == "quarantine_ip")));

    // Operator release restores access.
    assert!(engine.release_quarantine("198.51.100.7"));
    // The browser fingerprint was quarantined alongside the address.
    for key in engine.quarantined() {
        engine.release_quarantine(&key);
    }
    assert!(engine.evaluate(&request("198.51.100.7", "/files", None)).is_ok());
}

#[test]
fn sql_injection_in_query_blocks_immediately() {
    let (engine, _logger) = engine();
    let attack = request(
        "198.51.100.8",
        "/search",
        Some("q=1 UNION SELECT password FROM users"),
    );
    let denied = engine.evaluate(&attack).unwrap_err();
    assert_eq!(denied.reason, DenyReason::AttackPatternDetected);
}

#[tokio::test]
async fn scan_and_correlate_known_malware_loader() {
    let orchestrator = ScanOrchestrator::new();
    let intel = ThreatIntelStore::new();

    // Obfuscated loader: pattern detectors and the intel catalog both hit.
    let code = r#"
        const payload = "ZXZpbA==";
        eval(atob(payload));
    "#;
    let options = ScanOptions::for_mode(ScanMode::Fast, Duration::from_secs(1));
    let scan = orchestrator.scan(code, options, None).await.unwrap();
    assert_ne!(scan.status, ScanStatus::Pass);

    let hits = intel.matches_in_text(code).await;
    assert!(hits.iter().any(|h| h.threat_type == ThreatType::Malware));

    let assessment = threat_correlation::assess(&scan, hits);
    assert!(assessment.risk_score > 0);
    assert!(!assessment.matched_intel.is_empty());
    assert!(assessment
        .indicators
        .risk_factors
        .iter()
        .any(|f| f == "known-threat:malware"));
    assert!(assessment
        .automated_actions
        .iter()
        .any(|a| a.contains("logging")));
}

#[tokio::test]
async fn comprehensive_scan_reports_every_phase() {
    let orchestrator = ScanOrchestrator::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let options = ScanOptions::for_mode(ScanMode::Comprehensive, Duration::from_secs(1));

    let scan = orchestrator
        .scan("fn main() {}", options, Some(tx))
        .await
        .unwrap();
    assert_eq!(scan.status, ScanStatus::Pass);

    let mut percents = Vec::new();
    while let Ok(progress) = rx.try_recv() {
        percents.push(progress.percent);
    }
    assert_eq!(percents, vec![20, 40, 60, 80, 90, 100]);
}

#[tokio::test]
async fn scan_history_feeds_lookup() {
    let orchestrator = ScanOrchestrator::new();
    let options = ScanOptions::for_mode(ScanMode::Fast, Duration::from_secs(1));
    let scan = orchestrator
        .scan("DROP TABLE accounts;", options, None)
        .await
        .unwrap();

    let stored = orchestrator.result(&scan.scan_id).await.unwrap();
    assert_eq!(stored.overall_score, scan.overall_score);
    assert_eq!(stored.status, ScanStatus::Fail);

    let recent = orchestrator.recent_results(10).await;
    assert_eq!(recent[0].scan_id, scan.scan_id);
}

#[tokio::test]
async fn operator_intel_survives_refresh_and_matches_scans() {
    let intel = ThreatIntelStore::new();
    let mut record = intel.snapshot().await.into_iter().next().unwrap();
    record.id = "operator-custom-1".to_string();
    record.source = "operator".to_string();
    record.indicators.patterns = vec![r"stealDough\s*\(".to_string()];
    intel.upsert(record).await;

    intel.refresh().await;

    let hits = intel.matches_in_text("stealDough(wallet);").await;
    assert!(hits.iter().any(|h| h.id == "operator-custom-1"));
}

#[test]
fn repeated_attacks_raise_the_risk_floor() {
    let (engine, _logger) = engine();
    // Traversal increments the suspicion counter for the source address.
    let _ = engine.evaluate(&request(
        "198.51.100.9",
        "/files",
        Some("file=../../etc/passwd"),
    ));
    assert!(engine.suspicion("198.51.100.9") >= 1);
    for key in engine.quarantined() {
        engine.release_quarantine(&key);
    }

    // Suspicion persists into later context scoring.
    let context = engine
        .evaluate(&request("198.51.100.9", "/home", None))
        .unwrap();
    assert!(context.risk_score >= 10);
    assert_eq!(context.trust_score, 100 - context.risk_score);
}
