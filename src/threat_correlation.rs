//! Threat correlation: merges scan findings with threat-intelligence hits
//! into one deterministic assessment with recommendations and automated
//! actions.

use crate::threat_types::{
    Finding, IndicatorSummary, ScanResult, ThreatAssessment, ThreatIntelligence, ThreatType,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Contribution of one intel record: severity weight x confidence fraction
/// x threat-type weight.
fn intel_contribution(record: &ThreatIntelligence) -> f64 {
    record.severity.weight() * (f64::from(record.confidence) / 100.0) * record.threat_type.weight()
}

/// Contribution of one scan finding, using its category weight in place of
/// a threat type.
fn finding_contribution(finding: &Finding) -> f64 {
    finding.severity.weight() * (f64::from(finding.confidence) / 100.0) * finding.category.weight()
}

fn collect_risk_factors(scan: &ScanResult, intel_hits: &[ThreatIntelligence]) -> BTreeSet<String> {
    let mut factors = BTreeSet::new();
    for finding in &scan.findings {
        for vector in &finding.attack_vectors {
            factors.insert(vector.clone());
        }
    }
    if let Some(extra) = scan.metadata.get("risk_factors").and_then(|v| v.as_array()) {
        for factor in extra.iter().filter_map(|v| v.as_str()) {
            factors.insert(factor.to_string());
        }
    }
    for record in intel_hits {
        factors.insert(format!("known-threat:{}", record.threat_type.as_str()));
    }
    factors
}

/// Produce the aggregated assessment for a completed scan.
pub fn assess(scan: &ScanResult, intel_hits: Vec<ThreatIntelligence>) -> ThreatAssessment {
    let risk_factors = collect_risk_factors(scan, &intel_hits);

    let mut score = 0.0;
    for finding in &scan.findings {
        score += finding_contribution(finding);
    }
    for record in &intel_hits {
        score += intel_contribution(record);
    }
    // Two points per distinct risk factor.
    score += 2.0 * risk_factors.len() as f64;
    let risk_score = score.round().clamp(0.0, 100.0) as u8;

    let mut recommendations = Vec::new();
    let mut automated_actions = vec!["default-logging".to_string()];
    if risk_score > 90 {
        recommendations.push(
            "Quarantine the artifact and block distribution until re-reviewed".to_string(),
        );
        automated_actions.push("quarantine".to_string());
        automated_actions.push("block".to_string());
        automated_actions.push("alert".to_string());
    } else if risk_score > 70 {
        recommendations
            .push("Enable enhanced monitoring and schedule a manual security review".to_string());
        automated_actions.push("enhanced-monitoring".to_string());
        automated_actions.push("manual-review".to_string());
    } else if risk_score > 40 {
        recommendations
            .push("Enable detailed logging and follow up on the flagged findings".to_string());
        automated_actions.push("detailed-logging".to_string());
        automated_actions.push("follow-up".to_string());
    }

    // Threat-type-specific advisories.
    let types: BTreeSet<ThreatType> = intel_hits.iter().map(|r| r.threat_type).collect();
    if types.contains(&ThreatType::Malware) {
        recommendations
            .push("Known malware indicators matched; rescan after removal".to_string());
    }
    if types.contains(&ThreatType::Scam) || types.contains(&ThreatType::Rugpull) {
        recommendations.push(
            "Scam or rug-pull indicators matched; review all financial logic and ownership controls"
                .to_string(),
        );
    }
    if types.contains(&ThreatType::Phishing) {
        recommendations.push(
            "Phishing indicators matched; verify domains and apply anti-phishing guidance"
                .to_string(),
        );
    }

    let indicators = IndicatorSummary {
        suspicious_patterns: {
            let mut titles: Vec<String> =
                scan.findings.iter().map(|f| f.title.clone()).collect();
            titles.sort();
            titles.dedup();
            titles
        },
        known_bad_actors: intel_hits
            .iter()
            .map(|r| {
                r.attribution
                    .clone()
                    .unwrap_or_else(|| r.id.clone())
            })
            .collect(),
        risk_factors: risk_factors.into_iter().collect(),
    };

    debug!(scan_id = %scan.scan_id, risk_score, intel_hits = intel_hits.len(), "assessment complete");

    ThreatAssessment {
        risk_score,
        matched_intel: intel_hits,
        findings: scan.findings.clone(),
        indicators,
        recommendations,
        automated_actions,
    }
}
