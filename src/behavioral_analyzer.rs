//! Statistical analysis of scanned content: Shannon entropy and
//! obfuscation-idiom counting. Pure and stateless.

use crate::threat_types::{Finding, Severity, ThreatCategory};
use once_cell::sync::Lazy;
use regex::Regex;

/// Entropy above this threshold marks the content as likely packed or
/// encrypted.
pub const ENTROPY_THRESHOLD: f64 = 7.5;

/// An obfuscation idiom must occur more than this many times to register.
const IDIOM_THRESHOLD: usize = 3;

struct ObfuscationIdiom {
    name: &'static str,
    pattern: Regex,
    description: &'static str,
}

static IDIOMS: Lazy<Vec<ObfuscationIdiom>> = Lazy::new(|| {
    vec![
        ObfuscationIdiom {
            name: "hex-escape-run",
            pattern: Regex::new(r"\\x[0-9a-fA-F]{2}").expect("invalid idiom pattern"),
            description: "repeated hex-escape sequences hide string literals",
        },
        ObfuscationIdiom {
            name: "base64-decode-eval",
            pattern: Regex::new(r"(atob\s*\(|Buffer\.from\s*\([^)]*base64)")
                .expect("invalid idiom pattern"),
            description: "repeated base64 decoding feeding dynamic execution",
        },
        ObfuscationIdiom {
            name: "charcode-reconstruction",
            pattern: Regex::new(r"(String\.fromCharCode\s*\(|charCodeAt\s*\()")
                .expect("invalid idiom pattern"),
            description: "strings reconstructed from character codes",
        },
    ]
});

/// Output of a behavioral pass: findings plus the risk-factor strings that
/// feed the correlator.
#[derive(Debug, Default)]
pub struct BehavioralReport {
    pub findings: Vec<Finding>,
    pub risk_factors: Vec<String>,
}

/// Shannon entropy in bits over the character distribution of `text`.
/// Returns 0.0 for empty input.
pub fn shannon_entropy(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let mut counts: std::collections::HashMap<char, usize> = std::collections::HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Analyze `text` for entropy anomalies and obfuscation idioms.
pub fn analyze(text: &str) -> BehavioralReport {
    let mut report = BehavioralReport::default();

    let entropy = shannon_entropy(text);
    if entropy > ENTROPY_THRESHOLD {
        let mut finding = Finding::new(
            Severity::Medium,
            ThreatCategory::Suspicious,
            "High-Entropy Content",
            format!(
                "content entropy {entropy:.2} bits exceeds the {ENTROPY_THRESHOLD} threshold, \
                 suggesting packed or encrypted data"
            ),
        );
        finding.confidence = 60;
        finding.attack_vectors = vec!["entropy".to_string()];
        finding.recommendation =
            "Inspect high-entropy blobs for embedded payloads or encrypted droppers".to_string();
        finding.threat_score = 48;
        report.findings.push(finding);
        report.risk_factors.push("high-entropy-content".to_string());
    }

    for idiom in IDIOMS.iter() {
        let occurrences = idiom.pattern.find_iter(text).count();
        if occurrences > IDIOM_THRESHOLD {
            let mut finding = Finding::new(
                Severity::High,
                ThreatCategory::Suspicious,
                "Obfuscated Code Pattern",
                format!(
                    "{} ({} occurrences of `{}`)",
                    idiom.description, occurrences, idiom.name
                ),
            );
            finding.confidence = 70;
            finding.attack_vectors = vec!["obfuscation".to_string(), idiom.name.to_string()];
            finding.recommendation =
                "Deobfuscate and review the hidden logic before trusting this code".to_string();
            finding.threat_score = 56;
            report.findings.push(finding);
            report
                .risk_factors
                .push(format!("obfuscation:{}", idiom.name));
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_of_uniform_distribution_is_eight_bits() {
        // All 256 single-byte code points, equally frequent.
        let uniform: String = (0u32..256).filter_map(char::from_u32).collect();
        let entropy = shannon_entropy(&uniform);
        assert!((entropy - 8.0).abs() < 1e-9, "entropy was {entropy}");

        let report = analyze(&uniform);
        assert!(report
            .findings
            .iter()
            .any(|f| f.title == "High-Entropy Content" && f.confidence == 60));
        assert!(report
            .risk_factors
            .contains(&"high-entropy-content".to_string()));
    }

    #[test]
    fn entropy_of_repetition_is_zero() {
        let repetitive = "a".repeat(4096);
        assert_eq!(shannon_entropy(&repetitive), 0.0);
        assert!(analyze(&repetitive).findings.is_empty());
    }

    #[test]
    fn entropy_of_empty_input_is_zero() {
        assert_eq!(shannon_entropy(""), 0.0);
    }

    #[test]
    fn idioms_fire_only_above_threshold() {
        let three = "atob(a); atob(b); atob(c);";
        assert!(analyze(three).findings.is_empty());

        let four = "atob(a); atob(b); atob(c); atob(d);";
        let report = analyze(four);
        let hit = report
            .findings
            .iter()
            .find(|f| f.title == "Obfuscated Code Pattern")
            .expect("idiom finding");
        assert_eq!(hit.severity, Severity::High);
        assert_eq!(hit.confidence, 70);
        assert!(report
            .risk_factors
            .contains(&"obfuscation:base64-decode-eval".to_string()));
    }
}
