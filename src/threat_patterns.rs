//! Data-driven pattern rule engine.
//!
//! Rules are compiled once into a static table and evaluated as a pure
//! function of the input text, so any number of callers may run detection
//! concurrently. A distinguished attack-pattern subset is exposed for the
//! zero-trust engine's per-request inspection, carrying the automated
//! responses to apply on a match.

use crate::threat_types::{threat_score, Finding, FindingLocation, Severity, ThreatCategory};
use once_cell::sync::Lazy;
use regex::Regex;

/// Rule grouping, mirrored into finding attack-vector tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCategory {
    CriticalVulnerability,
    HighRisk,
    PlatformSpecific,
    CryptographicWeakness,
    Behavioral,
}

/// Automated response dispatched when an attack-pattern rule matches a
/// live request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomatedResponse {
    Block,
    QuarantineIp,
    IncrementSuspicion,
    Log,
    Alert,
}

impl AutomatedResponse {
    pub fn as_str(self) -> &'static str {
        match self {
            AutomatedResponse::Block => "block",
            AutomatedResponse::QuarantineIp => "quarantine_ip",
            AutomatedResponse::IncrementSuspicion => "increment_suspicion",
            AutomatedResponse::Log => "log",
            AutomatedResponse::Alert => "alert",
        }
    }
}

/// One compiled detection rule.
pub struct ThreatRule {
    pub id: &'static str,
    pub title: &'static str,
    pub category: RuleCategory,
    pub threat_category: ThreatCategory,
    pub severity: Severity,
    pub cvss: f64,
    pub pattern: Regex,
    pub attack_vectors: &'static [&'static str],
    pub recommendation: &'static str,
    /// Minimum number of matches before the rule emits findings. Behavioral
    /// rules use a threshold above one to suppress incidental matches.
    pub min_matches: usize,
    /// Whether this rule belongs to the request-inspection subset.
    pub attack_pattern: bool,
    /// Responses applied when the rule matches a live request.
    pub responses: &'static [AutomatedResponse],
}

fn rule(
    id: &'static str,
    title: &'static str,
    category: RuleCategory,
    threat_category: ThreatCategory,
    severity: Severity,
    cvss: f64,
    pattern: &str,
    attack_vectors: &'static [&'static str],
    recommendation: &'static str,
) -> ThreatRule {
    ThreatRule {
        id,
        title,
        category,
        threat_category,
        severity,
        cvss,
        pattern: Regex::new(pattern).expect("invalid rule pattern"),
        attack_vectors,
        recommendation,
        min_matches: 1,
        attack_pattern: false,
        responses: &[],
    }
}

/// Compiled rule table, built once at first use.
pub static RULES: Lazy<Vec<ThreatRule>> = Lazy::new(|| {
    vec![
        // Critical vulnerability rules
        ThreatRule {
            attack_pattern: true,
            responses: &[
                AutomatedResponse::Block,
                AutomatedResponse::QuarantineIp,
                AutomatedResponse::Alert,
            ],
            ..rule(
                "sql-injection",
                "SQL Injection Risk",
                RuleCategory::CriticalVulnerability,
                ThreatCategory::Vulnerability,
                Severity::Critical,
                9.1,
                r"(?i)\b(drop\s+table|delete\s+from|insert\s+into|union\s+select|or\s+1\s*=\s*1)\b",
                &["injection", "sqli"],
                "Use parameterized queries; never interpolate untrusted input into SQL",
            )
        },
        ThreatRule {
            attack_pattern: true,
            responses: &[
                AutomatedResponse::Block,
                AutomatedResponse::QuarantineIp,
                AutomatedResponse::IncrementSuspicion,
                AutomatedResponse::Alert,
            ],
            ..rule(
                "command-injection",
                "Command Injection Risk",
                RuleCategory::CriticalVulnerability,
                ThreatCategory::Vulnerability,
                Severity::Critical,
                9.8,
                r"(?i)(child_process\.exec|execSync\s*\(|\bpopen\s*\(|\bsystem\s*\(|;\s*rm\s+-rf\b)",
                &["injection", "rce"],
                "Avoid shelling out with untrusted input; use an allow-listed argument vector",
            )
        },
        rule(
            "exposed-private-key",
            "Exposed Private Key",
            RuleCategory::CriticalVulnerability,
            ThreatCategory::Vulnerability,
            Severity::Critical,
            9.8,
            r#"(?i)(private[_\s]?key|secret[_\s]?key|mnemonic)\s*[:=]\s*["'](0x)?[0-9a-fA-F]{64}"#,
            &["credential-exposure", "key-leak"],
            "Remove the key from source, rotate it immediately, and load secrets from a vault",
        ),
        rule(
            "hardcoded-cloud-credentials",
            "Hardcoded Cloud Credentials",
            RuleCategory::CriticalVulnerability,
            ThreatCategory::Vulnerability,
            Severity::Critical,
            9.1,
            r"AKIA[0-9A-Z]{16}",
            &["credential-exposure"],
            "Revoke the exposed access key and switch to short-lived role credentials",
        ),
        // High-risk rules
        rule(
            "eval-injection",
            "Dynamic Code Evaluation",
            RuleCategory::HighRisk,
            ThreatCategory::Vulnerability,
            Severity::High,
            8.1,
            r"\beval\s*\(",
            &["injection", "rce"],
            "Replace eval with explicit parsing or a sandboxed interpreter",
        ),
        ThreatRule {
            attack_pattern: true,
            responses: &[
                AutomatedResponse::Block,
                AutomatedResponse::IncrementSuspicion,
                AutomatedResponse::Log,
            ],
            ..rule(
                "xss-injection",
                "Cross-Site Scripting Risk",
                RuleCategory::HighRisk,
                ThreatCategory::Vulnerability,
                Severity::High,
                7.2,
                r"(?i)(<script\b|javascript:|onerror\s*=|document\.write\s*\(|\.innerHTML\s*=)",
                &["injection", "xss"],
                "Encode output for its context and enable a strict Content-Security-Policy",
            )
        },
        ThreatRule {
            attack_pattern: true,
            responses: &[
                AutomatedResponse::QuarantineIp,
                AutomatedResponse::IncrementSuspicion,
                AutomatedResponse::Alert,
            ],
            ..rule(
                "path-traversal",
                "Path Traversal",
                RuleCategory::HighRisk,
                ThreatCategory::Vulnerability,
                Severity::High,
                7.5,
                r"(?i)(\.\./\.\.|\.\.\\\.\.|%2e%2e%2f)",
                &["traversal"],
                "Canonicalize paths and reject any component that escapes the content root",
            )
        },
        ThreatRule {
            attack_pattern: true,
            responses: &[AutomatedResponse::Block, AutomatedResponse::Log],
            ..rule(
                "prototype-pollution",
                "Prototype Pollution",
                RuleCategory::HighRisk,
                ThreatCategory::Vulnerability,
                Severity::High,
                7.3,
                r"(__proto__|constructor\s*\[)",
                &["injection", "pollution"],
                "Reject __proto__ and constructor keys when merging untrusted objects",
            )
        },
        rule(
            "insecure-deserialization",
            "Insecure Deserialization",
            RuleCategory::HighRisk,
            ThreatCategory::Vulnerability,
            Severity::High,
            8.0,
            r"(?i)(pickle\.loads|yaml\.load\s*\(|unserialize\s*\()",
            &["deserialization"],
            "Use a safe loader or a schema-validated format for untrusted payloads",
        ),
        rule(
            "base64-eval",
            "Base64 Payload Evaluation",
            RuleCategory::HighRisk,
            ThreatCategory::Malware,
            Severity::High,
            7.8,
            r"eval\s*\(\s*atob\s*\(",
            &["obfuscation", "rce"],
            "Decode-and-execute of embedded payloads indicates malicious tooling; remove it",
        ),
        // Platform-specific (contract language) rules
        rule(
            "unprotected-selfdestruct",
            "Unprotected Self-Destruct",
            RuleCategory::PlatformSpecific,
            ThreatCategory::Vulnerability,
            Severity::High,
            8.6,
            r"\b(selfdestruct|suicide)\s*\(",
            &["contract", "destruction"],
            "Guard destruction paths behind owner checks or remove them entirely",
        ),
        rule(
            "tx-origin-auth",
            "tx.origin Authentication",
            RuleCategory::PlatformSpecific,
            ThreatCategory::Vulnerability,
            Severity::High,
            7.4,
            r"tx\.origin",
            &["contract", "auth-bypass"],
            "Authenticate with msg.sender; tx.origin is forwardable by intermediate contracts",
        ),
        rule(
            "unchecked-delegatecall",
            "Unchecked Delegatecall",
            RuleCategory::PlatformSpecific,
            ThreatCategory::Vulnerability,
            Severity::High,
            8.2,
            r"\.delegatecall\s*\(",
            &["contract", "delegatecall"],
            "Restrict delegatecall targets to audited, immutable implementations",
        ),
        rule(
            "unchecked-value-call",
            "Unchecked External Call With Value",
            RuleCategory::PlatformSpecific,
            ThreatCategory::Vulnerability,
            Severity::Medium,
            6.5,
            r"\.call\{value:",
            &["contract", "reentrancy"],
            "Apply checks-effects-interactions and verify the call's return value",
        ),
        rule(
            "timestamp-dependence",
            "Timestamp Dependence",
            RuleCategory::PlatformSpecific,
            ThreatCategory::Suspicious,
            Severity::Low,
            3.7,
            r"block\.timestamp",
            &["contract", "timestamp"],
            "Avoid using block timestamps for critical logic; miners can skew them",
        ),
        // Cryptographic weakness rules
        rule(
            "weak-hash",
            "Weak Hash Algorithm",
            RuleCategory::CryptographicWeakness,
            ThreatCategory::Vulnerability,
            Severity::Medium,
            5.9,
            r#"(?i)(\bmd5\s*\(|\bsha1\s*\(|createHash\s*\(\s*["'](md5|sha1)["'])"#,
            &["crypto", "weak-hash"],
            "Replace MD5/SHA-1 with SHA-256 or stronger",
        ),
        rule(
            "weak-cipher",
            "Weak Encryption Cipher",
            RuleCategory::CryptographicWeakness,
            ThreatCategory::Vulnerability,
            Severity::Medium,
            5.9,
            r#"(?i)createCipher(iv)?\s*\(\s*["'](des|rc4|rc2|aes-128-ecb|aes-256-ecb)"#,
            &["crypto", "weak-cipher"],
            "Use an AEAD cipher such as AES-256-GCM or ChaCha20-Poly1305",
        ),
        rule(
            "insecure-random",
            "Insecure Randomness",
            RuleCategory::CryptographicWeakness,
            ThreatCategory::Suspicious,
            Severity::Low,
            3.1,
            r"Math\.random\s*\(\)",
            &["crypto", "weak-random"],
            "Use a cryptographically secure random source for security decisions",
        ),
        // Behavioral / obfuscation rules with a minimum-match threshold
        ThreatRule {
            min_matches: 3,
            ..rule(
                "charcode-obfuscation",
                "Character-Code Obfuscation",
                RuleCategory::Behavioral,
                ThreatCategory::Suspicious,
                Severity::High,
                7.0,
                r"String\.fromCharCode\s*\(",
                &["obfuscation"],
                "Reconstructing strings from char codes hides intent; review the decoded payload",
            )
        },
        ThreatRule {
            min_matches: 4,
            ..rule(
                "hex-escape-obfuscation",
                "Hex-Escape Obfuscation",
                RuleCategory::Behavioral,
                ThreatCategory::Suspicious,
                Severity::High,
                7.0,
                r"\\x[0-9a-fA-F]{2}",
                &["obfuscation"],
                "Dense hex-escape sequences hide string literals; review the decoded content",
            )
        },
        ThreatRule {
            min_matches: 4,
            ..rule(
                "unescape-obfuscation",
                "Escape-Sequence Obfuscation",
                RuleCategory::Behavioral,
                ThreatCategory::Suspicious,
                Severity::Medium,
                5.3,
                r"unescape\s*\(",
                &["obfuscation"],
                "Repeated unescape calls indicate packed code; review the unpacked source",
            )
        },
    ]
});

/// 1-based source line of a byte offset.
fn line_of_offset(text: &str, offset: usize) -> usize {
    text[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}

fn finding_for_match(rule: &ThreatRule, text: &str, start: usize, matched: &str) -> Finding {
    let mut evidence = matched.to_string();
    if evidence.len() > 120 {
        evidence.truncate(120);
    }
    let mut finding = Finding::new(
        rule.severity,
        rule.threat_category,
        rule.title,
        format!("{} detected by rule `{}`", rule.title, rule.id),
    );
    finding.evidence = vec![evidence];
    finding.location = FindingLocation {
        file: None,
        line: Some(line_of_offset(text, start)),
        function: None,
    };
    finding.recommendation = rule.recommendation.to_string();
    finding.threat_score = threat_score(rule.cvss, rule.severity);
    finding.cvss = Some(rule.cvss);
    finding.attack_vectors = rule.attack_vectors.iter().map(|v| v.to_string()).collect();
    finding
}

/// Run every rule over `text`. Each match of each rule that reaches its
/// minimum-match threshold yields a separate finding; nothing is deduplicated.
pub fn detect(text: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for rule in RULES.iter() {
        let matches: Vec<_> = rule.pattern.find_iter(text).collect();
        if matches.len() < rule.min_matches {
            continue;
        }
        for m in matches {
            findings.push(finding_for_match(rule, text, m.start(), m.as_str()));
        }
    }
    findings
}

/// A request-inspection match together with its automated responses.
pub struct AttackDetection {
    pub finding: Finding,
    pub rule_id: &'static str,
    pub responses: &'static [AutomatedResponse],
}

/// Run only the attack-pattern subset, used by the zero-trust engine against
/// the serialized request. One detection per matching rule.
pub fn detect_attacks(text: &str) -> Vec<AttackDetection> {
    let mut detections = Vec::new();
    for rule in RULES.iter().filter(|r| r.attack_pattern) {
        if let Some(m) = rule.pattern.find(text) {
            detections.push(AttackDetection {
                finding: finding_for_match(rule, text, m.start(), m.as_str()),
                rule_id: rule.id,
                responses: rule.responses,
            });
        }
    }
    detections
}

/// Whether any attack-pattern rule matches `text`. Used for the cheap
/// suspicious-content checks on query strings and headers.
pub fn contains_attack_pattern(text: &str) -> bool {
    RULES
        .iter()
        .filter(|r| r.attack_pattern)
        .any(|r| r.pattern.is_match(text))
}
