//! Per-request zero-trust risk engine.
//!
//! Every inbound request is scored, checked against the quarantine set,
//! matched against the registered policies, inspected for attack patterns,
//! and recorded in per-fingerprint behavior profiles. All mutable state is
//! owned by the engine instance and reached only through synchronized
//! containers; nothing here is process-global.

use crate::security_logging::{
    EventSource, SecurityEvent, SecurityEventType, SecurityLogger, SecuritySeverity,
};
use crate::threat_patterns::{self, AutomatedResponse};
use crate::threat_types::RiskLevel;
use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Reason codes carried by denial responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    IpQuarantined,
    TrustScoreTooLow,
    RiskScoreTooHigh,
    AuthenticationRequired,
    MfaRequired,
    CountryBlocked,
    RateLimitExceeded,
    AttackPatternDetected,
}

impl DenyReason {
    pub fn code(self) -> &'static str {
        match self {
            DenyReason::IpQuarantined => "IP_QUARANTINED",
            DenyReason::TrustScoreTooLow => "TRUST_SCORE_TOO_LOW",
            DenyReason::RiskScoreTooHigh => "RISK_SCORE_TOO_HIGH",
            DenyReason::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            DenyReason::MfaRequired => "MFA_REQUIRED",
            DenyReason::CountryBlocked => "COUNTRY_BLOCKED",
            DenyReason::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            DenyReason::AttackPatternDetected => "ATTACK_PATTERN_DETECTED",
        }
    }
}

/// Structured denial returned to the HTTP layer.
#[derive(Debug, Clone)]
pub struct AccessDenied {
    pub request_id: String,
    pub reason: DenyReason,
}

/// Rate-limit requirement attached to a policy: a fixed window in seconds
/// and the maximum requests allowed inside it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimit {
    pub window_secs: u64,
    pub max_requests: u32,
}

/// Requirements enforced when a policy matches a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyRequirements {
    pub min_trust_score: Option<u8>,
    pub max_risk_score: Option<u8>,
    pub require_auth: bool,
    pub require_mfa: bool,
    /// When set, only these ISO country codes are admitted.
    pub allowed_countries: Option<Vec<String>>,
    pub blocked_countries: Vec<String>,
    pub rate_limit: Option<RateLimit>,
}

/// A rule binding an endpoint glob to trust requirements. First matching
/// policy wins, in registration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZeroTrustPolicy {
    pub id: String,
    pub endpoint_pattern: String,
    pub methods: Vec<String>,
    pub requirements: PolicyRequirements,
    /// Log every matched request, not just denials.
    pub log_all_requests: bool,
}

/// A policy plus its endpoint glob, compiled once at registration.
struct RegisteredPolicy {
    policy: ZeroTrustPolicy,
    /// `None` when the glob failed to compile; such a policy matches
    /// nothing.
    pattern: Option<glob::Pattern>,
}

impl RegisteredPolicy {
    fn matches(&self, path: &str, method: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.matches(path))
            && self
                .policy
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Everything the engine needs to know about one inbound request.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub ip: String,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body_excerpt: Option<String>,
    pub authenticated: bool,
    pub mfa_verified: bool,
}

impl InboundRequest {
    fn header(&self, name: &str) -> &str {
        self.headers.get(name).map(String::as_str).unwrap_or("")
    }

    fn country(&self) -> String {
        let code = self
            .headers
            .get("cf-ipcountry")
            .or_else(|| self.headers.get("x-country-code"))
            .map(String::as_str)
            .unwrap_or("unknown");
        code.to_ascii_uppercase()
    }
}

/// Immutable per-request security context, attached to allowed requests.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityContext {
    pub request_id: String,
    pub fingerprint: String,
    pub browser_fingerprint: String,
    pub ip: String,
    pub risk_score: u8,
    pub trust_score: u8,
    pub threat_level: RiskLevel,
    pub device: String,
    pub platform: String,
    pub country: String,
    pub authenticated: bool,
}

/// Rolling per-fingerprint behavior profile.
#[derive(Debug, Clone)]
struct BehaviorProfile {
    request_count: u64,
    endpoints: HashSet<String>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    window_start: i64,
    count: u32,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ZeroTrustConfig {
    /// Hour range (UTC, start inclusive, end exclusive) treated as
    /// off-hours when enabled.
    pub off_hours_enabled: bool,
    pub off_hours_start: u32,
    pub off_hours_end: u32,
    pub min_user_agent_len: usize,
    /// Bot heuristic: request count above this with endpoint diversity
    /// below `bot_min_endpoints` increments the suspicion counter.
    pub bot_request_threshold: u64,
    pub bot_min_endpoints: usize,
}

impl Default for ZeroTrustConfig {
    fn default() -> Self {
        Self {
            off_hours_enabled: false,
            off_hours_start: 2,
            off_hours_end: 5,
            min_user_agent_len: 10,
            bot_request_threshold: 100,
            bot_min_endpoints: 3,
        }
    }
}

/// Per-request zero-trust evaluation engine. One instance owns all shared
/// security state for the service.
pub struct ZeroTrustEngine {
    config: ZeroTrustConfig,
    policies: RwLock<Vec<RegisteredPolicy>>,
    quarantine: RwLock<HashSet<String>>,
    suspicious_ips: DashMap<String, u32>,
    rate_violations: DashMap<String, u32>,
    rate_windows: DashMap<String, RateWindow>,
    profiles: DashMap<String, BehaviorProfile>,
    logger: Arc<SecurityLogger>,
}

impl ZeroTrustEngine {
    pub fn new(config: ZeroTrustConfig, logger: Arc<SecurityLogger>) -> Self {
        Self {
            config,
            policies: RwLock::new(Vec::new()),
            quarantine: RwLock::new(HashSet::new()),
            suspicious_ips: DashMap::new(),
            rate_violations: DashMap::new(),
            rate_windows: DashMap::new(),
            profiles: DashMap::new(),
            logger,
        }
    }

    // --- operator surface ---

    pub fn add_policy(&self, policy: ZeroTrustPolicy) {
        let pattern = match glob::Pattern::new(&policy.endpoint_pattern) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                warn!(policy_id = %policy.id, pattern = %policy.endpoint_pattern, error = %err,
                      "policy endpoint glob failed to compile, policy will match nothing");
                None
            }
        };
        self.policies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(RegisteredPolicy { policy, pattern });
    }

    pub fn remove_policy(&self, id: &str) -> bool {
        let mut policies = self.policies.write().unwrap_or_else(|e| e.into_inner());
        let before = policies.len();
        policies.retain(|p| p.policy.id != id);
        policies.len() != before
    }

    pub fn quarantine(&self, key: impl Into<String>) {
        let key = key.into();
        warn!(key = %key, "adding to quarantine set");
        self.quarantine
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key);
        crate::metrics::QUARANTINE_SIZE.set(self.quarantined().len() as i64);
    }

    /// Remove an entry from the quarantine set. Returns whether it was
    /// present.
    pub fn release_quarantine(&self, key: &str) -> bool {
        let removed = self
            .quarantine
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        crate::metrics::QUARANTINE_SIZE.set(self.quarantined().len() as i64);
        removed
    }

    pub fn quarantined(&self) -> Vec<String> {
        self.quarantine
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_quarantined(&self, key: &str) -> bool {
        self.quarantine
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    // --- evaluation pipeline ---

    /// Evaluate one request. Runs the full pipeline synchronously; any step
    /// may short-circuit with a denial. Denials are logged before they are
    /// returned.
    pub fn evaluate(&self, request: &InboundRequest) -> Result<SecurityContext, AccessDenied> {
        let context = self.build_context(request);
        debug!(request_id = %context.request_id, risk = context.risk_score,
               fingerprint = %context.fingerprint, "security context built");

        // Quarantine check precedes everything else.
        if self.is_quarantined(&context.fingerprint) || self.is_quarantined(&context.ip) {
            return Err(self.deny(request, &context, DenyReason::IpQuarantined, Vec::new()));
        }

        // First-match policy enforcement.
        if let Some(policy) = self.matching_policy(&request.path, &request.method) {
            if let Err(reason) = self.enforce_policy(&policy, request, &context) {
                return Err(self.deny(request, &context, reason, Vec::new()));
            }
            if policy.log_all_requests {
                debug!(policy = %policy.id, path = %request.path, "monitored endpoint hit");
            }
        }

        // Attack-pattern inspection over the serialized request. Responses
        // are applied synchronously, before the final decision.
        let serialized = format!(
            "{} {}?{} {}",
            request.method,
            request.path,
            request.query.as_deref().unwrap_or(""),
            request.body_excerpt.as_deref().unwrap_or("")
        );
        let detections = threat_patterns::detect_attacks(&serialized);
        let mut blocked = false;
        for detection in &detections {
            let mut responses_taken = Vec::new();
            for response in detection.responses {
                match response {
                    AutomatedResponse::Block => blocked = true,
                    AutomatedResponse::QuarantineIp => {
                        self.quarantine(context.ip.clone());
                        self.quarantine(context.fingerprint.clone());
                    }
                    AutomatedResponse::IncrementSuspicion => {
                        *self.suspicious_ips.entry(context.ip.clone()).or_insert(0) += 1;
                    }
                    AutomatedResponse::Log | AutomatedResponse::Alert => {}
                }
                responses_taken.push(response.as_str().to_string());
            }
            let severity = if detection.finding.severity == crate::threat_types::Severity::Critical
            {
                SecuritySeverity::Critical
            } else {
                SecuritySeverity::Warning
            };
            let mut event = SecurityEvent::new(
                SecurityEventType::AttackDetected,
                severity,
                self.event_source(request),
            )
            .with_detail("rule_id", detection.rule_id)
            .with_detail("title", detection.finding.title.clone())
            .with_detail("request_id", context.request_id.clone());
            for taken in responses_taken {
                event = event.with_response(taken);
            }
            self.logger.log(event);

            if detection.finding.severity == crate::threat_types::Severity::Critical {
                blocked = true;
            }
        }
        if blocked {
            return Err(self.deny(
                request,
                &context,
                DenyReason::AttackPatternDetected,
                detections
                    .iter()
                    .map(|d| d.rule_id.to_string())
                    .collect(),
            ));
        }

        // Behavioral bookkeeping. Never denies by itself.
        self.update_profile(request, &context);

        self.logger.log(
            SecurityEvent::new(
                SecurityEventType::AccessGranted,
                SecuritySeverity::Info,
                self.event_source(request),
            )
            .with_detail("request_id", context.request_id.clone())
            .with_detail("risk_score", context.risk_score)
            .with_detail("trust_score", context.trust_score),
        );
        crate::metrics::REQUESTS_EVALUATED_TOTAL
            .with_label_values(&["allow"])
            .inc();
        Ok(context)
    }

    /// Step 1 and 2: context construction and risk scoring.
    fn build_context(&self, request: &InboundRequest) -> SecurityContext {
        let user_agent = request.header("user-agent");
        let fingerprint = sha256_hex(&format!(
            "{}|{}|{}",
            request.ip,
            user_agent,
            request.header("accept")
        ));
        let browser_fingerprint = sha256_hex(&format!(
            "{}|{}|{}",
            request.header("accept-language"),
            request.header("accept-encoding"),
            user_agent
        ));

        let mut risk: i64 = 0;
        if let Some(counter) = self.suspicious_ips.get(&request.ip) {
            risk += 10 * i64::from(*counter);
        }
        if user_agent.len() < self.config.min_user_agent_len {
            risk += 25;
        }
        if request.path.contains("../") || request.path.contains("..\\") {
            risk += 40;
        }
        if let Some(query) = &request.query {
            if threat_patterns::contains_attack_pattern(query) {
                risk += 30;
            }
        }
        let header_blob = request
            .headers
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if threat_patterns::contains_attack_pattern(&header_blob) {
            risk += 20;
        }
        if let Some(violations) = self.rate_violations.get(&request.ip) {
            risk += 5 * i64::from(*violations);
        }
        if self.config.off_hours_enabled
            && in_hour_window(
                Utc::now().hour(),
                self.config.off_hours_start,
                self.config.off_hours_end,
            )
        {
            risk += 10;
        }

        let risk_score = risk.clamp(0, 100) as u8;
        let (device, platform) = classify_user_agent(user_agent);
        SecurityContext {
            request_id: Uuid::new_v4().to_string(),
            fingerprint,
            browser_fingerprint,
            ip: request.ip.clone(),
            risk_score,
            trust_score: 100 - risk_score,
            threat_level: RiskLevel::from_risk_score(risk_score),
            device,
            platform,
            country: request.country(),
            authenticated: request.authenticated,
        }
    }

    fn matching_policy(&self, path: &str, method: &str) -> Option<ZeroTrustPolicy> {
        self.policies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.matches(path, method))
            .map(|p| p.policy.clone())
    }

    fn enforce_policy(
        &self,
        policy: &ZeroTrustPolicy,
        request: &InboundRequest,
        context: &SecurityContext,
    ) -> Result<(), DenyReason> {
        let req = &policy.requirements;
        if let Some(min_trust) = req.min_trust_score {
            if context.trust_score < min_trust {
                return Err(DenyReason::TrustScoreTooLow);
            }
        }
        if let Some(max_risk) = req.max_risk_score {
            if context.risk_score > max_risk {
                return Err(DenyReason::RiskScoreTooHigh);
            }
        }
        if req.require_auth && !request.authenticated {
            return Err(DenyReason::AuthenticationRequired);
        }
        if req.require_mfa && !request.mfa_verified {
            return Err(DenyReason::MfaRequired);
        }
        let country = &context.country;
        if req
            .blocked_countries
            .iter()
            .any(|c| c.eq_ignore_ascii_case(country))
        {
            return Err(DenyReason::CountryBlocked);
        }
        if let Some(allowed) = &req.allowed_countries {
            if !allowed.iter().any(|c| c.eq_ignore_ascii_case(country)) {
                return Err(DenyReason::CountryBlocked);
            }
        }
        if let Some(limit) = req.rate_limit {
            if !self.consume_rate_slot(&policy.id, context, limit) {
                *self
                    .rate_violations
                    .entry(context.ip.clone())
                    .or_insert(0) += 1;
                self.logger.log(
                    SecurityEvent::new(
                        SecurityEventType::RateLimitExceeded,
                        SecuritySeverity::Warning,
                        self.event_source(request),
                    )
                    .with_detail("policy", policy.id.clone())
                    .with_detail("request_id", context.request_id.clone()),
                );
                return Err(DenyReason::RateLimitExceeded);
            }
        }
        Ok(())
    }

    /// Fixed-window rate limiting keyed by fingerprint and policy.
    fn consume_rate_slot(
        &self,
        policy_id: &str,
        context: &SecurityContext,
        limit: RateLimit,
    ) -> bool {
        let key = format!("{policy_id}:{}", context.fingerprint);
        let now = Utc::now().timestamp();
        let mut entry = self.rate_windows.entry(key).or_insert(RateWindow {
            window_start: now,
            count: 0,
        });
        if now - entry.window_start >= limit.window_secs as i64 {
            entry.window_start = now;
            entry.count = 0;
        }
        if entry.count >= limit.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Step 6: rolling profile upkeep and the bot-like heuristic.
    fn update_profile(&self, request: &InboundRequest, context: &SecurityContext) {
        let now = Utc::now();
        let mut bot_like = false;
        {
            let mut profile = self
                .profiles
                .entry(context.fingerprint.clone())
                .or_insert_with(|| BehaviorProfile {
                    request_count: 0,
                    endpoints: HashSet::new(),
                    first_seen: now,
                    last_seen: now,
                });
            profile.request_count += 1;
            profile.endpoints.insert(request.path.clone());
            profile.last_seen = now;
            if profile.request_count > self.config.bot_request_threshold
                && profile.endpoints.len() < self.config.bot_min_endpoints
            {
                bot_like = true;
            }
        }
        if bot_like {
            *self.suspicious_ips.entry(context.ip.clone()).or_insert(0) += 1;
            self.logger.log(
                SecurityEvent::new(
                    SecurityEventType::AnomalyDetected,
                    SecuritySeverity::Warning,
                    self.event_source(request),
                )
                .with_detail("heuristic", "bot-like-traffic")
                .with_detail("fingerprint", context.fingerprint.clone()),
            );
        }
    }

    fn deny(
        &self,
        request: &InboundRequest,
        context: &SecurityContext,
        reason: DenyReason,
        matched_rules: Vec<String>,
    ) -> AccessDenied {
        let event_type = match reason {
            DenyReason::RateLimitExceeded => SecurityEventType::RateLimitExceeded,
            DenyReason::AttackPatternDetected => SecurityEventType::SuspiciousPattern,
            _ => SecurityEventType::AccessDenied,
        };
        let mut event = SecurityEvent::new(
            event_type,
            SecuritySeverity::Warning,
            self.event_source(request),
        )
        .with_detail("reason", reason.code())
        .with_detail("request_id", context.request_id.clone())
        .with_detail("risk_score", context.risk_score);
        if !matched_rules.is_empty() {
            event = event.with_detail("matched_rules", serde_json::json!(matched_rules));
        }
        self.logger.log(event);
        crate::metrics::REQUESTS_EVALUATED_TOTAL
            .with_label_values(&["deny"])
            .inc();
        crate::metrics::DENIALS_TOTAL
            .with_label_values(&[reason.code()])
            .inc();
        AccessDenied {
            request_id: context.request_id.clone(),
            reason,
        }
    }

    fn event_source(&self, request: &InboundRequest) -> EventSource {
        EventSource {
            ip: request.ip.clone(),
            user_agent: request.header("user-agent").to_string(),
            endpoint: request.path.clone(),
            method: request.method.clone(),
        }
    }

    /// Suspicion counter for an IP, used by the dashboard.
    pub fn suspicion(&self, ip: &str) -> u32 {
        self.suspicious_ips.get(ip).map(|c| *c).unwrap_or(0)
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn classify_user_agent(user_agent: &str) -> (String, String) {
    let ua = user_agent.to_ascii_lowercase();
    let device = if ua.contains("mobile") || ua.contains("iphone") || ua.contains("android") {
        "mobile"
    } else if ua.contains("curl") || ua.contains("wget") || ua.contains("python") {
        "script"
    } else {
        "desktop"
    };
    let platform = if ua.contains("windows") {
        "windows"
    } else if ua.contains("mac os") || ua.contains("iphone") || ua.contains("ipad") {
        "apple"
    } else if ua.contains("android") {
        "android"
    } else if ua.contains("linux") {
        "linux"
    } else {
        "unknown"
    };
    (device.to_string(), platform.to_string())
}

/// Whether `hour` falls inside the [start, end) window. A window with
/// `start > end` wraps past midnight (22..4 covers 22, 23, 0..3).
fn in_hour_window(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";

    fn engine() -> ZeroTrustEngine {
        ZeroTrustEngine::new(ZeroTrustConfig::default(), Arc::new(SecurityLogger::default()))
    }

    fn clean_request(ip: &str, path: &str) -> InboundRequest {
        let mut headers = HashMap::new();
        headers.insert("user-agent".to_string(), UA.to_string());
        headers.insert("accept".to_string(), "application/json".to_string());
        InboundRequest {
            ip: ip.to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            query: None,
            headers,
            body_excerpt: None,
            authenticated: false,
            mfa_verified: false,
        }
    }

    #[test]
    fn clean_request_has_zero_risk_and_full_trust() {
        let engine = engine();
        let context = engine
            .evaluate(&clean_request("203.0.113.5", "/api/v1/health"))
            .expect("allowed");
        assert_eq!(context.risk_score, 0);
        assert_eq!(context.trust_score, 100);
        assert_eq!(context.threat_level, RiskLevel::Minimal);
        assert_eq!(
            100 - context.risk_score,
            context.trust_score,
            "trust must be the exact complement of risk"
        );
    }

    #[test]
    fn fingerprint_is_stable_per_client() {
        let engine = engine();
        let a = engine
            .evaluate(&clean_request("203.0.113.5", "/a"))
            .expect("allowed");
        let b = engine
            .evaluate(&clean_request("203.0.113.5", "/b"))
            .expect("allowed");
        assert_eq!(a.fingerprint, b.fingerprint);
        let c = engine
            .evaluate(&clean_request("203.0.113.6", "/a"))
            .expect("allowed");
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn path_traversal_adds_forty_risk_and_quarantines() {
        let engine = engine();
        let mut request = clean_request("198.51.100.9", "/files/../../etc/passwd");
        // Traversal contributes +40 before the attack-pattern step even runs.
        let context = engine.build_context(&request);
        assert!(context.risk_score >= 40, "risk was {}", context.risk_score);

        // The traversal attack rule carries a quarantine response.
        request.path = "/files/../../etc/passwd".to_string();
        let denied_or_allowed = engine.evaluate(&request);
        assert!(engine.is_quarantined("198.51.100.9"));
        // High (non-critical) traversal matches do not block on their own.
        assert!(denied_or_allowed.is_ok());

        // The next request from that IP is denied outright.
        let err = engine
            .evaluate(&clean_request("198.51.100.9", "/api/v1/health"))
            .expect_err("quarantined");
        assert_eq!(err.reason, DenyReason::IpQuarantined);
    }

    #[test]
    fn quarantine_release_restores_access() {
        let engine = engine();
        engine.quarantine("203.0.113.50");
        assert!(engine
            .evaluate(&clean_request("203.0.113.50", "/api/v1/health"))
            .is_err());

        assert!(engine.release_quarantine("203.0.113.50"));
        assert!(!engine.release_quarantine("203.0.113.50"));
        assert!(engine
            .evaluate(&clean_request("203.0.113.50", "/api/v1/health"))
            .is_ok());
    }

    #[test]
    fn critical_attack_pattern_blocks_request() {
        let engine = engine();
        let mut request = clean_request("198.51.100.77", "/api/v1/scan");
        request.method = "POST".to_string();
        request.body_excerpt = Some("'; DROP TABLE users; --".to_string());
        let err = engine.evaluate(&request).expect_err("blocked");
        assert_eq!(err.reason, DenyReason::AttackPatternDetected);
        assert!(engine.is_quarantined("198.51.100.77"));
    }

    #[test]
    fn short_user_agent_raises_risk() {
        let engine = engine();
        let mut request = clean_request("203.0.113.7", "/api/v1/health");
        request.headers.insert("user-agent".to_string(), "bot".to_string());
        let context = engine.evaluate(&request).expect("allowed");
        assert_eq!(context.risk_score, 25);
        assert_eq!(context.trust_score, 75);
        assert_eq!(context.threat_level, RiskLevel::Low);
    }

    #[test]
    fn suspicious_query_raises_risk() {
        let engine = engine();
        let mut request = clean_request("203.0.113.8", "/api/v1/search");
        request.query = Some("q=<script>alert(1)</script>".to_string());
        let context = engine.build_context(&request);
        assert!(context.risk_score >= 30);
    }

    #[test]
    fn suspicious_ip_counter_scales_risk() {
        let engine = engine();
        engine.suspicious_ips.insert("203.0.113.66".to_string(), 3);
        let context = engine.build_context(&clean_request("203.0.113.66", "/x"));
        assert_eq!(context.risk_score, 30);
    }

    #[test]
    fn risk_never_exceeds_bounds() {
        let engine = engine();
        engine.suspicious_ips.insert("203.0.113.99".to_string(), 50);
        let mut request = clean_request("203.0.113.99", "/a/../../etc");
        request.headers.insert("user-agent".to_string(), "x".to_string());
        request.query = Some("payload=<script>".to_string());
        let context = engine.build_context(&request);
        assert_eq!(context.risk_score, 100);
        assert_eq!(context.trust_score, 0);
        assert_eq!(context.threat_level, RiskLevel::Critical);
    }

    #[test]
    fn policy_enforces_trust_floor() {
        let engine = engine();
        engine.add_policy(ZeroTrustPolicy {
            id: "strict".to_string(),
            endpoint_pattern: "/api/v1/admin*".to_string(),
            methods: vec!["GET".to_string()],
            requirements: PolicyRequirements {
                min_trust_score: Some(90),
                ..Default::default()
            },
            log_all_requests: false,
        });
        let mut request = clean_request("203.0.113.12", "/api/v1/admin/users");
        request.headers.insert("user-agent".to_string(), "tiny".to_string());
        let err = engine.evaluate(&request).expect_err("denied");
        assert_eq!(err.reason, DenyReason::TrustScoreTooLow);
    }

    #[test]
    fn policy_rate_limit_denies_after_max() {
        let engine = engine();
        engine.add_policy(ZeroTrustPolicy {
            id: "limited".to_string(),
            endpoint_pattern: "/api/v1/scan*".to_string(),
            methods: vec!["POST".to_string()],
            requirements: PolicyRequirements {
                rate_limit: Some(RateLimit {
                    window_secs: 300,
                    max_requests: 3,
                }),
                ..Default::default()
            },
            log_all_requests: false,
        });
        let mut request = clean_request("203.0.113.20", "/api/v1/scan");
        request.method = "POST".to_string();
        for _ in 0..3 {
            assert!(engine.evaluate(&request).is_ok());
        }
        let err = engine.evaluate(&request).expect_err("limited");
        assert_eq!(err.reason, DenyReason::RateLimitExceeded);
    }

    #[test]
    fn first_matching_policy_wins() {
        let engine = engine();
        engine.add_policy(ZeroTrustPolicy {
            id: "specific".to_string(),
            endpoint_pattern: "/api/v1/scan/premium".to_string(),
            methods: vec!["POST".to_string()],
            requirements: PolicyRequirements {
                require_auth: true,
                ..Default::default()
            },
            log_all_requests: false,
        });
        engine.add_policy(ZeroTrustPolicy {
            id: "general".to_string(),
            endpoint_pattern: "/api/v1/scan*".to_string(),
            methods: vec!["POST".to_string()],
            requirements: PolicyRequirements::default(),
            log_all_requests: false,
        });

        let mut request = clean_request("203.0.113.30", "/api/v1/scan/premium");
        request.method = "POST".to_string();
        let err = engine.evaluate(&request).expect_err("auth required");
        assert_eq!(err.reason, DenyReason::AuthenticationRequired);

        request.authenticated = true;
        assert!(engine.evaluate(&request).is_ok());
    }

    #[test]
    fn country_lists_are_enforced() {
        let engine = engine();
        engine.add_policy(ZeroTrustPolicy {
            id: "geo".to_string(),
            endpoint_pattern: "/api/v1/geo*".to_string(),
            methods: vec!["GET".to_string()],
            requirements: PolicyRequirements {
                blocked_countries: vec!["KP".to_string()],
                ..Default::default()
            },
            log_all_requests: false,
        });
        let mut request = clean_request("203.0.113.41", "/api/v1/geo");
        request
            .headers
            .insert("cf-ipcountry".to_string(), "kp".to_string());
        let err = engine.evaluate(&request).expect_err("blocked country");
        assert_eq!(err.reason, DenyReason::CountryBlocked);
    }

    #[test]
    fn bot_heuristic_increments_suspicion() {
        let mut config = ZeroTrustConfig::default();
        config.bot_request_threshold = 5;
        let engine = ZeroTrustEngine::new(config, Arc::new(SecurityLogger::default()));
        let request = clean_request("203.0.113.55", "/api/v1/only-endpoint");
        for _ in 0..8 {
            let _ = engine.evaluate(&request);
        }
        assert!(engine.suspicion("203.0.113.55") > 0);
    }

    #[test]
    fn off_hours_window_wraps_midnight() {
        assert!(in_hour_window(22, 22, 4));
        assert!(in_hour_window(23, 22, 4));
        assert!(in_hour_window(2, 22, 4));
        assert!(!in_hour_window(4, 22, 4));
        assert!(!in_hour_window(12, 22, 4));
        assert!(in_hour_window(3, 2, 5));
        assert!(!in_hour_window(5, 2, 5));
    }

    #[test]
    fn invalid_policy_glob_matches_nothing() {
        let engine = engine();
        engine.add_policy(ZeroTrustPolicy {
            id: "broken".to_string(),
            endpoint_pattern: "/api/v1/[".to_string(),
            methods: vec!["GET".to_string()],
            requirements: PolicyRequirements {
                require_auth: true,
                ..Default::default()
            },
            log_all_requests: false,
        });
        // The uncompilable glob never matches, so the auth requirement
        // never applies.
        assert!(engine
            .evaluate(&clean_request("203.0.113.70", "/api/v1/anything"))
            .is_ok());
    }

    #[test]
    fn policy_removal() {
        let engine = engine();
        engine.add_policy(ZeroTrustPolicy {
            id: "temp".to_string(),
            endpoint_pattern: "/tmp*".to_string(),
            methods: vec!["GET".to_string()],
            requirements: PolicyRequirements {
                require_auth: true,
                ..Default::default()
            },
            log_all_requests: false,
        });
        assert!(engine.evaluate(&clean_request("203.0.113.60", "/tmp/x")).is_err());
        assert!(engine.remove_policy("temp"));
        assert!(!engine.remove_policy("temp"));
        assert!(engine.evaluate(&clean_request("203.0.113.60", "/tmp/x")).is_ok());
    }
}
