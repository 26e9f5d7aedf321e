//! Security audit events and the bounded in-memory event log.
//!
//! Every allow/deny decision and every detection is recorded here before the
//! HTTP response leaves the service, so the audit trail stays complete even
//! when the caller's connection drops. Events are mirrored into `tracing`
//! at a severity-appropriate level and appended to a FIFO ring buffer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Capacity of the event ring buffer. Oldest events are evicted first,
/// regardless of severity.
pub const EVENT_LOG_CAPACITY: usize = 10_000;

/// Severity of a security event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SecuritySeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Categorization of security events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    AttackDetected,
    RateLimitExceeded,
    SuspiciousPattern,
    AccessDenied,
    AnomalyDetected,
    AccessGranted,
}

impl SecurityEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEventType::AttackDetected => "attack_detected",
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::SuspiciousPattern => "suspicious_pattern",
            SecurityEventType::AccessDenied => "access_denied",
            SecurityEventType::AnomalyDetected => "anomaly_detected",
            SecurityEventType::AccessGranted => "access_granted",
        }
    }
}

/// Origin of the request that triggered an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSource {
    pub ip: String,
    pub user_agent: String,
    pub endpoint: String,
    pub method: String,
}

/// Immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub source: EventSource,
    pub details: HashMap<String, Value>,
    /// Automated responses taken as part of the detection.
    pub responses: Vec<String>,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        severity: SecuritySeverity,
        source: EventSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            severity,
            source,
            details: HashMap::new(),
            responses: Vec::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.responses.push(response.into());
        self
    }
}

/// Bounded, synchronized event log with a `tracing` mirror.
pub struct SecurityLogger {
    events: RwLock<VecDeque<SecurityEvent>>,
    capacity: usize,
}

impl Default for SecurityLogger {
    fn default() -> Self {
        Self::new(EVENT_LOG_CAPACITY)
    }
}

impl SecurityLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Record an event: emit it to tracing and append it to the ring buffer,
    /// evicting the oldest entry when full.
    pub fn log(&self, event: SecurityEvent) {
        match event.severity {
            SecuritySeverity::Info => info!(
                event_id = %event.id,
                event_type = event.event_type.as_str(),
                ip = %event.source.ip,
                endpoint = %event.source.endpoint,
                "security event"
            ),
            SecuritySeverity::Warning => warn!(
                event_id = %event.id,
                event_type = event.event_type.as_str(),
                ip = %event.source.ip,
                endpoint = %event.source.endpoint,
                "security event"
            ),
            SecuritySeverity::Error | SecuritySeverity::Critical => error!(
                event_id = %event.id,
                event_type = event.event_type.as_str(),
                ip = %event.source.ip,
                endpoint = %event.source.endpoint,
                responses = ?event.responses,
                "security event"
            ),
        }

        crate::metrics::SECURITY_EVENTS_TOTAL
            .with_label_values(&[event.event_type.as_str()])
            .inc();

        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Events recorded at or after `since`, oldest first.
    pub fn events_since(&self, since: DateTime<Utc>) -> Vec<SecurityEvent> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        events
            .iter()
            .filter(|event| event.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Events from the trailing hour, used for the dashboard snapshot.
    pub fn last_hour(&self) -> Vec<SecurityEvent> {
        self.events_since(Utc::now() - Duration::hours(1))
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(severity: SecuritySeverity) -> SecurityEvent {
        SecurityEvent::new(
            SecurityEventType::AccessGranted,
            severity,
            EventSource {
                ip: "203.0.113.9".into(),
                user_agent: "test-agent".into(),
                endpoint: "/api/v1/scan".into(),
                method: "POST".into(),
            },
        )
    }

    #[test]
    fn fifo_eviction_at_capacity() {
        let logger = SecurityLogger::new(3);
        for i in 0..5 {
            logger.log(event(SecuritySeverity::Info).with_detail("seq", i));
        }
        assert_eq!(logger.len(), 3);
        let events = logger.events_since(Utc::now() - Duration::hours(1));
        let seqs: Vec<i64> = events
            .iter()
            .map(|e| e.details["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn eviction_ignores_severity() {
        let logger = SecurityLogger::new(2);
        logger.log(event(SecuritySeverity::Critical));
        logger.log(event(SecuritySeverity::Info));
        logger.log(event(SecuritySeverity::Info));
        let events = logger.last_hour();
        assert!(events.iter().all(|e| e.severity == SecuritySeverity::Info));
    }

    #[test]
    fn events_since_filters_by_timestamp() {
        let logger = SecurityLogger::new(10);
        logger.log(event(SecuritySeverity::Info));
        assert_eq!(logger.events_since(Utc::now() + Duration::hours(1)).len(), 0);
        assert_eq!(logger.last_hour().len(), 1);
    }
}
