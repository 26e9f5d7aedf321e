//! In-memory threat-intelligence store.
//!
//! Records are kept in a map keyed by id behind a `tokio::sync::RwLock`.
//! The periodic refresh rebuilds the bundled dataset off-lock and swaps it
//! in under a short write lock, so readers never observe a partially
//! updated record. Operator-added records survive a refresh.

use crate::threat_types::{
    Severity, ThreatIndicators, ThreatIntelligence, ThreatType,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

struct IntelEntry {
    record: ThreatIntelligence,
    /// Indicator regexes compiled at insert time.
    compiled: Vec<Regex>,
    /// Whether the record came from the bundled dataset (replaced on
    /// refresh) or from an operator upsert (retained).
    seeded: bool,
}

struct IntelState {
    entries: HashMap<String, IntelEntry>,
    last_refresh: DateTime<Utc>,
    refresh_count: u64,
}

/// Store statistics exposed to the dashboard.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelStatistics {
    pub total_records: usize,
    pub by_type: HashMap<String, usize>,
    pub last_refresh: DateTime<Utc>,
    pub refresh_count: u64,
}

/// Shared handle to the intelligence store.
#[derive(Clone)]
pub struct ThreatIntelStore {
    state: Arc<RwLock<IntelState>>,
}

impl Default for ThreatIntelStore {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_patterns(record: &ThreatIntelligence) -> Vec<Regex> {
    record
        .indicators
        .patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(regex) => Some(regex),
            Err(err) => {
                warn!(record_id = %record.id, pattern = %p, error = %err,
                      "skipping uncompilable intel pattern");
                None
            }
        })
        .collect()
}

fn entry(record: ThreatIntelligence, seeded: bool) -> IntelEntry {
    IntelEntry {
        compiled: compile_patterns(&record),
        record,
        seeded,
    }
}

impl ThreatIntelStore {
    /// Create a store seeded from the bundled dataset.
    pub fn new() -> Self {
        let entries = seed_dataset()
            .into_iter()
            .map(|record| (record.id.clone(), entry(record, true)))
            .collect();
        Self {
            state: Arc::new(RwLock::new(IntelState {
                entries,
                last_refresh: Utc::now(),
                refresh_count: 0,
            })),
        }
    }

    /// Records whose compiled patterns match `text`.
    pub async fn lookup_by_pattern(&self, text: &str) -> Vec<ThreatIntelligence> {
        let state = self.state.read().await;
        state
            .entries
            .values()
            .filter(|e| e.compiled.iter().any(|regex| regex.is_match(text)))
            .map(|e| e.record.clone())
            .collect()
    }

    /// Records listing `address` among their indicator addresses.
    pub async fn lookup_by_address(&self, address: &str) -> Vec<ThreatIntelligence> {
        self.lookup(|record| {
            record
                .indicators
                .addresses
                .iter()
                .any(|a| a.eq_ignore_ascii_case(address))
        })
        .await
    }

    pub async fn lookup_by_domain(&self, domain: &str) -> Vec<ThreatIntelligence> {
        self.lookup(|record| {
            record
                .indicators
                .domains
                .iter()
                .any(|d| d.eq_ignore_ascii_case(domain))
        })
        .await
    }

    pub async fn lookup_by_hash(&self, hash: &str) -> Vec<ThreatIntelligence> {
        self.lookup(|record| {
            record
                .indicators
                .file_hashes
                .iter()
                .any(|h| h.eq_ignore_ascii_case(hash))
        })
        .await
    }

    pub async fn lookup_by_ip(&self, ip: &str) -> Vec<ThreatIntelligence> {
        self.lookup(|record| record.indicators.ips.iter().any(|i| i == ip))
            .await
    }

    async fn lookup<F>(&self, predicate: F) -> Vec<ThreatIntelligence>
    where
        F: Fn(&ThreatIntelligence) -> bool,
    {
        let state = self.state.read().await;
        state
            .entries
            .values()
            .filter(|e| predicate(&e.record))
            .map(|e| e.record.clone())
            .collect()
    }

    /// Records whose literal indicators (addresses, domains, hashes) appear
    /// verbatim inside `text`, in addition to pattern matches. Used to
    /// correlate scanned code against the catalog.
    pub async fn matches_in_text(&self, text: &str) -> Vec<ThreatIntelligence> {
        let state = self.state.read().await;
        state
            .entries
            .values()
            .filter(|e| {
                e.compiled.iter().any(|regex| regex.is_match(text))
                    || e.record
                        .indicators
                        .addresses
                        .iter()
                        .chain(e.record.indicators.domains.iter())
                        .chain(e.record.indicators.file_hashes.iter())
                        .any(|indicator| text.contains(indicator.as_str()))
            })
            .map(|e| e.record.clone())
            .collect()
    }

    /// Insert or replace a record. Operator upserts survive refreshes.
    pub async fn upsert(&self, record: ThreatIntelligence) {
        let mut state = self.state.write().await;
        debug!(record_id = %record.id, threat_type = record.threat_type.as_str(), "intel upsert");
        state
            .entries
            .insert(record.id.clone(), entry(record, false));
    }

    /// Remove a record by id. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        state.entries.remove(id).is_some()
    }

    /// Snapshot of every record.
    pub async fn snapshot(&self) -> Vec<ThreatIntelligence> {
        let state = self.state.read().await;
        state.entries.values().map(|e| e.record.clone()).collect()
    }

    /// Most-recent-first slice for the feed endpoint, filtered by optional
    /// severity and threat type.
    pub async fn recent(
        &self,
        limit: usize,
        severity: Option<Severity>,
        threat_type: Option<ThreatType>,
    ) -> Vec<ThreatIntelligence> {
        let mut records = self.snapshot().await;
        records.retain(|record| {
            severity.map_or(true, |s| record.severity == s)
                && threat_type.map_or(true, |t| record.threat_type == t)
        });
        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        records.truncate(limit);
        records
    }

    pub async fn statistics(&self) -> IntelStatistics {
        let state = self.state.read().await;
        let mut by_type: HashMap<String, usize> = HashMap::new();
        for e in state.entries.values() {
            *by_type
                .entry(e.record.threat_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        IntelStatistics {
            total_records: state.entries.len(),
            by_type,
            last_refresh: state.last_refresh,
            refresh_count: state.refresh_count,
        }
    }

    /// Rebuild the seeded portion of the catalog and swap it in. Operator
    /// records are carried over untouched.
    pub async fn refresh(&self) {
        // Build the replacement entries before taking the write lock.
        let rebuilt: Vec<IntelEntry> = seed_dataset()
            .into_iter()
            .map(|record| entry(record, true))
            .collect();

        let mut state = self.state.write().await;
        state.entries.retain(|_, e| !e.seeded);
        for e in rebuilt {
            state.entries.insert(e.record.id.clone(), e);
        }
        state.last_refresh = Utc::now();
        state.refresh_count += 1;
        crate::metrics::INTEL_REFRESHES_TOTAL.inc();
        info!(records = state.entries.len(), "threat intelligence refreshed");
    }

    /// Spawn the periodic refresh task.
    pub fn spawn_refresh(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; the store is already seeded.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.refresh().await;
            }
        })
    }
}

/// Bundled threat catalog. Stands in for an external feed subscription.
fn seed_dataset() -> Vec<ThreatIntelligence> {
    let now = Utc::now();
    let record = |id: &str,
                  threat_type: ThreatType,
                  severity: Severity,
                  confidence: u8,
                  description: &str,
                  indicators: ThreatIndicators,
                  tags: &[&str],
                  attribution: Option<&str>| ThreatIntelligence {
        id: id.to_string(),
        threat_type,
        severity,
        indicators,
        description: description.to_string(),
        first_seen: now - chrono::Duration::days(90),
        last_seen: now,
        confidence,
        source: "fortress-bundled-feed".to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        attribution: attribution.map(|a| a.to_string()),
    };

    vec![
        record(
            "intel-wallet-drainer-001",
            ThreatType::Malware,
            Severity::Critical,
            95,
            "Wallet-drainer kit observed sweeping approvals to a fixed sink address",
            ThreatIndicators {
                addresses: vec![
                    "0x098B716B8Aaf21512996dC57EB0615e2383E2f96".to_string(),
                    "0x6b75d8AF000000e20B7a7DDf000Ba900b4009A80".to_string(),
                ],
                patterns: vec![r"(?i)setApprovalForAll\s*\(\s*0x098B".to_string()],
                ..Default::default()
            },
            &["drainer", "approvals"],
            None,
        ),
        record(
            "intel-phishing-domains-014",
            ThreatType::Phishing,
            Severity::High,
            88,
            "Credential-harvesting domains impersonating wallet providers",
            ThreatIndicators {
                domains: vec![
                    "metamask-wallet-verify.app".to_string(),
                    "secure-walletconnect.net".to_string(),
                    "opensea-claims.xyz".to_string(),
                ],
                ..Default::default()
            },
            &["phishing", "wallet"],
            None,
        ),
        record(
            "intel-rugpull-factory-007",
            ThreatType::Rugpull,
            Severity::High,
            80,
            "Token factory emitting contracts with hidden owner-only mint and trading locks",
            ThreatIndicators {
                patterns: vec![
                    r"(?i)function\s+setTradingEnabled".to_string(),
                    r"(?i)onlyOwner\s+.*\bmint\s*\(".to_string(),
                ],
                ..Default::default()
            },
            &["rugpull", "honeypot"],
            None,
        ),
        record(
            "intel-malware-loader-021",
            ThreatType::Malware,
            Severity::Critical,
            92,
            "Second-stage loader distributed through typosquatted packages",
            ThreatIndicators {
                file_hashes: vec![
                    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855".to_string(),
                    "5f70bf18a086007016e948b04aed3b82103a36bea41755b6cddfaf10ace3c6ef".to_string(),
                ],
                patterns: vec![r"eval\s*\(\s*atob\s*\(".to_string()],
                ..Default::default()
            },
            &["loader", "supply-chain"],
            None,
        ),
        record(
            "intel-scam-giveaway-033",
            ThreatType::Scam,
            Severity::Medium,
            75,
            "Fake giveaway pages soliciting seed phrases",
            ThreatIndicators {
                domains: vec!["eth-giveaway-official.com".to_string()],
                patterns: vec![r"(?i)send\s+.{0,20}\s+receive\s+double".to_string()],
                ..Default::default()
            },
            &["scam", "giveaway"],
            None,
        ),
        record(
            "intel-exploit-reentrancy-040",
            ThreatType::Exploit,
            Severity::High,
            85,
            "Reentrancy exploitation tooling probing callback-heavy contracts",
            ThreatIndicators {
                patterns: vec![r#"\.call\{value:.*\}\s*\(\s*\"\"\s*\)"#.to_string()],
                ips: vec!["198.51.100.23".to_string()],
                ..Default::default()
            },
            &["exploit", "reentrancy"],
            None,
        ),
        record(
            "intel-apt-lazarus-traderapp-052",
            ThreatType::Apt,
            Severity::Critical,
            90,
            "Trojanized trading applications attributed to a state-aligned intrusion set",
            ThreatIndicators {
                domains: vec!["tradingview-pro-desk.com".to_string()],
                file_hashes: vec![
                    "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae".to_string(),
                ],
                ips: vec!["203.0.113.77".to_string()],
                ..Default::default()
            },
            &["apt", "trojan"],
            Some("Lazarus Group"),
        ),
    ]
}
