#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, future_incompatible)]

//! Zero-trust risk scoring and multi-phase code scanning service.
//!
//! The crate is split along the request path: [`zero_trust`] gates every
//! inbound request, [`scan_orchestrator`] drives the scanning pipeline over
//! [`threat_patterns`], [`behavioral_analyzer`], and [`external_analyzer`],
//! and [`threat_correlation`] fuses scan findings with the
//! [`threat_intelligence`] catalog into a single assessment.

pub mod behavioral_analyzer;
pub mod config;
pub mod errors;
pub mod external_analyzer;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod scan_orchestrator;
pub mod security_logging;
pub mod threat_correlation;
pub mod threat_intelligence;
pub mod threat_patterns;
pub mod threat_types;
pub mod validation;
pub mod zero_trust;

use axum::{
    http,
    middleware,
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use config::AppConfig;
use models::MonitorConfig;
use scan_orchestrator::ScanOrchestrator;
use security_logging::{SecurityLogger, EVENT_LOG_CAPACITY};
use threat_intelligence::ThreatIntelStore;
use zero_trust::{PolicyRequirements, RateLimit, ZeroTrustConfig, ZeroTrustEngine, ZeroTrustPolicy};

pub struct AppState {
    pub config: AppConfig,
    pub engine: ZeroTrustEngine,
    pub orchestrator: ScanOrchestrator,
    pub intel: ThreatIntelStore,
    pub logger: Arc<SecurityLogger>,
    pub monitors: RwLock<HashMap<String, MonitorConfig>>,
    pub http: reqwest::Client,
}

/// Assemble the shared application state: the audit log, the zero-trust
/// engine with its default policies, the scan orchestrator, and the seeded
/// threat-intelligence store.
pub fn build_state(config: AppConfig) -> Arc<AppState> {
    let logger = Arc::new(SecurityLogger::new(EVENT_LOG_CAPACITY));
    let engine = ZeroTrustEngine::new(
        ZeroTrustConfig {
            off_hours_enabled: config.off_hours_enabled,
            off_hours_start: config.off_hours_start,
            off_hours_end: config.off_hours_end,
            ..ZeroTrustConfig::default()
        },
        Arc::clone(&logger),
    );
    register_default_policies(&engine, &config);

    Arc::new(AppState {
        engine,
        orchestrator: ScanOrchestrator::new(),
        intel: ThreatIntelStore::new(),
        logger,
        monitors: RwLock::new(HashMap::new()),
        http: reqwest::Client::new(),
        config,
    })
}

/// Policies evaluated first-match in registration order: the premium scan
/// endpoint is exempt from the standard scan rate limit, so it must be
/// registered ahead of the general scan policy.
fn register_default_policies(engine: &ZeroTrustEngine, config: &AppConfig) {
    engine.add_policy(ZeroTrustPolicy {
        id: "scan-premium".to_string(),
        endpoint_pattern: "/api/v1/scan/premium".to_string(),
        methods: vec!["POST".to_string()],
        requirements: PolicyRequirements::default(),
        log_all_requests: true,
    });
    engine.add_policy(ZeroTrustPolicy {
        id: "scan-standard".to_string(),
        endpoint_pattern: "/api/v1/scan*".to_string(),
        methods: vec!["POST".to_string()],
        requirements: PolicyRequirements {
            rate_limit: Some(RateLimit {
                window_secs: config.scan_rate_window_secs,
                max_requests: config.scan_rate_max_requests,
            }),
            ..PolicyRequirements::default()
        },
        log_all_requests: false,
    });
    engine.add_policy(ZeroTrustPolicy {
        id: "dashboard".to_string(),
        endpoint_pattern: "/api/v1/dashboard/*".to_string(),
        methods: vec!["GET".to_string()],
        requirements: PolicyRequirements {
            require_auth: true,
            ..PolicyRequirements::default()
        },
        log_all_requests: true,
    });
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = match std::env::var("ALLOWED_ORIGINS") {
        Ok(origins) if !origins.trim().is_empty() => {
            let mut layer = CorsLayer::new();
            for o in origins.split(',') {
                if let Ok(origin) = o.trim().parse::<http::HeaderValue>() {
                    layer = layer.allow_origin(origin);
                }
            }
            layer
        }
        // No origins unless explicitly configured.
        _ => CorsLayer::new(),
    };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/api/v1/scan", post(handlers::scan))
        .route("/api/v1/scan/premium", post(handlers::scan_premium))
        .route("/api/v1/scan/:scan_id", get(handlers::scan_result))
        .route("/api/v1/threats/feed", get(handlers::threats_feed))
        .route("/api/v1/monitor", post(handlers::register_monitor))
        .route(
            "/api/v1/compliance/:framework",
            get(handlers::compliance_report),
        )
        .route(
            "/api/v1/dashboard/metrics",
            get(handlers::dashboard_metrics),
        )
        .layer(middleware::from_fn(metrics::track_http_metrics))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
