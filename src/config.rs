//! Service configuration: defaults overridable from the environment.

use crate::errors::ConfigError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Maximum submitted code size for the standard scan endpoint.
    pub max_code_bytes: usize,
    /// Maximum submitted code size for the premium scan endpoint.
    pub max_premium_code_bytes: usize,
    /// Standard scan rate limit: window and maximum requests inside it.
    pub scan_rate_window_secs: u64,
    pub scan_rate_max_requests: u32,
    /// Hard budget for one external-analyzer run.
    pub analyzer_timeout: Duration,
    /// Interval between threat-intelligence refreshes.
    pub intel_refresh_interval: Duration,
    pub off_hours_enabled: bool,
    pub off_hours_start: u32,
    pub off_hours_end: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            max_code_bytes: 1024 * 1024,
            max_premium_code_bytes: 5 * 1024 * 1024,
            scan_rate_window_secs: 300,
            scan_rate_max_requests: 3,
            analyzer_timeout: Duration::from_secs(30),
            intel_refresh_interval: Duration::from_secs(3600),
            off_hours_enabled: false,
            off_hours_start: 2,
            off_hours_end: 5,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, current: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(current),
    }
}

impl AppConfig {
    /// Defaults overridden by `FORTRESS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: parse_env("FORTRESS_BIND_ADDR", defaults.bind_addr)?,
            max_code_bytes: parse_env("FORTRESS_MAX_CODE_BYTES", defaults.max_code_bytes)?,
            max_premium_code_bytes: parse_env(
                "FORTRESS_MAX_PREMIUM_CODE_BYTES",
                defaults.max_premium_code_bytes,
            )?,
            scan_rate_window_secs: parse_env(
                "FORTRESS_SCAN_RATE_WINDOW_SECS",
                defaults.scan_rate_window_secs,
            )?,
            scan_rate_max_requests: parse_env(
                "FORTRESS_SCAN_RATE_MAX_REQUESTS",
                defaults.scan_rate_max_requests,
            )?,
            analyzer_timeout: Duration::from_millis(parse_env(
                "FORTRESS_ANALYZER_TIMEOUT_MS",
                defaults.analyzer_timeout.as_millis() as u64,
            )?),
            intel_refresh_interval: Duration::from_secs(parse_env(
                "FORTRESS_INTEL_REFRESH_SECS",
                defaults.intel_refresh_interval.as_secs(),
            )?),
            off_hours_enabled: parse_env("FORTRESS_OFF_HOURS_ENABLED", defaults.off_hours_enabled)?,
            off_hours_start: parse_env("FORTRESS_OFF_HOURS_START", defaults.off_hours_start)?,
            off_hours_end: parse_env("FORTRESS_OFF_HOURS_END", defaults.off_hours_end)?,
        })
    }
}
