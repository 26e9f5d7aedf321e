//! Request validation: size limits, required fields, and custom rule
//! compilation. Failures collect into a single structured error.

use crate::errors::AppError;
use crate::models::{CustomRuleSpec, FeedQuery, MonitorRequest, PremiumScanRequest, ScanRequest};
use crate::scan_orchestrator::CustomRule;
use crate::threat_types::Severity;
use regex::Regex;

const MAX_PROJECT_NAME_LEN: usize = 200;
const MAX_FEED_LIMIT: usize = 100;
const MAX_CUSTOM_RULES: usize = 50;

pub fn validate_scan_request(request: &ScanRequest, max_code_bytes: usize) -> Result<(), AppError> {
    let mut errors = Vec::new();
    check_code(&request.code, max_code_bytes, &mut errors);
    check_project_name(request.project_name.as_deref(), &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation(errors))
    }
}

/// Validates a premium request and compiles its custom rules.
pub fn validate_premium_request(
    request: &PremiumScanRequest,
    max_code_bytes: usize,
) -> Result<Vec<CustomRule>, AppError> {
    let mut errors = Vec::new();
    check_code(&request.code, max_code_bytes, &mut errors);
    check_project_name(request.project_name.as_deref(), &mut errors);

    let mut compiled = Vec::new();
    if let Some(specs) = &request.custom_rules {
        if specs.len() > MAX_CUSTOM_RULES {
            errors.push(format!(
                "customRules exceeds the maximum of {MAX_CUSTOM_RULES} rules"
            ));
        } else {
            for spec in specs {
                match compile_custom_rule(spec) {
                    Ok(rule) => compiled.push(rule),
                    Err(reason) => errors.push(reason),
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(compiled)
    } else {
        Err(AppError::validation(errors))
    }
}

pub fn validate_feed_query(query: &FeedQuery) -> Result<usize, AppError> {
    let limit = query.limit.unwrap_or(20);
    if limit == 0 || limit > MAX_FEED_LIMIT {
        return Err(AppError::validation(vec![format!(
            "limit must be between 1 and {MAX_FEED_LIMIT}, got {limit}"
        )]));
    }
    Ok(limit)
}

pub fn validate_monitor_request(request: &MonitorRequest) -> Result<(), AppError> {
    let mut errors = Vec::new();
    if request.application_id.trim().is_empty() {
        errors.push("applicationId must not be empty".to_string());
    }
    if !request.webhook_url.starts_with("http://") && !request.webhook_url.starts_with("https://")
    {
        errors.push("webhookUrl must be an http or https URL".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation(errors))
    }
}

fn check_code(code: &str, max_code_bytes: usize, errors: &mut Vec<String>) {
    if code.trim().is_empty() {
        errors.push("code must not be empty".to_string());
    }
    if code.len() > max_code_bytes {
        errors.push(format!(
            "code exceeds the maximum size of {max_code_bytes} bytes"
        ));
    }
}

fn check_project_name(project_name: Option<&str>, errors: &mut Vec<String>) {
    if let Some(name) = project_name {
        if name.len() > MAX_PROJECT_NAME_LEN {
            errors.push(format!(
                "projectName exceeds the maximum length of {MAX_PROJECT_NAME_LEN} characters"
            ));
        }
    }
}

fn compile_custom_rule(spec: &CustomRuleSpec) -> Result<CustomRule, String> {
    if spec.id.trim().is_empty() {
        return Err("custom rule id must not be empty".to_string());
    }
    let pattern = Regex::new(&spec.pattern)
        .map_err(|e| format!("custom rule '{}' has an invalid pattern: {e}", spec.id))?;
    Ok(CustomRule {
        id: spec.id.clone(),
        pattern,
        severity: spec.severity.unwrap_or(Severity::Medium),
        title: spec
            .title
            .clone()
            .unwrap_or_else(|| format!("Custom rule {}", spec.id)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_request(code: &str) -> ScanRequest {
        ScanRequest {
            code: code.to_string(),
            scan_mode: None,
            project_name: None,
            language: None,
        }
    }

    #[test]
    fn empty_code_rejected() {
        let err = validate_scan_request(&scan_request("   "), 1024).unwrap_err();
        match err {
            AppError::Validation { errors } => {
                assert!(errors.iter().any(|e| e.contains("must not be empty")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn oversized_code_rejected() {
        let err = validate_scan_request(&scan_request(&"a".repeat(2048)), 1024).unwrap_err();
        match err {
            AppError::Validation { errors } => {
                assert!(errors.iter().any(|e| e.contains("maximum size")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(validate_scan_request(&scan_request("let x = 1;"), 1024).is_ok());
    }

    #[test]
    fn feed_limit_bounds() {
        let query = FeedQuery {
            limit: Some(0),
            severity: None,
            threat_type: None,
        };
        assert!(validate_feed_query(&query).is_err());

        let query = FeedQuery {
            limit: Some(101),
            severity: None,
            threat_type: None,
        };
        assert!(validate_feed_query(&query).is_err());

        let query = FeedQuery {
            limit: None,
            severity: None,
            threat_type: None,
        };
        assert_eq!(validate_feed_query(&query).unwrap(), 20);
    }

    #[test]
    fn custom_rule_with_bad_regex_rejected() {
        let request = PremiumScanRequest {
            code: "ok".to_string(),
            scan_mode: None,
            project_name: None,
            language: None,
            include_remediation: None,
            generate_report: None,
            custom_rules: Some(vec![CustomRuleSpec {
                id: "bad".to_string(),
                pattern: "(unclosed".to_string(),
                severity: None,
                title: None,
            }]),
        };
        assert!(validate_premium_request(&request, 1024).is_err());
    }

    #[test]
    fn custom_rules_compile_with_defaults() {
        let request = PremiumScanRequest {
            code: "ok".to_string(),
            scan_mode: None,
            project_name: None,
            language: None,
            include_remediation: None,
            generate_report: None,
            custom_rules: Some(vec![CustomRuleSpec {
                id: "no-console".to_string(),
                pattern: r"console\.log".to_string(),
                severity: None,
                title: None,
            }]),
        };
        let rules = validate_premium_request(&request, 1024).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].severity, Severity::Medium);
        assert!(rules[0].title.contains("no-console"));
    }

    #[test]
    fn monitor_request_needs_http_url() {
        let request = MonitorRequest {
            application_id: "app-1".to_string(),
            webhook_url: "ftp://example.com/hook".to_string(),
            alert_thresholds: None,
        };
        assert!(validate_monitor_request(&request).is_err());
    }
}
