use super::*;

#[test]
fn test_validate_default_config() {
    let config = Config::default();
    let result = ConfigValidator::validate(&config);
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "executor.api_key"));
}

#[test]
fn test_validate_zero_poll_interval() {
    let mut config = Config::default();
    config.scheduler.poll_interval_secs = 0;

    let result = ConfigValidator::validate(&config);
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "scheduler.poll_interval_secs"));
}

#[test]
fn test_validate_zero_workers() {
    let mut config = Config::default();
    config.scheduler.max_workers = 0;

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "scheduler.max_workers"));
}

#[test]
fn test_validate_many_workers_warns() {
    let mut config = Config::default();
    config.scheduler.max_workers = 128;

    let result = ConfigValidator::validate(&config);
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "scheduler.max_workers"));
}

#[test]
fn test_validate_unknown_timezone() {
    let mut config = Config::default();
    config.scheduler.timezone = "Mars/Olympus_Mons".to_string();

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "scheduler.timezone"));
}

#[test]
fn test_validate_known_timezone() {
    let mut config = Config::default();
    config.scheduler.timezone = "Asia/Shanghai".to_string();

    assert!(ConfigValidator::validate(&config).is_valid());
}

#[test]
fn test_validate_endpoint_scheme() {
    let mut config = Config::default();
    config.executor.endpoint_url = "ftp://example.com".to_string();

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "executor.endpoint_url"));
}

#[test]
fn test_validate_zero_timeout() {
    let mut config = Config::default();
    config.executor.timeout_secs = 0;

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "executor.timeout_secs"));
}

#[test]
fn test_into_result_reports_every_error() {
    let mut config = Config::default();
    config.scheduler.poll_interval_secs = 0;
    config.executor.timeout_secs = 0;

    let err = ConfigValidator::validate(&config).into_result().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(ref errors) if errors.len() == 2));
    assert_eq!(
        err.fields(),
        vec!["scheduler.poll_interval_secs", "executor.timeout_secs"]
    );
}

#[test]
fn test_into_result_keeps_warnings() {
    let warnings = ConfigValidator::validate(&Config::default())
        .into_result()
        .unwrap();
    assert_eq!(warnings.len(), 1);
}
