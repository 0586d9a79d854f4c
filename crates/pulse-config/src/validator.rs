//! Configuration validation.

use chrono_tz::Tz;

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// `Err` with every error found, or the warnings when there are none.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ConfigError::Invalid(self.errors))
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_scheduler(config, &mut result);
        Self::validate_executor(config, &mut result);

        result
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        let scheduler = &config.scheduler;

        if scheduler.poll_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "scheduler.poll_interval_secs",
                "poll_interval_secs must be greater than 0",
            ));
        }

        if scheduler.max_workers == 0 {
            result.add_error(ValidationError::new(
                "scheduler.max_workers",
                "max_workers must be greater than 0",
            ));
        } else if scheduler.max_workers > 64 {
            result.add_warning(ValidationWarning::new(
                "scheduler.max_workers",
                "max_workers is very high (>64), the execution endpoint may be overwhelmed",
            ));
        }

        if scheduler.batch_limit == 0 {
            result.add_error(ValidationError::new(
                "scheduler.batch_limit",
                "batch_limit must be greater than 0",
            ));
        }

        if scheduler.timezone.parse::<Tz>().is_err() {
            result.add_error(ValidationError::new(
                "scheduler.timezone",
                format!("Unknown IANA timezone: {}", scheduler.timezone),
            ));
        }
    }

    fn validate_executor(config: &Config, result: &mut ValidationResult) {
        let executor = &config.executor;

        if !executor.endpoint_url.starts_with("http://")
            && !executor.endpoint_url.starts_with("https://")
        {
            result.add_error(ValidationError::new(
                "executor.endpoint_url",
                "endpoint_url must start with http:// or https://",
            ));
        }

        if executor.timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "executor.timeout_secs",
                "timeout_secs must be greater than 0",
            ));
        }

        if executor.api_key.is_none() {
            result.add_warning(ValidationWarning::new(
                "executor.api_key",
                "API key is not set, execution requests will be unauthenticated",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
