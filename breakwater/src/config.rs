//! Pipeline configuration.
//!
//! Plain serde structs with defaults, builder-style setters and a validation
//! pass. Durations are stored in milliseconds so JSON stays readable; the
//! accessors return [`Duration`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backoff::BackoffType;
use crate::errors::ConfigError;
use crate::outcome::ShouldHandle;

/// Configuration for the retry controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per invocation, including the first.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub backoff_type: BackoffType,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Whether to apply full jitter.
    pub jitter: bool,
    /// Which outcomes are retried.
    pub should_handle: ShouldHandle,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_type: BackoffType::Constant,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: true,
            should_handle: ShouldHandle::default(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffType) -> Self {
        self.backoff_type = backoff;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Enables or disables full jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the retry predicate.
    #[must_use]
    pub fn with_should_handle(mut self, rules: ShouldHandle) -> Self {
        self.should_handle = rules;
        self
    }

    /// Base delay as a duration.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum delay as a duration.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Validates the retry settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be >= 1"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                format!(
                    "{} exceeds retry.max_delay_ms ({})",
                    self.base_delay_ms, self.max_delay_ms
                ),
            ));
        }
        Ok(())
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// How long the breaker stays open before admitting a probe, in milliseconds.
    pub break_duration_ms: u64,
    /// Length of the trailing sampling window in milliseconds.
    pub sampling_duration_ms: u64,
    /// Handled-failure ratio at or above which the breaker opens.
    pub failure_ratio: f64,
    /// Minimum samples in the window before the ratio is considered.
    pub minimum_throughput: u32,
    /// Which outcomes count as failures.
    pub should_handle: ShouldHandle,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            break_duration_ms: 15_000,
            sampling_duration_ms: 30_000,
            failure_ratio: 0.2,
            minimum_throughput: 3,
            should_handle: ShouldHandle::default(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a new breaker config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the break duration.
    #[must_use]
    pub fn with_break_duration_ms(mut self, ms: u64) -> Self {
        self.break_duration_ms = ms;
        self
    }

    /// Sets the sampling window.
    #[must_use]
    pub fn with_sampling_duration_ms(mut self, ms: u64) -> Self {
        self.sampling_duration_ms = ms;
        self
    }

    /// Sets the failure ratio.
    #[must_use]
    pub fn with_failure_ratio(mut self, ratio: f64) -> Self {
        self.failure_ratio = ratio;
        self
    }

    /// Sets the minimum throughput.
    #[must_use]
    pub fn with_minimum_throughput(mut self, throughput: u32) -> Self {
        self.minimum_throughput = throughput;
        self
    }

    /// Sets the breaker predicate.
    #[must_use]
    pub fn with_should_handle(mut self, rules: ShouldHandle) -> Self {
        self.should_handle = rules;
        self
    }

    /// Break duration as a duration.
    #[must_use]
    pub fn break_duration(&self) -> Duration {
        Duration::from_millis(self.break_duration_ms)
    }

    /// Sampling window as a duration.
    #[must_use]
    pub fn sampling_duration(&self) -> Duration {
        Duration::from_millis(self.sampling_duration_ms)
    }

    /// Validates the breaker settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.break_duration_ms == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.break_duration_ms",
                "must be positive",
            ));
        }
        if self.sampling_duration_ms == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.sampling_duration_ms",
                "must be positive",
            ));
        }
        if !(self.failure_ratio > 0.0 && self.failure_ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_ratio",
                format!("{} is outside (0, 1]", self.failure_ratio),
            ));
        }
        if self.minimum_throughput < 1 {
            return Err(ConfigError::invalid(
                "circuit_breaker.minimum_throughput",
                "must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Configuration for the per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Budget for a single attempt in milliseconds.
    pub per_attempt_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            per_attempt_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    /// Creates a timeout config with the given budget.
    #[must_use]
    pub fn new(per_attempt_ms: u64) -> Self {
        Self { per_attempt_ms }
    }

    /// Per-attempt budget as a duration.
    #[must_use]
    pub fn per_attempt(&self) -> Duration {
        Duration::from_millis(self.per_attempt_ms)
    }

    /// Validates the timeout settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_attempt_ms == 0 {
            return Err(ConfigError::invalid("timeout.per_attempt_ms", "must be positive"));
        }
        Ok(())
    }
}

/// Complete configuration for a [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retry settings.
    pub retry: RetryConfig,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Timeout settings.
    pub timeout: TimeoutConfig,
}

impl PipelineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the retry settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the breaker settings.
    #[must_use]
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = breaker;
        self
    }

    /// Replaces the timeout settings.
    #[must_use]
    pub fn with_timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.timeout.validate()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::HandleRule;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.circuit_breaker.break_duration(), Duration::from_secs(15));
        assert_eq!(config.circuit_breaker.sampling_duration(), Duration::from_secs(30));
        assert_eq!(config.timeout.per_attempt(), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_backoff(BackoffType::Exponential)
            .with_base_delay_ms(200)
            .with_max_delay_ms(2000)
            .with_jitter(false);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_type, BackoffType::Exponential);
        assert_eq!(config.base_delay(), Duration::from_millis(200));
        assert_eq!(config.max_delay(), Duration::from_secs(2));
        assert!(!config.jitter);
    }

    #[test]
    fn test_retry_validation() {
        assert!(RetryConfig::new().with_max_attempts(0).validate().is_err());
        assert!(RetryConfig::new()
            .with_base_delay_ms(5000)
            .with_max_delay_ms(1000)
            .validate()
            .is_err());
    }

    #[test]
    fn test_breaker_validation() {
        assert!(CircuitBreakerConfig::new().with_failure_ratio(0.0).validate().is_err());
        assert!(CircuitBreakerConfig::new().with_failure_ratio(1.5).validate().is_err());
        assert!(CircuitBreakerConfig::new().with_failure_ratio(f64::NAN).validate().is_err());
        assert!(CircuitBreakerConfig::new().with_minimum_throughput(0).validate().is_err());
        assert!(CircuitBreakerConfig::new().with_break_duration_ms(0).validate().is_err());
        assert!(CircuitBreakerConfig::new().with_sampling_duration_ms(0).validate().is_err());
        assert!(CircuitBreakerConfig::new().with_failure_ratio(1.0).validate().is_ok());
    }

    #[test]
    fn test_timeout_validation() {
        assert!(TimeoutConfig::new(0).validate().is_err());
        assert!(TimeoutConfig::new(1).validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "retry": { "max_attempts": 3, "backoff_type": "exponential", "jitter": false },
                "circuit_breaker": {
                    "failure_ratio": 0.5,
                    "should_handle": [{ "rule": "status_code", "codes": [408, 429] }]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_type, BackoffType::Exponential);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.circuit_breaker.failure_ratio, 0.5);
        assert_eq!(
            config.circuit_breaker.should_handle.rules(),
            &[HandleRule::StatusCode { codes: vec![408, 429] }]
        );
        assert_eq!(config.timeout, TimeoutConfig::default());
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let err = PipelineConfig::from_json_str(r#"{ "retry": { "max_attempts": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "retry.max_attempts", .. }));

        let err = PipelineConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "timeout": { "per_attempt_ms": 250 } }"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.timeout.per_attempt(), Duration::from_millis(250));

        let missing = PipelineConfig::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
