//! Pipeline configuration and deployment credentials

use crate::error::PipelineError;
use flowforge_learn::BackoffPolicy;
use std::time::Duration;

/// Environment variable holding the deployment API token
pub const TOKEN_ENV: &str = "FLOWFORGE_API_TOKEN";
/// Environment variable holding the deployment account id
pub const ACCOUNT_ENV: &str = "FLOWFORGE_ACCOUNT_ID";

/// Tunable pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard cap on validate-refine iterations
    pub max_refine_attempts: u32,
    /// Confidence bar for a fix to count as proven
    pub fix_confidence_threshold: f64,
    /// Applied-count bar for a fix to count as proven
    pub min_fix_applications: u32,
    /// Maximum proven fixes pulled per refine pass
    pub proven_fix_limit: usize,
    /// Bound on every external collaborator call
    pub call_timeout: Duration,
    /// Settle interval before the health probe snapshots the conversation
    pub settle_interval: Duration,
    /// Repository transport backoff policy
    pub backoff: BackoffPolicy,
}

impl PipelineConfig {
    /// Create the default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With refine attempt cap
    #[inline]
    #[must_use]
    pub fn with_max_refine_attempts(mut self, attempts: u32) -> Self {
        self.max_refine_attempts = attempts;
        self
    }

    /// With call timeout
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// With health-probe settle interval
    #[inline]
    #[must_use]
    pub fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    /// With proven-fix thresholds
    #[inline]
    #[must_use]
    pub fn with_fix_thresholds(mut self, min_confidence: f64, min_applied: u32) -> Self {
        self.fix_confidence_threshold = min_confidence;
        self.min_fix_applications = min_applied;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_refine_attempts: 5,
            fix_confidence_threshold: 0.8,
            min_fix_applications: 3,
            proven_fix_limit: 10,
            call_timeout: Duration::from_secs(30),
            settle_interval: Duration::from_secs(8),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Deployment credential, validated during preflight
#[derive(Debug, Clone)]
pub struct DeployCredentials {
    /// API token
    pub api_token: String,
    /// Account identifier
    pub account_id: String,
}

impl DeployCredentials {
    /// Create from explicit values
    #[inline]
    #[must_use]
    pub fn new(api_token: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            account_id: account_id.into(),
        }
    }

    /// Read from the process environment.
    ///
    /// # Errors
    /// Returns a credential error when either variable is absent.
    pub fn from_env() -> Result<Self, PipelineError> {
        let api_token = std::env::var(TOKEN_ENV)
            .map_err(|_| PipelineError::CredentialMissing(TOKEN_ENV.to_string()))?;
        let account_id = std::env::var(ACCOUNT_ENV)
            .map_err(|_| PipelineError::CredentialMissing(ACCOUNT_ENV.to_string()))?;
        Ok(Self { api_token, account_id })
    }

    /// Validate shape before any generation cost is spent.
    ///
    /// # Errors
    /// Returns a credential error for empty or whitespace-bearing values.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.api_token.trim().is_empty() {
            return Err(PipelineError::CredentialMalformed("empty api token".to_string()));
        }
        if self.api_token.chars().any(char::is_whitespace) {
            return Err(PipelineError::CredentialMalformed(
                "api token contains whitespace".to_string(),
            ));
        }
        if self.account_id.trim().is_empty() {
            return Err(PipelineError::CredentialMalformed("empty account id".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = PipelineConfig::new();
        assert_eq!(config.max_refine_attempts, 5);
        assert!((config.fix_confidence_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.min_fix_applications, 3);
    }

    #[test]
    fn builder_overrides() {
        let config = PipelineConfig::new()
            .with_max_refine_attempts(2)
            .with_fix_thresholds(0.9, 5)
            .with_settle_interval(Duration::from_millis(10));
        assert_eq!(config.max_refine_attempts, 2);
        assert_eq!(config.min_fix_applications, 5);
        assert_eq!(config.settle_interval, Duration::from_millis(10));
    }

    #[test]
    fn credential_validation() {
        assert!(DeployCredentials::new("tok_0123456789", "acct_1").validate().is_ok());
        assert!(matches!(
            DeployCredentials::new("", "acct_1").validate(),
            Err(PipelineError::CredentialMalformed(_))
        ));
        assert!(matches!(
            DeployCredentials::new("bad token", "acct_1").validate(),
            Err(PipelineError::CredentialMalformed(_))
        ));
        assert!(matches!(
            DeployCredentials::new("tok_0123456789", " ").validate(),
            Err(PipelineError::CredentialMalformed(_))
        ));
    }
}
