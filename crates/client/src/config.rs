use std::time::Duration;

use stemsplit_core::error::CoreError;
use stemsplit_core::job_status::DEFAULT_POLL_INTERVAL_SECS;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_UPLOAD_URL_PATH: &str = "/upload-url";
pub const DEFAULT_START_JOB_PATH: &str = "/start-job";
pub const DEFAULT_JOB_STATUS_PATH: &str = "/job-status";

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local development API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the API exposing the broker, launcher and status endpoints.
    pub api_url: String,
    pub upload_url_path: String,
    pub start_job_path: String,
    pub job_status_path: String,
    /// Cadence of status queries while a job is running.
    pub poll_interval: Duration,
    /// Per-request timeout. `None` means requests may wait indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            upload_url_path: DEFAULT_UPLOAD_URL_PATH.to_string(),
            start_job_path: DEFAULT_START_JOB_PATH.to_string(),
            job_status_path: DEFAULT_JOB_STATUS_PATH.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            request_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `STEMSPLIT_API_URL`              | `http://localhost:8000` |
    /// | `STEMSPLIT_UPLOAD_URL_PATH`      | `/upload-url`           |
    /// | `STEMSPLIT_START_JOB_PATH`       | `/start-job`            |
    /// | `STEMSPLIT_JOB_STATUS_PATH`      | `/job-status`           |
    /// | `STEMSPLIT_POLL_INTERVAL_SECS`   | `5`                     |
    /// | `STEMSPLIT_REQUEST_TIMEOUT_SECS` | unset (no timeout)      |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading values through
    /// `lookup`, so callers can supply their own source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let poll_interval = match var("STEMSPLIT_POLL_INTERVAL_SECS") {
            Some(raw) => Duration::from_secs(parse_secs("STEMSPLIT_POLL_INTERVAL_SECS", &raw)?),
            None => defaults.poll_interval,
        };

        let request_timeout = match var("STEMSPLIT_REQUEST_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_secs(
                "STEMSPLIT_REQUEST_TIMEOUT_SECS",
                &raw,
            )?)),
            None => None,
        };

        let config = Self {
            api_url: var("STEMSPLIT_API_URL").unwrap_or(defaults.api_url),
            upload_url_path: var("STEMSPLIT_UPLOAD_URL_PATH").unwrap_or(defaults.upload_url_path),
            start_job_path: var("STEMSPLIT_START_JOB_PATH").unwrap_or(defaults.start_job_path),
            job_status_path: var("STEMSPLIT_JOB_STATUS_PATH").unwrap_or(defaults.job_status_path),
            poll_interval,
            request_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work at all.
    pub fn validate(&self) -> Result<(), CoreError> {
        let api_url = self.api_url.trim();
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(CoreError::Validation(format!(
                "API URL must start with http:// or https://, got: '{api_url}'"
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(CoreError::Validation(
                "Poll interval must be at least one second".to_string(),
            ));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CoreError::Validation(
                "Request timeout must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64, CoreError> {
    raw.parse().map_err(|_| {
        CoreError::Validation(format!("{key} must be a whole number of seconds, got: '{raw}'"))
    })
}
