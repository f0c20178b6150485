//! Immutable configuration of a single log generation run.

use std::{fmt, time::Duration};

use rama::http::Uri;
use secrecy::SecretString;

/// Configuration captured once at the start of a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub identity: RunIdentity,
    /// Requested emission rate, `None` is rejected by the planner.
    pub rate: Option<Rate>,
    /// Size of the payload in bytes.
    pub message_size: usize,
    /// Emission duration in minutes.
    pub duration_minutes: u64,
    /// How long to wait for the backend after emission completed.
    pub timeout: Duration,
    pub backend: Option<BackendConfig>,
}

/// Identifying metadata, copied verbatim into the result record.
#[derive(Debug, Clone, Default)]
pub struct RunIdentity {
    pub uuid: String,
    pub cluster_name: String,
    pub user: String,
    pub pod_name: String,
    pub pod_count: u32,
}

/// Rate at which messages are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    PerMinute(u64),
    PerSecond(u64),
}

impl Rate {
    /// Pick the active rate mode from the two optional inputs.
    ///
    /// The per-minute rate wins if both are given.
    pub fn from_options(per_minute: Option<u64>, per_second: Option<u64>) -> Option<Self> {
        per_minute
            .map(Self::PerMinute)
            .or_else(|| per_second.map(Self::PerSecond))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerMinute(n) => write!(f, "{n} msg/min"),
            Self::PerSecond(n) => write!(f, "{n} msg/s"),
        }
    }
}

/// Connection parameters of the backend used to confirm delivery.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Insights(InsightsConfig),
    Search(SearchConfig),
}

/// Log insights (CloudWatch Logs) query service.
#[derive(Debug, Clone)]
pub struct InsightsConfig {
    pub log_group: String,
    pub region: String,
    /// Explicit credentials, ambient credentials are used when absent.
    pub credentials: Option<StaticCredentials>,
}

#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

/// Document search (Elasticsearch compatible) count endpoint.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: Uri,
    pub index: String,
    pub bearer_token: Option<SecretString>,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_from_options() {
        assert_eq!(None, Rate::from_options(None, None));
        assert_eq!(Some(Rate::PerMinute(60)), Rate::from_options(Some(60), None));
        assert_eq!(Some(Rate::PerSecond(10)), Rate::from_options(None, Some(10)));
        assert_eq!(
            Some(Rate::PerMinute(60)),
            Rate::from_options(Some(60), Some(10))
        );
    }

    #[test]
    fn test_rate_display() {
        assert_eq!("120 msg/min", Rate::PerMinute(120).to_string());
        assert_eq!("7 msg/s", Rate::PerSecond(7).to_string());
    }
}
