//! The result record handed to the caller at the end of a run.

use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::{
    config::{BackendConfig, Rate, RunConfig},
    confirm::Confirmation,
    schedule::Schedule,
};

/// Logical output category of a [`ResultRecord`].
pub const RESULTS_CATEGORY: &str = "results";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub uuid: String,
    pub cluster_name: String,
    pub pod_name: String,
    /// Planned emission duration in seconds.
    pub expected_duration: u64,
    pub total_expected_messages: u64,
    pub messages_per_second: f64,
    pub messages_per_minute: Option<u64>,
    pub message_size: usize,
    /// Confirmation timeout in seconds.
    pub timeout: u64,
    pub pod_count: u32,
    pub user: String,
    #[serde(flatten)]
    pub backend: Option<BackendInfo>,
    /// Start of the run, RFC 3339 in UTC.
    pub timestamp: String,
    /// Measured emission duration in seconds.
    pub actual_duration: u64,
    pub message_count: u64,
    #[serde(flatten)]
    pub confirmation: Option<ConfirmationInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "backend")]
pub enum BackendInfo {
    #[serde(rename = "cloudwatch")]
    Insights { cloudwatch_log_group: String },
    #[serde(rename = "elasticsearch")]
    Search { es_url: String, es_index: String },
}

impl From<&BackendConfig> for BackendInfo {
    fn from(cfg: &BackendConfig) -> Self {
        match cfg {
            BackendConfig::Insights(cfg) => Self::Insights {
                cloudwatch_log_group: cfg.log_group.clone(),
            },
            BackendConfig::Search(cfg) => Self::Search {
                es_url: cfg.base_url.to_string(),
                es_index: cfg.index.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationInfo {
    pub messages_confirmed_received: bool,
    pub messages_received: u64,
    /// Seconds between emission end and the confirmation outcome.
    pub post_complete_time: u64,
}

impl From<&Confirmation> for ConfirmationInfo {
    fn from(confirmation: &Confirmation) -> Self {
        Self {
            messages_confirmed_received: confirmation.all_received(),
            messages_received: confirmation.messages_received,
            post_complete_time: confirmation.post_complete_time.as_secs(),
        }
    }
}

/// Everything measured during a run, input of [`ResultRecord::build`].
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome<'a> {
    pub started_at: SystemTime,
    pub emission_elapsed: Duration,
    pub message_count: u64,
    pub confirmation: Option<&'a Confirmation>,
}

impl ResultRecord {
    /// Merge configuration, schedule and measurements into a record.
    pub fn build(cfg: &RunConfig, schedule: &Schedule, outcome: RunOutcome<'_>) -> Self {
        let identity = &cfg.identity;
        Self {
            uuid: identity.uuid.clone(),
            cluster_name: identity.cluster_name.clone(),
            pod_name: identity.pod_name.clone(),
            expected_duration: cfg.duration_minutes.saturating_mul(60),
            total_expected_messages: schedule.total_messages,
            messages_per_second: schedule.messages_per_second,
            messages_per_minute: match cfg.rate {
                Some(Rate::PerMinute(n)) => Some(n),
                _ => None,
            },
            message_size: cfg.message_size,
            timeout: cfg.timeout.as_secs(),
            pod_count: identity.pod_count,
            user: identity.user.clone(),
            backend: cfg.backend.as_ref().map(Into::into),
            timestamp: humantime::format_rfc3339_seconds(outcome.started_at).to_string(),
            actual_duration: outcome.emission_elapsed.as_secs(),
            message_count: outcome.message_count,
            confirmation: outcome.confirmation.map(Into::into),
        }
    }

    pub fn category(&self) -> &'static str {
        RESULTS_CATEGORY
    }

    /// The record wrapped with its output category, as written for the caller.
    pub fn to_tagged_json(&self) -> serde_json::Value {
        serde_json::json!({
            "category": self.category(),
            "data": self,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use rama::http::Uri;

    use super::*;
    use crate::{
        config::{InsightsConfig, RunIdentity, SearchConfig},
        confirm::ConfirmationState,
    };

    fn run_config(rate: Rate, backend: Option<BackendConfig>) -> RunConfig {
        RunConfig {
            identity: RunIdentity {
                uuid: "0d0d3e4e-run".to_owned(),
                cluster_name: "perf-cluster".to_owned(),
                user: "ci".to_owned(),
                pod_name: "loggen-0".to_owned(),
                pod_count: 3,
            },
            rate: Some(rate),
            message_size: 16,
            duration_minutes: 1,
            timeout: Duration::from_secs(600),
            backend,
        }
    }

    fn outcome(confirmation: Option<&Confirmation>) -> RunOutcome<'_> {
        RunOutcome {
            started_at: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            emission_elapsed: Duration::from_millis(60_400),
            message_count: 60,
            confirmation,
        }
    }

    #[test]
    fn test_record_without_backend() {
        let cfg = run_config(Rate::PerMinute(60), None);
        let schedule = Schedule::try_from_config(&cfg).unwrap();
        let record = ResultRecord::build(&cfg, &schedule, outcome(None));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            serde_json::json!({
                "uuid": "0d0d3e4e-run",
                "cluster_name": "perf-cluster",
                "pod_name": "loggen-0",
                "expected_duration": 60,
                "total_expected_messages": 60,
                "messages_per_second": 1.0,
                "messages_per_minute": 60,
                "message_size": 16,
                "timeout": 600,
                "pod_count": 3,
                "user": "ci",
                "timestamp": "2023-11-14T22:13:20Z",
                "actual_duration": 60,
                "message_count": 60,
            }),
            json
        );
    }

    #[test]
    fn test_record_with_search_backend_and_confirmation() {
        let cfg = run_config(
            Rate::PerSecond(100),
            Some(BackendConfig::Search(SearchConfig {
                base_url: Uri::from_static("https://es.example.com:9200"),
                index: "app*".to_owned(),
                bearer_token: None,
                insecure: true,
            })),
        );
        let schedule = Schedule::try_from_config(&cfg).unwrap();
        let confirmation = Confirmation {
            state: ConfirmationState::TimedOut,
            messages_received: 5990,
            post_complete_time: Duration::from_millis(601_700),
        };
        let record = ResultRecord::build(&cfg, &schedule, outcome(Some(&confirmation)));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!("elasticsearch", json["backend"]);
        assert_eq!("https://es.example.com:9200/", json["es_url"]);
        assert_eq!("app*", json["es_index"]);
        assert_eq!(serde_json::Value::Null, json["messages_per_minute"]);
        assert_eq!(100.0, json["messages_per_second"]);
        assert_eq!(6000, json["total_expected_messages"]);
        assert_eq!(false, json["messages_confirmed_received"]);
        assert_eq!(5990, json["messages_received"]);
        assert_eq!(601, json["post_complete_time"]);
    }

    #[test]
    fn test_record_with_insights_backend() {
        let cfg = run_config(
            Rate::PerMinute(600),
            Some(BackendConfig::Insights(InsightsConfig {
                log_group: "/ocp/application".to_owned(),
                region: "us-east-2".to_owned(),
                credentials: None,
            })),
        );
        let schedule = Schedule::try_from_config(&cfg).unwrap();
        let confirmation = Confirmation {
            state: ConfirmationState::Confirmed,
            messages_received: 600,
            post_complete_time: Duration::from_secs(12),
        };
        let record = ResultRecord::build(&cfg, &schedule, outcome(Some(&confirmation)));

        assert_eq!(
            Some(BackendInfo::Insights {
                cloudwatch_log_group: "/ocp/application".to_owned()
            }),
            record.backend
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!("cloudwatch", json["backend"]);
        assert_eq!("/ocp/application", json["cloudwatch_log_group"]);
        assert_eq!(true, json["messages_confirmed_received"]);
        assert_eq!(12, json["post_complete_time"]);
    }

    #[test]
    fn test_tagged_json() {
        let cfg = run_config(Rate::PerMinute(60), None);
        let schedule = Schedule::try_from_config(&cfg).unwrap();
        let record = ResultRecord::build(&cfg, &schedule, outcome(None));

        let tagged = record.to_tagged_json();
        assert_eq!("results", tagged["category"]);
        assert_eq!("0d0d3e4e-run", tagged["data"]["uuid"]);
    }
}
