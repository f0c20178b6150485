use std::time::Duration;

use clap::Args;
use loggen_lib::config::{
    BackendConfig, InsightsConfig, Rate, RunConfig, RunIdentity, SearchConfig, StaticCredentials,
};
use rama::http::Uri;
use secrecy::SecretString;

/// Options describing a single log generation run.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// unique identifier of the run, copied into the result record
    #[arg(long)]
    pub uuid: String,

    /// name of the cluster the generator runs in
    #[arg(long, default_value = "")]
    pub cluster_name: String,

    /// user that triggered the run
    #[arg(long, default_value = "")]
    pub user: String,

    /// name of the pod running this generator
    #[arg(long, default_value = "")]
    pub pod_name: String,

    /// amount of generator pods taking part in the run
    #[arg(long, default_value_t = 1)]
    pub pod_count: u32,

    /// size of each message in bytes
    #[arg(long, value_name = "BYTES", default_value_t = 512)]
    pub size: usize,

    /// amount of messages to emit per minute
    #[arg(long, value_name = "N", conflicts_with = "messages_per_second")]
    pub messages_per_minute: Option<u64>,

    /// amount of messages to emit per second
    #[arg(long, value_name = "N")]
    pub messages_per_second: Option<u64>,

    /// emission duration
    #[arg(long, value_name = "MINUTES", default_value_t = 1)]
    pub duration: u64,

    /// how long to wait for the backend to confirm all messages
    #[arg(long, value_name = "SECONDS", default_value_t = 600)]
    pub timeout: u64,

    #[command(flatten)]
    pub insights: InsightsArgs,

    #[command(flatten)]
    pub search: SearchArgs,
}

/// Confirm delivery using CloudWatch Logs Insights.
#[derive(Debug, Clone, Args)]
pub struct InsightsArgs {
    /// log group to query for the emitted messages
    #[arg(long, requires = "aws_region", conflicts_with = "es_url")]
    pub cloudwatch_log_group: Option<String>,

    /// AWS region of the log group
    #[arg(long)]
    pub aws_region: Option<String>,

    /// AWS access key id, ambient credentials are used when absent
    #[arg(long, requires = "aws_secret_key")]
    pub aws_access_key: Option<String>,

    /// AWS secret access key
    #[arg(long, value_parser = parse_secret, requires = "aws_access_key")]
    pub aws_secret_key: Option<SecretString>,
}

/// Confirm delivery using an Elasticsearch compatible count endpoint.
#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    /// base url of the search cluster
    #[arg(long, value_name = "URL")]
    pub es_url: Option<Uri>,

    /// index (pattern) to count the messages in
    #[arg(long, default_value = "app*")]
    pub es_index: String,

    /// bearer token used to authenticate with the search cluster
    #[arg(long, env = "ES_TOKEN", hide_env_values = true, value_parser = parse_secret)]
    pub es_token: Option<SecretString>,

    /// do not verify the TLS certificate of the search cluster
    #[arg(long, default_value_t = false)]
    pub es_insecure: bool,
}

fn parse_secret(value: &str) -> Result<SecretString, std::convert::Infallible> {
    Ok(SecretString::from(value))
}

impl RunArgs {
    pub fn into_run_config(self) -> RunConfig {
        let backend = self
            .insights
            .into_backend_config()
            .or_else(|| self.search.into_backend_config());

        RunConfig {
            identity: RunIdentity {
                uuid: self.uuid,
                cluster_name: self.cluster_name,
                user: self.user,
                pod_name: self.pod_name,
                pod_count: self.pod_count,
            },
            rate: Rate::from_options(self.messages_per_minute, self.messages_per_second),
            message_size: self.size,
            duration_minutes: self.duration,
            timeout: Duration::from_secs(self.timeout),
            backend,
        }
    }
}

impl InsightsArgs {
    fn into_backend_config(self) -> Option<BackendConfig> {
        let log_group = self.cloudwatch_log_group?;
        let credentials = match (self.aws_access_key, self.aws_secret_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id,
                secret_access_key,
            }),
            _ => None,
        };
        Some(BackendConfig::Insights(InsightsConfig {
            log_group,
            region: self.aws_region.unwrap_or_default(),
            credentials,
        }))
    }
}

impl SearchArgs {
    fn into_backend_config(self) -> Option<BackendConfig> {
        let base_url = self.es_url?;
        Some(BackendConfig::Search(SearchConfig {
            base_url,
            index: self.es_index,
            bearer_token: self.es_token,
            insecure: self.es_insecure,
        }))
    }
}
