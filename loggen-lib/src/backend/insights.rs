use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatchlogs::{Client, config::Credentials, types::QueryStatus};
use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};
use secrecy::ExposeSecret as _;
use tokio::time::sleep;

use crate::{config::InsightsConfig, payload::Payload, utils::env::project_name};

use super::{MessageCounter, QueryWindow};

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);
const QUERY_TIMEOUT: Duration = Duration::from_secs(300);
/// Status polls tolerated that do not list the started query.
const MAX_UNLISTED_POLLS: u32 = 5;

/// Counts messages using an asynchronous CloudWatch Logs Insights query.
#[derive(Debug, Clone)]
pub struct InsightsCounter {
    client: Client,
    log_group: String,
}

impl InsightsCounter {
    /// Explicit credentials are used when configured,
    /// otherwise the ambient AWS credential chain applies.
    pub async fn new(cfg: &InsightsConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(cfg.region.clone()));

        if let Some(creds) = &cfg.credentials {
            tracing::debug!(
                access_key_id = %creds.access_key_id,
                "use static credentials for insights queries"
            );
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.expose_secret().to_owned(),
                None,
                None,
                project_name(),
            ));
        }

        let sdk_config = loader.load().await;
        Self::with_client(Client::new(&sdk_config), cfg.log_group.clone())
    }

    pub fn with_client(client: Client, log_group: impl Into<String>) -> Self {
        Self {
            client,
            log_group: log_group.into(),
        }
    }

    async fn try_count(&self, payload: &Payload, window: QueryWindow) -> Result<u64, BoxError> {
        let window = window.padded();

        let query_id = self
            .client
            .start_query()
            .log_group_name(&self.log_group)
            .start_time(window.start_epoch_secs())
            .end_time(window.end_epoch_secs())
            .query_string(insights_query(payload))
            .send()
            .await
            .context("start insights query")
            .with_context_field("log_group", || self.log_group.clone())?
            .query_id()
            .map(ToOwned::to_owned)
            .context("insights query id missing from response")?;

        tracing::debug!(%query_id, "insights query started");
        self.wait_for_completion(&query_id).await?;

        let results = self
            .client
            .get_query_results()
            .query_id(&query_id)
            .send()
            .await
            .context("fetch insights query results")
            .with_context_field("query_id", || query_id.clone())?;

        let matched = results
            .statistics()
            .map(|stats| stats.records_matched())
            .context("insights query statistics missing")?;

        Ok(matched as u64)
    }

    async fn wait_for_completion(&self, query_id: &str) -> Result<(), BoxError> {
        let mut unlisted_polls = 0;
        loop {
            let described = self
                .client
                .describe_queries()
                .log_group_name(&self.log_group)
                .send()
                .await
                .context("describe insights queries")?;

            let Some(query) = described
                .queries()
                .iter()
                .find(|query| query.query_id() == Some(query_id))
            else {
                unlisted_polls += 1;
                if unlisted_polls >= MAX_UNLISTED_POLLS {
                    return Err(BoxError::from(format!(
                        "insights query {query_id} not listed after {unlisted_polls} status polls"
                    )));
                }
                tracing::debug!(%query_id, unlisted_polls, "insights query not listed yet");
                sleep(STATUS_POLL_INTERVAL).await;
                continue;
            };

            match query.status() {
                Some(QueryStatus::Complete) => return Ok(()),
                Some(
                    status @ (QueryStatus::Failed | QueryStatus::Cancelled | QueryStatus::Timeout),
                ) => {
                    return Err(BoxError::from(format!(
                        "insights query {query_id} ended with status {}",
                        status.as_str()
                    )));
                }
                status => {
                    tracing::trace!(%query_id, ?status, "insights query not yet complete");
                    sleep(STATUS_POLL_INTERVAL).await;
                }
            }
        }
    }
}

/// Insights query counting the records whose message equals the payload.
pub fn insights_query(payload: &Payload) -> String {
    format!(r#"fields @timestamp, @message | filter message = "{payload}" | stats count()"#)
}

impl MessageCounter for InsightsCounter {
    async fn count_matching(&self, payload: &Payload, window: QueryWindow) -> u64 {
        tracing::info!(log_group = %self.log_group, "checking CloudWatch for expected messages");

        match tokio::time::timeout(QUERY_TIMEOUT, self.try_count(payload, window)).await {
            Ok(Ok(count)) => count,
            Ok(Err(err)) => {
                tracing::warn!("insights query failed; count as zero: {err}");
                0
            }
            Err(_) => {
                tracing::warn!(
                    "insights query did not complete within {QUERY_TIMEOUT:?}; count as zero"
                );
                0
            }
        }
    }

    async fn probe(&self) {
        match self
            .client
            .describe_log_groups()
            .log_group_name_prefix(&self.log_group)
            .send()
            .await
        {
            Ok(output) => {
                let found = output
                    .log_groups()
                    .iter()
                    .any(|group| group.log_group_name() == Some(self.log_group.as_str()));
                if found {
                    tracing::info!(log_group = %self.log_group, "CloudWatch log group reachable");
                } else {
                    tracing::warn!(log_group = %self.log_group, "CloudWatch log group not found");
                }
            }
            Err(err) => {
                tracing::warn!(log_group = %self.log_group, "CloudWatch probe failed: {err}");
            }
        }
    }
}
