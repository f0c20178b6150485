use std::time::Duration;

use rama::{
    Service,
    error::{BoxError, ErrorContext as _},
    http::{
        BodyExtractExt as _, Request, Response, Uri, service::client::HttpClientExt as _,
    },
    service::BoxService,
    telemetry::tracing,
};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;

use crate::{client::new_web_client, config::SearchConfig, payload::Payload};

use super::{MessageCounter, QueryWindow};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Counts messages through the `_count` API of a document search index.
pub struct SearchCounter<C> {
    client: C,
    base_url: Uri,
    count_uri: Uri,
    bearer_token: Option<SecretString>,
}

impl<C> std::fmt::Debug for SearchCounter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCounter")
            .field("count_uri", &self.count_uri)
            .field("bearer_token", &self.bearer_token.is_some())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

impl SearchCounter<BoxService<Request, Response, BoxError>> {
    pub fn try_new(cfg: &SearchConfig) -> Result<Self, BoxError> {
        let client = new_web_client(cfg.insecure).context("create search web client")?;
        Self::try_with_client(client, cfg)
    }
}

impl<C> SearchCounter<C>
where
    C: Service<Request, Output = Response, Error = BoxError>,
{
    pub fn try_with_client(client: C, cfg: &SearchConfig) -> Result<Self, BoxError> {
        let count_uri = count_uri(&cfg.base_url, &cfg.index)?;
        Ok(Self {
            client,
            base_url: cfg.base_url.clone(),
            count_uri,
            bearer_token: cfg.bearer_token.clone(),
        })
    }

    async fn try_count(&self, payload: &Payload, window: QueryWindow) -> Result<u64, BoxError> {
        let mut req_builder = self
            .client
            .post(self.count_uri.clone())
            .json(&count_query(payload, &window.padded()));

        if let Some(token) = &self.bearer_token {
            req_builder =
                req_builder.header("Authorization", format!("Bearer {}", token.expose_secret()));
        }

        let resp = tokio::time::timeout(REQUEST_TIMEOUT, req_builder.send())
            .await
            .context("count request timed out")?
            .context("send count request")
            .with_context_field("uri", || self.count_uri.clone())?;

        let status = resp.status();
        let body = resp
            .try_into_string()
            .await
            .context("collect count response payload")?;

        let CountResponse { count } = serde_json::from_str(&body)
            .context("no valid count json returned")
            .with_context_field("status", || status)?;

        Ok(count)
    }
}

fn count_uri(base_url: &Uri, index: &str) -> Result<Uri, BoxError> {
    let base = base_url.to_string();
    let uri = format!("{}/{index}/_count", base.trim_end_matches('/'))
        .parse()
        .context("build search count uri")
        .with_context_field("index", || index.to_owned())?;
    Ok(uri)
}

/// Count query body: must match the payload, filtered on the window timestamps.
pub fn count_query(payload: &Payload, window: &QueryWindow) -> serde_json::Value {
    serde_json::json!({
        "query": {
            "bool": {
                "must": [
                    { "match": { "message": payload.as_str() } }
                ],
                "filter": [
                    {
                        "range": {
                            "@timestamp": {
                                "gte": window.start_rfc3339(),
                                "lte": window.end_rfc3339(),
                            }
                        }
                    }
                ]
            }
        }
    })
}

impl<C> MessageCounter for SearchCounter<C>
where
    C: Service<Request, Output = Response, Error = BoxError>,
{
    async fn count_matching(&self, payload: &Payload, window: QueryWindow) -> u64 {
        tracing::info!(uri = %self.count_uri, "checking ElasticSearch for expected messages");

        match self.try_count(payload, window).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!("ElasticSearch query failed; count as zero: {err}");
                0
            }
        }
    }

    async fn probe(&self) {
        match tokio::time::timeout(REQUEST_TIMEOUT, self.client.get(self.base_url.clone()).send())
            .await
        {
            Ok(Ok(resp)) => {
                tracing::info!(
                    uri = %self.base_url,
                    status = %resp.status(),
                    "ElasticSearch cluster responded to probe"
                );
            }
            Ok(Err(err)) => {
                tracing::warn!(uri = %self.base_url, "ElasticSearch probe failed: {err}");
            }
            Err(_) => {
                tracing::warn!(uri = %self.base_url, "ElasticSearch probe timed out");
            }
        }
    }
}
