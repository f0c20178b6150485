//! Backends that can confirm how many emitted messages were ingested.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rama::{
    error::BoxError,
    http::{Request, Response},
    service::BoxService,
};

use crate::{config::BackendConfig, payload::Payload};

mod insights;
mod search;

pub use self::{
    insights::{InsightsCounter, insights_query},
    search::{SearchCounter, count_query},
};

/// Padding applied on both sides of a [`QueryWindow`],
/// to tolerate ingestion delays and clock skew.
pub const WINDOW_PADDING: Duration = Duration::from_secs(60);

/// Count the messages matching the payload within a time window.
///
/// Implementations pad the window with [`WINDOW_PADDING`] and never fail:
/// any query failure is logged and reported as zero matches,
/// such that the confirmation loop can retry until it times out.
pub trait MessageCounter: Send + Sync {
    fn count_matching(
        &self,
        payload: &Payload,
        window: QueryWindow,
    ) -> impl Future<Output = u64> + Send;

    /// Best-effort reachability check, only logs its outcome.
    fn probe(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

impl<T: MessageCounter> MessageCounter for Arc<T> {
    fn count_matching(
        &self,
        payload: &Payload,
        window: QueryWindow,
    ) -> impl Future<Output = u64> + Send {
        (**self).count_matching(payload, window)
    }

    fn probe(&self) -> impl Future<Output = ()> + Send {
        (**self).probe()
    }
}

/// Time span during which messages were emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: SystemTime,
    pub end: SystemTime,
}

impl QueryWindow {
    pub fn new(start: SystemTime, end: SystemTime) -> Self {
        Self { start, end }
    }

    /// This window, widened by [`WINDOW_PADDING`] on both sides.
    pub fn padded(&self) -> Self {
        Self {
            start: self
                .start
                .checked_sub(WINDOW_PADDING)
                .unwrap_or(UNIX_EPOCH),
            end: self.end + WINDOW_PADDING,
        }
    }

    pub fn start_epoch_secs(&self) -> i64 {
        epoch_secs(self.start)
    }

    pub fn end_epoch_secs(&self) -> i64 {
        epoch_secs(self.end)
    }

    pub fn start_rfc3339(&self) -> String {
        humantime::format_rfc3339_seconds(self.start).to_string()
    }

    pub fn end_rfc3339(&self) -> String {
        humantime::format_rfc3339_seconds(self.end).to_string()
    }
}

fn epoch_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// The backend selected for a run, created once from its [`BackendConfig`].
pub enum Backend {
    Insights(InsightsCounter),
    Search(SearchCounter<BoxService<Request, Response, BoxError>>),
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Backend").field(&self.kind()).finish()
    }
}

impl Backend {
    pub async fn try_new(cfg: &BackendConfig) -> Result<Self, BoxError> {
        Ok(match cfg {
            BackendConfig::Insights(cfg) => Self::Insights(InsightsCounter::new(cfg).await),
            BackendConfig::Search(cfg) => Self::Search(SearchCounter::try_new(cfg)?),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insights(_) => "cloudwatch",
            Self::Search(_) => "elasticsearch",
        }
    }
}

impl MessageCounter for Backend {
    async fn count_matching(&self, payload: &Payload, window: QueryWindow) -> u64 {
        match self {
            Self::Insights(counter) => counter.count_matching(payload, window).await,
            Self::Search(counter) => counter.count_matching(payload, window).await,
        }
    }

    async fn probe(&self) {
        match self {
            Self::Insights(counter) => counter.probe().await,
            Self::Search(counter) => counter.probe().await,
        }
    }
}
