//! Confirmation loop: polls a [`MessageCounter`] until all emitted
//! messages are observed or the timeout past emission end elapses.

use std::time::Duration;

use rama::telemetry::tracing;
use tokio::time::{Instant, sleep, sleep_until};

use crate::{
    backend::{MessageCounter, QueryWindow},
    payload::Payload,
};

/// Fixed cadence at which the backend is polled.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Terminal state of a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    Confirmed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub state: ConfirmationState,
    /// Last count reported by the backend.
    pub messages_received: u64,
    /// Time between emission end and the terminal state.
    pub post_complete_time: Duration,
}

impl Confirmation {
    pub fn all_received(&self) -> bool {
        self.state == ConfirmationState::Confirmed
    }
}

/// What has to be confirmed, and until when.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationRequest<'a> {
    pub payload: &'a Payload,
    pub window: QueryWindow,
    pub expected: u64,
    pub emission_end: Instant,
    pub timeout: Duration,
}

/// Poll `counter` every [`POLL_INTERVAL`] until it reports `expected` messages.
///
/// Gives up at `emission_end + timeout`, also when a backend query is
/// still in flight at that point, or as soon as `cancel` resolves.
pub async fn await_confirmation<C, F>(
    counter: &C,
    request: ConfirmationRequest<'_>,
    cancel: F,
) -> Confirmation
where
    C: MessageCounter,
    F: Future,
{
    let ConfirmationRequest {
        payload,
        window,
        expected,
        emission_end,
        timeout,
    } = request;

    // a timeout beyond the clock range never expires
    let deadline = emission_end.checked_add(timeout);
    let mut deadline_reached = std::pin::pin!(async move {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    });
    let mut cancel = std::pin::pin!(cancel);
    let mut messages_received = 0;

    tracing::info!("confirming all {expected} messages received in backend");

    let state = 'poll: loop {
        if deadline.is_some_and(|deadline| Instant::now() > deadline) {
            break 'poll ConfirmationState::TimedOut;
        }

        messages_received = tokio::select! {
            biased;

            _ = cancel.as_mut() => break 'poll ConfirmationState::Cancelled,
            count = counter.count_matching(payload, window) => count,
            _ = deadline_reached.as_mut() => {
                tracing::warn!("backend query still running at the confirmation deadline");
                break 'poll ConfirmationState::TimedOut;
            }
        };

        if messages_received == expected {
            break 'poll ConfirmationState::Confirmed;
        }

        tracing::info!(
            messages_received,
            expected,
            "message check failed; retrying until timeout"
        );

        tokio::select! {
            _ = cancel.as_mut() => break 'poll ConfirmationState::Cancelled,
            _ = sleep(POLL_INTERVAL) => (),
        }
    };

    let confirmation = Confirmation {
        state,
        messages_received,
        post_complete_time: emission_end.elapsed(),
    };
    log_summary(&confirmation, expected);
    confirmation
}

fn log_summary(confirmation: &Confirmation, expected: u64) {
    let received = confirmation.messages_received;
    let waited = confirmation.post_complete_time.as_secs();
    match confirmation.state {
        ConfirmationState::Confirmed => {
            tracing::info!(
                "all messages received by backend: received {received}, expected {expected}; \
                 seconds till backend received all messages: {waited}"
            );
        }
        ConfirmationState::TimedOut => {
            tracing::warn!(
                "not all messages received by backend: received {received}, expected {expected}; \
                 seconds backend waited for messages: {waited}"
            );
        }
        ConfirmationState::Cancelled => {
            tracing::warn!(
                "confirmation cancelled: received {received}, expected {expected}; \
                 seconds backend waited for messages: {waited}"
            );
        }
    }
}
