//! A single log test: plan, emit, confirm and report.

use std::{
    fmt,
    io::Write,
    sync::Arc,
    time::{Duration, SystemTime},
};

use rama::{error::BoxError, telemetry::tracing};
use tokio::time::Instant;

use crate::{
    backend::{Backend, MessageCounter, QueryWindow},
    config::{BackendConfig, RunConfig},
    confirm::{ConfirmationRequest, await_confirmation},
    emitter::emit,
    payload::Payload,
    record::{ResultRecord, RunOutcome},
    schedule::{ConfigError, Schedule},
};

/// Upper bound for the reachability check running alongside emission.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the wall clock timestamps that bound the query window
/// and stamp the result record.
#[derive(Clone)]
pub struct WallClock(Arc<dyn Fn() -> SystemTime + Send + Sync>);

impl WallClock {
    pub fn new(now: impl Fn() -> SystemTime + Send + Sync + 'static) -> Self {
        Self(Arc::new(now))
    }

    pub fn now(&self) -> SystemTime {
        (self.0)()
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new(SystemTime::now)
    }
}

impl fmt::Debug for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WallClock").finish()
    }
}

/// A planned run, ready to be executed once.
#[derive(Debug)]
pub struct LogTest<B = Backend> {
    cfg: RunConfig,
    schedule: Schedule,
    payload: Payload,
    backend: Option<B>,
    clock: WallClock,
}

impl<B> LogTest<B>
where
    B: MessageCounter,
{
    /// Plan the run and generate its payload.
    ///
    /// Fails before anything is emitted when the configuration
    /// does not describe a valid schedule.
    pub fn try_new(cfg: RunConfig, backend: Option<B>) -> Result<Self, ConfigError> {
        let schedule = Schedule::try_from_config(&cfg)?;
        let payload = Payload::random(cfg.message_size);
        Ok(Self {
            cfg,
            schedule,
            payload,
            backend,
            clock: WallClock::default(),
        })
    }

    pub fn with_wall_clock(self, clock: WallClock) -> Self {
        Self { clock, ..self }
    }

    /// Replace the backend, e.g. once it is created from [`Self::backend_config`].
    pub fn with_backend(self, backend: Option<B>) -> Self {
        Self { backend, ..self }
    }

    pub fn backend_config(&self) -> Option<&BackendConfig> {
        self.cfg.backend.as_ref()
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Emit all messages into `sink`, confirm them if a backend is set
    /// and return the result record.
    ///
    /// Resolving `cancel` during emission aborts the run with an error.
    /// During confirmation it ends the polling early,
    /// in which case a record is still produced.
    pub async fn run<W, F>(self, sink: &mut W, cancel: F) -> Result<ResultRecord, BoxError>
    where
        W: Write + Send,
        F: Future,
    {
        let Self {
            cfg,
            schedule,
            payload,
            backend,
            clock,
        } = self;
        let mut cancel = std::pin::pin!(cancel);

        tracing::info!(
            uuid = %cfg.identity.uuid,
            total_messages = schedule.total_messages,
            messages_per_second = schedule.messages_per_second,
            message_size = cfg.message_size,
            expected_duration = %humantime::format_duration(schedule.expected_duration()),
            backend = backend.is_some(),
            "start emitting messages"
        );

        let started_at = clock.now();
        let started = Instant::now();

        let emission = async {
            let count = emit(sink, &payload, &schedule).await?;
            Ok::<_, BoxError>((count, Instant::now(), clock.now()))
        };
        let probe = async {
            if let Some(backend) = &backend
                && tokio::time::timeout(PROBE_TIMEOUT, backend.probe())
                    .await
                    .is_err()
            {
                tracing::warn!("backend probe did not finish within {PROBE_TIMEOUT:?}");
            }
        };

        let (message_count, emission_end, ended_at) = tokio::select! {
            _ = cancel.as_mut() => {
                return Err(BoxError::from("run cancelled while emitting messages"));
            }
            (emitted, ()) = async { tokio::join!(emission, probe) } => emitted?,
        };

        let emission_elapsed = emission_end - started;
        tracing::info!(
            message_count,
            "all messages sent in {} seconds",
            emission_elapsed.as_secs()
        );

        let confirmation = match &backend {
            Some(backend) => {
                let request = ConfirmationRequest {
                    payload: &payload,
                    window: QueryWindow::new(started_at, ended_at),
                    expected: message_count,
                    emission_end,
                    timeout: cfg.timeout,
                };
                Some(await_confirmation(backend, request, cancel.as_mut()).await)
            }
            None => {
                tracing::info!("no backend configured; skip delivery confirmation");
                None
            }
        };

        Ok(ResultRecord::build(
            &cfg,
            &schedule,
            RunOutcome {
                started_at,
                emission_elapsed,
                message_count,
                confirmation: confirmation.as_ref(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use tokio::time;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::{Rate, RunIdentity};

    /// Counts every line seen so far, as if ingestion was instant.
    #[derive(Debug, Default)]
    struct InstantBackend {
        probed: AtomicBool,
    }

    impl MessageCounter for InstantBackend {
        async fn count_matching(&self, _payload: &Payload, _window: QueryWindow) -> u64 {
            60
        }

        async fn probe(&self) {
            self.probed.store(true, Ordering::SeqCst);
        }
    }

    fn run_config(rate: Option<Rate>) -> RunConfig {
        RunConfig {
            identity: RunIdentity {
                uuid: "run-1".to_owned(),
                ..Default::default()
            },
            rate,
            message_size: 12,
            duration_minutes: 1,
            timeout: Duration::from_secs(30),
            backend: None,
        }
    }

    #[test]
    fn test_invalid_config_rejected_before_run() {
        let err = LogTest::<InstantBackend>::try_new(run_config(None), None).unwrap_err();
        assert_eq!(ConfigError::NoRateDefined, err);
    }

    #[test]
    fn test_payload_sized_by_config() {
        let test =
            LogTest::<InstantBackend>::try_new(run_config(Some(Rate::PerMinute(60))), None)
                .unwrap();
        assert_eq!(12, test.payload().len());
        assert_eq!(60, test.schedule().total_messages);
    }

    #[tokio::test(flavor = "current_thread")]
    #[traced_test]
    async fn test_run_without_backend() {
        time::pause();

        let test =
            LogTest::<InstantBackend>::try_new(run_config(Some(Rate::PerMinute(60))), None)
                .unwrap();
        let payload = test.payload().clone();

        let mut sink = Vec::new();
        let record = test
            .run(&mut sink, std::future::pending::<()>())
            .await
            .unwrap();

        let output = String::from_utf8(sink).unwrap();
        assert_eq!(60, output.lines().count());
        assert!(output.lines().all(|line| line == payload.as_str()));

        assert_eq!("run-1", record.uuid);
        assert_eq!(60, record.message_count);
        assert_eq!(60, record.actual_duration);
        assert!(record.backend.is_none());
        assert!(record.confirmation.is_none());
        assert!(logs_contain("expected_duration=1m"));
        assert!(logs_contain("skip delivery confirmation"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_with_backend_confirms_and_probes() {
        time::pause();

        let backend = Arc::new(InstantBackend::default());
        let test = LogTest::try_new(run_config(Some(Rate::PerMinute(60))), Some(backend.clone()))
            .unwrap();

        let mut sink = Vec::new();
        let record = test
            .run(&mut sink, std::future::pending::<()>())
            .await
            .unwrap();

        assert!(backend.probed.load(Ordering::SeqCst));
        let confirmation = record.confirmation.unwrap();
        assert!(confirmation.messages_confirmed_received);
        assert_eq!(60, confirmation.messages_received);
        assert_eq!(0, confirmation.post_complete_time);
    }

    #[tokio::test(flavor = "current_thread")]
    #[traced_test]
    async fn test_run_timeout_still_reports() {
        struct LossyBackend;

        impl MessageCounter for LossyBackend {
            async fn count_matching(&self, _payload: &Payload, _window: QueryWindow) -> u64 {
                59
            }
        }

        time::pause();

        let test =
            LogTest::try_new(run_config(Some(Rate::PerMinute(60))), Some(LossyBackend)).unwrap();

        let mut sink = Vec::new();
        let record = test
            .run(&mut sink, std::future::pending::<()>())
            .await
            .unwrap();

        let confirmation = record.confirmation.unwrap();
        assert!(!confirmation.messages_confirmed_received);
        assert_eq!(59, confirmation.messages_received);
        // last poll lands one interval past the deadline
        assert_eq!(31, confirmation.post_complete_time);
        assert!(logs_contain("not all messages received by backend"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cancel_during_confirmation_still_reports() {
        struct NeverBackend;

        impl MessageCounter for NeverBackend {
            async fn count_matching(&self, _payload: &Payload, _window: QueryWindow) -> u64 {
                0
            }
        }

        time::pause();

        let test =
            LogTest::try_new(run_config(Some(Rate::PerMinute(60))), Some(NeverBackend)).unwrap();

        let mut sink = Vec::new();
        let record = test
            .run(&mut sink, time::sleep(Duration::from_secs(65)))
            .await
            .unwrap();

        let confirmation = record.confirmation.unwrap();
        assert!(!confirmation.messages_confirmed_received);
        assert_eq!(5, confirmation.post_complete_time);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_confirmation_queries_the_emission_window() {
        #[derive(Default)]
        struct RecordingBackend {
            windows: std::sync::Mutex<Vec<QueryWindow>>,
        }

        impl MessageCounter for RecordingBackend {
            async fn count_matching(&self, _payload: &Payload, window: QueryWindow) -> u64 {
                self.windows.lock().unwrap().push(window);
                60
            }
        }

        time::pause();

        let epoch = std::time::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let base = Instant::now();
        let clock = WallClock::new(move || epoch + base.elapsed());

        let backend = Arc::new(RecordingBackend::default());
        let test = LogTest::try_new(run_config(Some(Rate::PerMinute(60))), Some(backend.clone()))
            .unwrap()
            .with_wall_clock(clock);

        let record = test
            .run(&mut Vec::new(), std::future::pending::<()>())
            .await
            .unwrap();
        assert_eq!("2023-11-14T22:13:20Z", record.timestamp);

        let windows = backend.windows.lock().unwrap();
        assert_eq!(1, windows.len());
        let window = windows[0];
        assert_eq!(epoch, window.start);
        assert_eq!(epoch + Duration::from_secs(60), window.end);

        let padded = window.padded();
        assert_eq!(1_700_000_000 - 60, padded.start_epoch_secs());
        assert_eq!(1_700_000_000 + 120, padded.end_epoch_secs());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cancel_while_every_batch_overruns() {
        /// Blocks the thread long enough for each batch of 4 to overrun its tick.
        struct SlowSink(Vec<u8>);

        impl Write for SlowSink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                std::thread::sleep(Duration::from_millis(300));
                self.0.write(buf)
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let test = LogTest::<InstantBackend>::try_new(run_config(Some(Rate::PerSecond(4))), None)
            .unwrap();

        let mut sink = SlowSink(Vec::new());
        let result = test
            .run(&mut sink, time::sleep(Duration::from_millis(100)))
            .await;

        assert!(result.is_err());
        let lines = String::from_utf8(sink.0).unwrap().lines().count();
        assert!((4..=8).contains(&lines), "lines = {lines}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cancel_during_emission_is_an_error() {
        time::pause();

        let test =
            LogTest::<InstantBackend>::try_new(run_config(Some(Rate::PerMinute(60))), None)
                .unwrap();

        let mut sink = Vec::new();
        let result = test
            .run(&mut sink, time::sleep(Duration::from_millis(10_500)))
            .await;

        assert!(result.is_err());
        assert_eq!(11, String::from_utf8(sink).unwrap().lines().count());
    }
}
