#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

use std::{
    io::Write as _,
    path::{Path, PathBuf},
    time::Duration,
};

use rama::{
    error::{BoxError, ErrorContext as _},
    graceful,
    telemetry::tracing,
};

use clap::Parser;

use loggen_lib::{backend::Backend, record::ResultRecord, run::LogTest, utils};

pub mod config;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// CLI arguments for configuring a log generation run.
#[derive(Debug, Clone, Parser)]
#[command(name = "loggen")]
#[command(bin_name = "loggen")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub run: config::RunArgs,

    /// append the result record as a JSON line to this file instead of writing it to stderr
    #[arg(long, value_name = "PATH")]
    pub results: Option<PathBuf>,

    /// debug logging as default instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 0.)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    utils::telemetry::init_tracing(Some(utils::telemetry::TelemetryConfig {
        verbose: args.verbose,
        pretty: args.pretty,
        output: args.output.as_deref(),
    }))?;

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

/// Run a single log test and write its result record.
///
/// Configuration errors are reported before any message is emitted.
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    let graceful_timeout = (args.graceful > 0.)
        .then(|| Duration::try_from_secs_f64(args.graceful))
        .transpose()
        .context("invalid graceful shutdown timeout")
        .with_context_field("graceful", || args.graceful)?;

    let test = LogTest::<Backend>::try_new(args.run.into_run_config(), None)
        .context("plan log generation run")?;

    let backend = match test.backend_config() {
        Some(cfg) => Some(
            Backend::try_new(cfg)
                .await
                .context("create confirmation backend")?,
        ),
        None => None,
    };
    let test = test.with_backend(backend);

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let (result_tx, result_rx) = tokio::sync::oneshot::channel();
    let graceful = graceful::Shutdown::new(new_shutdown_signal(done_rx, base_shutdown_signal));

    graceful.spawn_task_fn(async move |guard| {
        let cancelled = guard.clone_weak().into_cancelled();
        let mut sink = std::io::stdout();
        let result = test.run(&mut sink, cancelled).await;
        let _ = result_tx.send(result);
        drop(done_tx);
    });

    let delay = match graceful_timeout {
        Some(duration) => graceful.shutdown_with_limit(duration).await?,
        None => graceful.shutdown().await,
    };
    tracing::debug!("gracefully shutdown with a delay of: {delay:?}");

    let record = result_rx
        .await
        .context("log generation run did not finish")??;

    write_results(&record, args.results.as_deref())?;

    tracing::info!(uuid = %record.uuid, "log generation run finished");
    Ok(())
}

fn write_results(record: &ResultRecord, path: Option<&Path>) -> Result<(), BoxError> {
    let line = serde_json::to_string(&record.to_tagged_json()).context("encode result record")?;

    match path {
        Some(path) => {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .context("open results file")
                .with_context_debug_field("path", || path.to_path_buf())?;
            writeln!(file, "{line}").context("append result record")?;
            tracing::info!(path = ?path, "result record written");
        }
        None => {
            writeln!(std::io::stderr(), "{line}").context("write result record")?;
        }
    }

    Ok(())
}

fn new_shutdown_signal(
    done_rx: tokio::sync::oneshot::Receiver<()>,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
) -> impl Future + Send + 'static {
    async move {
        tokio::select! {
            _ = base_shutdown_signal => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            _ = done_rx => {
                tracing::debug!("run is finished, return control");
            }
        }
    }
}
