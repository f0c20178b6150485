use std::{io::IsTerminal as _, path::Path};

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing::{
        self,
        metadata::LevelFilter,
        subscriber::{EnvFilter, fmt::writer::BoxMakeWriter},
    },
};

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig<'a> {
    pub verbose: bool,
    pub pretty: bool,
    pub output: Option<&'a Path>,
}

/// Crates that stay at `warn` unless `RUST_LOG` names them,
/// the AWS SDK logs every request and retry at `info`/`debug`.
const QUIET_TARGETS: &[&str] = &["aws_config", "aws_smithy_runtime", "aws_sdk_cloudwatchlogs"];

/// Sets up the global subscriber.
///
/// `RUST_LOG` takes precedence over `--verbose`. Diagnostics go to stderr
/// or the configured file, stdout only carries generated messages.
pub fn init_tracing(cfg: Option<TelemetryConfig<'_>>) -> Result<(), BoxError> {
    let cfg = cfg.unwrap_or_default();
    let filter = env_filter(cfg.verbose, std::env::var("RUST_LOG").ok().as_deref());

    let make_writer = match cfg.output {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .context("open log file")
                .with_context_debug_field("path", || path.to_path_buf())?;

            BoxMakeWriter::new(file)
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let subscriber = tracing::subscriber::fmt()
        .with_ansi(cfg.output.is_none() && std::io::stderr().is_terminal())
        .with_env_filter(filter)
        .with_writer(make_writer);

    if cfg.pretty {
        subscriber.pretty().try_init()?;
    } else {
        subscriber.try_init()?;
    }

    tracing::info!("Tracing is set up");
    Ok(())
}

fn env_filter(verbose: bool, env: Option<&str>) -> EnvFilter {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let env = env.unwrap_or_default();
    let mut directives: Vec<String> = QUIET_TARGETS
        .iter()
        .filter(|target| !env.contains(*target))
        .map(|target| format!("{target}=warn"))
        .collect();
    if env.is_empty() {
        directives.push(level.to_string());
    } else {
        directives.push(env.to_owned());
    }

    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(directives.join(","))
}
