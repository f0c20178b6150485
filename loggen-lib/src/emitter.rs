//! Writes the payload to the logging sink following a [`Schedule`].

use std::{io::Write, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};
use tokio::time::{Instant, sleep};

use crate::{
    payload::Payload,
    schedule::{Cadence, Schedule},
};

const TICK: Duration = Duration::from_secs(1);

/// Emit `schedule.total_messages` payload lines into `sink`.
///
/// Returns the amount of messages actually written,
/// which is the count the backend is expected to confirm.
pub async fn emit<W>(
    sink: &mut W,
    payload: &Payload,
    schedule: &Schedule,
) -> Result<u64, BoxError>
where
    W: Write + Send,
{
    let count = match schedule.cadence {
        Cadence::Paced => emit_paced(sink, payload, schedule).await?,
        Cadence::Batched { batch_size } => {
            emit_batched(sink, payload, schedule.total_messages, batch_size).await?
        }
    };
    sink.flush().context("flush log sink")?;
    Ok(count)
}

async fn emit_paced<W>(
    sink: &mut W,
    payload: &Payload,
    schedule: &Schedule,
) -> Result<u64, BoxError>
where
    W: Write + Send,
{
    let mut count = 0;
    while count < schedule.total_messages {
        write_line(sink, payload)?;
        sleep(schedule.emission_delay).await;
        count += 1;
    }
    Ok(count)
}

async fn emit_batched<W>(
    sink: &mut W,
    payload: &Payload,
    total_messages: u64,
    batch_size: u64,
) -> Result<u64, BoxError>
where
    W: Write + Send,
{
    let mut count = 0;
    while count < total_messages {
        let tick_start = Instant::now();
        for _ in 0..batch_size {
            write_line(sink, payload)?;
        }

        let consumed = tick_start.elapsed();
        match remaining_in_tick(consumed) {
            Some(remaining) => sleep(remaining).await,
            None => {
                tracing::debug!(
                    ?consumed,
                    batch_size,
                    "batch overran its tick: drift is not compensated"
                );
                // no sleep, but let cancellation and the backend probe make progress
                tokio::task::yield_now().await;
            }
        }
        count += batch_size;
    }
    Ok(count)
}

/// Time left in the current one second tick, `None` when the batch overran it.
pub(crate) fn remaining_in_tick(consumed: Duration) -> Option<Duration> {
    (consumed < TICK).then(|| TICK - consumed)
}

fn write_line<W: Write>(sink: &mut W, payload: &Payload) -> Result<(), BoxError> {
    writeln!(sink, "{payload}").context("write message to log sink")?;
    Ok(())
}
