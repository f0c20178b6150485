//! Rate planning: turns a requested rate and duration into an emission schedule.

use std::{error::Error, fmt, time::Duration};

use crate::config::{Rate, RunConfig};

/// Fatal configuration problems, detected before any message is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    NoRateDefined,
    ZeroRate,
    ZeroDuration,
    ZeroMessageSize,
    TooManyMessages,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoRateDefined => {
                "no rate defined: set either messages per minute or messages per second"
            }
            Self::ZeroRate => "message rate has to be greater than zero",
            Self::ZeroDuration => "duration has to be at least one minute",
            Self::ZeroMessageSize => "message size has to be at least one byte",
            Self::TooManyMessages => "rate and duration exceed the maximum amount of messages",
        })
    }
}

impl Error for ConfigError {}

/// Emission schedule derived once from a [`RunConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    pub total_messages: u64,
    pub messages_per_second: f64,
    /// Only used by [`Cadence::Paced`] emission.
    pub emission_delay: Duration,
    pub cadence: Cadence,
}

/// How the emitter spreads messages over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// One message, then sleep for the emission delay.
    Paced,
    /// `batch_size` messages back-to-back once every second.
    Batched { batch_size: u64 },
}

impl Schedule {
    pub fn try_from_config(cfg: &RunConfig) -> Result<Self, ConfigError> {
        if cfg.message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }
        Self::try_new(cfg.rate, cfg.duration_minutes)
    }

    pub fn try_new(rate: Option<Rate>, duration_minutes: u64) -> Result<Self, ConfigError> {
        let rate = rate.ok_or(ConfigError::NoRateDefined)?;
        if duration_minutes == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        let duration_secs = duration_minutes
            .checked_mul(60)
            .ok_or(ConfigError::TooManyMessages)?;

        let schedule = match rate {
            Rate::PerMinute(0) | Rate::PerSecond(0) => return Err(ConfigError::ZeroRate),
            Rate::PerMinute(per_minute) => {
                let messages_per_second = per_minute as f64 / 60.;
                Self {
                    total_messages: per_minute
                        .checked_mul(duration_minutes)
                        .ok_or(ConfigError::TooManyMessages)?,
                    messages_per_second,
                    emission_delay: Duration::from_secs_f64(1. / messages_per_second),
                    cadence: Cadence::Paced,
                }
            }
            Rate::PerSecond(per_second) => Self {
                total_messages: per_second
                    .checked_mul(duration_secs)
                    .ok_or(ConfigError::TooManyMessages)?,
                messages_per_second: per_second as f64,
                emission_delay: Duration::from_secs_f64(1. / per_second as f64),
                cadence: Cadence::Batched {
                    batch_size: per_second,
                },
            },
        };

        Ok(schedule)
    }

    /// Planned emission time, assuming a perfect cadence.
    ///
    /// Saturates at [`Duration::MAX`].
    pub fn expected_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.total_messages as f64 / self.messages_per_second)
            .unwrap_or(Duration::MAX)
    }
}
