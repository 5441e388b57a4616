// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Waiting on submitted signing jobs.

use {
    crate::{sign_service::SignService, IosSignError},
    log::{info, warn},
    std::time::Duration,
};

pub const DEFAULT_TIMEOUT_MINUTES: u64 = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Blocks the calling thread between status checks.
pub trait Sleeper {
    /// Sleep for `duration`.
    ///
    /// Returns [IosSignError::Interrupted] if the wait was cut short.
    fn sleep(&self, duration: Duration) -> Result<(), IosSignError>;
}

/// A [Sleeper] backed by [std::thread::sleep].
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> Result<(), IosSignError> {
        std::thread::sleep(duration);
        Ok(())
    }
}

/// State of a signing job as tracked by [SignTaskPoller].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    /// The job was accepted by the service and nothing was polled yet.
    Submitted,
    /// Waiting for the job, on the given status check.
    Polling { attempt: u64 },
    /// The job finished after the given number of status checks.
    Finished { attempts: u64 },
    /// The job did not finish within the attempt budget.
    TimedOut { attempts: u64 },
    /// The given status check, or the wait before it, failed.
    Failed { attempt: u64 },
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::TimedOut { .. } | Self::Failed { .. }
        )
    }

    /// Transition after a status check of the current attempt.
    pub fn advance(self, finished: bool, max_attempts: u64) -> Self {
        match self {
            Self::Submitted => Self::Polling { attempt: 1 }.advance(finished, max_attempts),
            Self::Polling { attempt } if finished => Self::Finished { attempts: attempt },
            Self::Polling { attempt } if attempt + 1 > max_attempts => {
                Self::TimedOut { attempts: attempt }
            }
            Self::Polling { attempt } => Self::Polling {
                attempt: attempt + 1,
            },
            terminal => terminal,
        }
    }

    /// Transition after the current attempt could not complete.
    pub fn fail(self) -> Self {
        match self {
            Self::Submitted => Self::Failed { attempt: 1 },
            Self::Polling { attempt } => Self::Failed { attempt },
            terminal => terminal,
        }
    }
}

/// Bounds of the wait on a signing job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout_minutes: u64,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollSettings {
    /// Construct settings, rejecting a sub-second interval and unrepresentable timeouts.
    pub fn new(timeout_minutes: u64, interval: Duration) -> Result<Self, IosSignError> {
        if interval.as_secs() == 0 {
            return Err(IosSignError::CliBadArgument(
                "poll interval must be at least 1 second".into(),
            ));
        }

        if timeout_minutes.checked_mul(60).is_none() {
            return Err(IosSignError::CliBadArgument(format!(
                "timeout of {} minutes is too large",
                timeout_minutes
            )));
        }

        Ok(Self {
            timeout_minutes,
            interval,
        })
    }

    /// Maximum number of status checks before giving up.
    pub fn max_attempts(&self) -> u64 {
        let interval = self.interval.as_secs().max(1);

        self.timeout_minutes.saturating_mul(60) / interval
    }
}

/// Polls the signing service until a job finishes or the attempt budget runs out.
pub struct SignTaskPoller<S: Sleeper = ThreadSleeper> {
    settings: PollSettings,
    sleeper: S,
}

impl SignTaskPoller<ThreadSleeper> {
    pub fn new(settings: PollSettings) -> Self {
        Self::with_sleeper(settings, ThreadSleeper)
    }
}

impl<S: Sleeper> SignTaskPoller<S> {
    pub fn with_sleeper(settings: PollSettings, sleeper: S) -> Self {
        Self { settings, sleeper }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Wait on the job identified by `resign_id`.
    ///
    /// Each status check is preceded by a sleep of the poll interval. Returns the
    /// number of status checks performed once the job finishes, or
    /// [IosSignError::SignTaskTimeout] when the budget is exhausted. The first failed
    /// sleep or status check ends the wait with its error.
    pub fn wait(&self, service: &impl SignService, resign_id: &str) -> Result<u64, IosSignError> {
        let max_attempts = self.settings.max_attempts();
        let mut state = PollState::Submitted;

        warn!(
            "waiting up to {} mins for sign task {} to finish",
            self.settings.timeout_minutes, resign_id
        );

        loop {
            let checked = self
                .sleeper
                .sleep(self.settings.interval)
                .and_then(|()| service.sign_status(resign_id));

            let finished = match checked {
                Ok(finished) => finished,
                Err(err) => {
                    state = state.fail();
                    warn!("[{}] sign status check failed ({:?}): {}", resign_id, state, err);
                    return Err(err);
                }
            };
            state = state.advance(finished, max_attempts);

            match state {
                PollState::Finished { attempts } => {
                    info!("[{}] sign finished after {} checks", resign_id, attempts);
                    return Ok(attempts);
                }
                PollState::TimedOut { attempts } => {
                    warn!(
                        "[{}] sign task timeout for {} mins after {} checks",
                        resign_id, self.settings.timeout_minutes, attempts
                    );
                    return Err(IosSignError::SignTaskTimeout(self.settings.timeout_minutes));
                }
                _ => {
                    info!("[{}] sign running...", resign_id);
                }
            }
        }
    }
}
