use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::types::{PollError, PollPolicy};

/// Paces one poll loop: callers probe, and call `tick` when the probe failed.
pub struct Poller<'a> {
    what: String,
    policy: PollPolicy,
    cancel: &'a CancellationToken,
    started: Instant,
    attempts: u64,
}

impl<'a> Poller<'a> {
    pub fn new(what: impl Into<String>, policy: PollPolicy, cancel: &'a CancellationToken) -> Self {
        Poller {
            what: what.into(),
            policy,
            cancel,
            started: Instant::now(),
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Sleeps one interval. Fails once the timeout has passed or the run is cancelled.
    pub async fn tick(&mut self) -> Result<(), PollError> {
        self.attempts += 1;

        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        if let Some(timeout) = self.policy.timeout {
            if self.started.elapsed() >= timeout {
                return Err(PollError::TimedOut {
                    what: self.what.clone(),
                    waited: self.started.elapsed(),
                });
            }
        }

        let cancel = self.cancel;
        tokio::select! {
            _ = cancel.cancelled() => Err(self.cancelled()),
            _ = tokio::time::sleep(self.policy.interval) => Ok(()),
        }
    }

    fn cancelled(&self) -> PollError {
        PollError::Cancelled {
            what: self.what.clone(),
        }
    }
}
