//! Convergence polling.
//!
//! Changes made through the directory service reach the gateway adapter
//! asynchronously, through a webhook event queue. A scenario that asserts
//! right after a fixture change has to wait until that queue is empty.
//!
//! [`ConsistencyPoller`] does that wait with a fixed interval and a hard
//! attempt cap:
//!
//! ```text
//! Idle → AwaitingFirstPoll → Polling → Converged
//!                                    ↘ TimedOut
//! ```
//!
//! The initial delay matters: polling right after the change reliably sees
//! an empty queue because the event has not been enqueued yet.

use std::fmt;

use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::types::PollerConfig;

/// Source of the pending-event count the poller waits on.
#[allow(async_fn_in_trait)]
pub trait QueueProbe {
    /// Returns the number of events still waiting to be processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the count cannot be obtained. The poller does
    /// not retry failed probes.
    async fn queue_length(&self) -> HarnessResult<usize>;
}

/// Result of a completed poll sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The queue was empty on poll number `attempts`.
    Converged {
        /// Polls performed, including the successful one.
        attempts: u32,
    },
    /// The queue was still non-empty after `attempts` polls.
    TimedOut {
        /// Polls performed.
        attempts: u32,
    },
}

impl PollOutcome {
    /// Number of polls performed.
    #[must_use]
    pub fn attempts(self) -> u32 {
        match self {
            Self::Converged { attempts } | Self::TimedOut { attempts } => attempts,
        }
    }

    /// Returns `true` if the queue drained.
    #[must_use]
    pub fn is_converged(self) -> bool {
        matches!(self, Self::Converged { .. })
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    AwaitingFirstPoll,
    Polling(u32),
    Converged(u32),
    TimedOut(u32),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::AwaitingFirstPoll => f.write_str("awaiting-first-poll"),
            Self::Polling(attempt) => write!(f, "polling({attempt})"),
            Self::Converged(attempts) => write!(f, "converged({attempts})"),
            Self::TimedOut(attempts) => write!(f, "timed-out({attempts})"),
        }
    }
}

fn enter(phase: Phase) {
    trace!(phase = %phase, "poller transition");
}

/// Bounded fixed-interval poller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyPoller {
    config: PollerConfig,
}

impl ConsistencyPoller {
    /// Creates a poller with the given parameters.
    #[must_use]
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    /// Returns the polling parameters.
    #[must_use]
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Polls `probe` until its queue is empty or the attempt cap is hit.
    ///
    /// Exactly `max_attempts` polls are made before giving up. A drain that
    /// needed more than `slow_threshold` polls is logged but still succeeds.
    ///
    /// # Errors
    ///
    /// Propagates the first probe error.
    pub async fn poll<P: QueueProbe>(&self, probe: &P) -> HarnessResult<PollOutcome> {
        enter(Phase::Idle);
        let max_attempts = self.config.max_attempts;

        enter(Phase::AwaitingFirstPoll);
        sleep(self.config.initial_delay()).await;

        for attempt in 1..=max_attempts {
            enter(Phase::Polling(attempt));
            let pending = probe.queue_length().await?;
            if pending == 0 {
                enter(Phase::Converged(attempt));
                if attempt > self.config.slow_threshold {
                    info!(attempts = attempt, "Queue drained slowly");
                } else {
                    debug!(attempts = attempt, "Queue drained");
                }
                return Ok(PollOutcome::Converged { attempts: attempt });
            }
            debug!(attempt, pending, "Queue not yet drained");
            if attempt < max_attempts {
                sleep(self.config.interval()).await;
            }
        }

        enter(Phase::TimedOut(max_attempts));
        warn!(attempts = max_attempts, "Queue did not drain");
        Ok(PollOutcome::TimedOut {
            attempts: max_attempts,
        })
    }

    /// Like [`poll`](Self::poll), but a timeout is an error.
    ///
    /// Returns the number of polls it took to converge.
    ///
    /// # Errors
    ///
    /// Returns `ConvergenceTimeout` when the queue never drained, or the
    /// first probe error.
    pub async fn await_convergence<P: QueueProbe>(&self, probe: &P) -> HarnessResult<u32> {
        match self.poll(probe).await? {
            PollOutcome::Converged { attempts } => Ok(attempts),
            PollOutcome::TimedOut { attempts } => Err(HarnessError::convergence_timeout(attempts)),
        }
    }
}
