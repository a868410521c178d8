//! Per-conversation reconnect backoff.

use crate::connection::TerminateReason;
use std::time::Duration;

const SMALL_BACKOFF: Duration = Duration::from_secs(1);
const INITIAL_EXPONENTIAL: Duration = Duration::from_secs(2);
const EXPONENTIAL_CEILING: Duration = Duration::from_secs(5 * 60);

/// Outcome of advancing the backoff after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffOutcome {
    /// Retry permitted after the given delay.
    RetryAfter(Duration),
    /// No further automatic retry until an external event clears it.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    cancelled: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: SMALL_BACKOFF,
            cancelled: false,
        }
    }
}

impl Backoff {
    pub fn advance(&mut self, reason: TerminateReason) -> BackoffOutcome {
        if reason.cancels_retries() {
            self.cancelled = true;
            return BackoffOutcome::Cancelled;
        }
        use crate::connection::TerminateReason::*;
        let delay = match reason {
            Success | Gone | Busy => {
                self.current = SMALL_BACKOFF;
                SMALL_BACKOFF
            }
            ConnectivityError | Timeout => {
                let next = self.current.saturating_mul(2).min(EXPONENTIAL_CEILING);
                self.current = next.max(INITIAL_EXPONENTIAL);
                self.current
            }
            Disconnected => {
                self.current = self.current.max(INITIAL_EXPONENTIAL);
                self.current
            }
            NotAuthorized | Revoked => unreachable!("handled by cancels_retries above"),
        };
        BackoffOutcome::RetryAfter(delay)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// External event (e.g. a host action re-authorizes the conversation)
    /// clears a cancelled backoff so retries resume.
    pub fn clear_cancellation(&mut self) {
        self.cancelled = false;
        self.current = SMALL_BACKOFF;
    }
}
