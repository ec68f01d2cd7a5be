/*!
 * Timeout Infrastructure
 *
 * Deadline tracking for the blocking calls of the IPC layer.
 *
 * ## Semantics
 *
 * - `None`: block indefinitely
 * - `Some(Duration::ZERO)`: poll, never block
 * - `Some(d)`: block at most `d` in total, across internal retries
 */

use super::errors::{Fault, Status};
use std::time::{Duration, Instant};

/// Deadline for one blocking operation
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// Zero timeout: the caller asked for a non-blocking poll
    #[inline]
    pub fn is_poll(&self) -> bool {
        self.timeout == Some(Duration::ZERO)
    }

    /// Check if this deadline has passed
    pub fn is_expired(&self) -> bool {
        match self.timeout {
            None => false,
            Some(d) => self.start.elapsed() >= d,
        }
    }

    /// Time left before the deadline, `None` for an infinite wait
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout
            .map(|d| d.checked_sub(self.start.elapsed()).unwrap_or(Duration::ZERO))
    }

    /// Status reported when the deadline expires with nothing delivered
    pub fn expired_status(&self, what: &str) -> Status {
        if self.is_poll() {
            Status::WouldBlock(Fault::local(format!("{}: nothing pending", what)))
        } else {
            Status::Timeout {
                elapsed_ms: self.start.elapsed().as_millis() as u64,
                timeout_ms: self.timeout.map(|d| d.as_millis() as u64),
            }
        }
    }
}
