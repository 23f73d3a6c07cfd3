//! Deadline shared by every attempt of one logical request, and the pause
//! taken between attempts.

use std::time::Duration;
use tokio::time::Instant;

/// Upper bound for the first pause when none is configured.
const DEFAULT_FIRST_PAUSE: Duration = Duration::from_millis(100);

/// First pause for a request with `timeout`: 100 ms, or a tenth of the
/// timeout when that is shorter.
pub fn default_pause(timeout: Duration) -> Duration {
    DEFAULT_FIRST_PAUSE.min(timeout / 10)
}

/// Tracks elapsed time against a fixed timeout and hands out the pauses
/// between attempts.
///
/// Pauses grow like a Fibonacci sequence seeded with the first pause. A
/// pause is only granted when it ends strictly before the deadline, so the
/// attempt that follows always has time left to run.
///
/// Built on `tokio::time::Instant` so tests can drive it with a paused clock.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    timeout: Duration,
    pause: Duration,
    prev_pause: Duration,
}

impl Deadline {
    /// Starts the clock now.
    pub fn start(timeout: Duration, first_pause: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            pause: first_pause,
            prev_pause: Duration::ZERO,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    pub fn has_time_left(&self) -> bool {
        self.elapsed() < self.timeout
    }

    /// The pause to take before the next attempt, or `None` when waiting it
    /// out would leave no time for that attempt.
    pub fn next_pause(&mut self) -> Option<Duration> {
        if !self.has_time_left() || self.pause >= self.remaining() {
            return None;
        }

        let pause = self.pause;
        let grown = if self.prev_pause.is_zero() {
            pause
        } else {
            pause + self.prev_pause
        };
        self.prev_pause = pause;
        self.pause = grown;
        Some(pause)
    }
}
