//! Exponential backoff for daemon retries.

use std::time::Duration;

const INITIAL: Duration = Duration::from_secs(1);

/// Doubles from one second up to a ceiling; reset after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(max: Duration) -> Self {
        Self {
            current: INITIAL.min(max),
            max,
        }
    }

    /// Delay to wait now; the following call returns double (capped).
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = INITIAL.min(self.max);
    }
}
