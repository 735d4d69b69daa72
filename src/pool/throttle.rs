//! Politeness throttle.
//!
//! Inserts a small randomized pause before each queue pop and each page
//! navigation so that N workers do not hit the site in lockstep.

use std::time::Duration;

use rand::Rng;
use tracing::trace;

/// Fixed part of each pause.
pub const DEFAULT_FLOOR: Duration = Duration::from_millis(300);

/// Upper bound of the random part of each pause.
pub const DEFAULT_JITTER: Duration = Duration::from_secs(1);

/// Randomized delay applied by workers and the enumerator.
///
/// `Throttle` is `Copy`; every worker gets its own and draws independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    floor: Duration,
    jitter: Duration,
    disabled: bool,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_FLOOR, DEFAULT_JITTER)
    }
}

impl Throttle {
    /// Creates a throttle pausing `floor + random(0..jitter)`.
    #[must_use]
    pub fn new(floor: Duration, jitter: Duration) -> Self {
        Self {
            floor,
            jitter,
            disabled: false,
        }
    }

    /// Creates a throttle that never sleeps (`--wait false`).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            floor: Duration::ZERO,
            jitter: Duration::ZERO,
            disabled: true,
        }
    }

    /// Returns true if pauses are skipped.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Draws the next pause length.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        if self.disabled {
            return Duration::ZERO;
        }
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            self.jitter.mul_f64(rand::thread_rng().r#gen::<f64>())
        };
        self.floor.saturating_add(jitter)
    }

    /// Sleeps for [`Self::next_delay`].
    pub async fn pause(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        trace!(delay_ms = delay.as_millis(), "throttling");
        tokio::time::sleep(delay).await;
    }
}
