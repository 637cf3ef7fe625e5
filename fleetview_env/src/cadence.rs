//! Sans-IO periodic timer.

use std::time::Duration;

/// A periodic deadline polled against a clock.
///
/// Replaces `setInterval`-style callbacks: the owner asks how many periods
/// elapsed and does the work itself, so stopping is just `stop()` and no
/// detached timer can outlive its owner.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    next_due: Option<Duration>,
}

impl Cadence {
    /// Creates a stopped cadence. A zero period is clamped to 1ms.
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            next_due: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Arms the cadence; the first period elapses at `now + period`.
    pub fn start(&mut self, now: Duration) {
        self.next_due = Some(now + self.period);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// Returns the number of whole periods that elapsed since the last poll.
    ///
    /// A stopped cadence always returns 0.
    pub fn poll(&mut self, now: Duration) -> u32 {
        let Some(mut due) = self.next_due else {
            return 0;
        };

        let mut fired = 0;
        while due <= now {
            fired += 1;
            due += self.period;
        }
        self.next_due = Some(due);
        fired
    }
}
