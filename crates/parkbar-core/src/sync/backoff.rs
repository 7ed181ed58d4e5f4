use embassy_time::{Duration, Instant};

/// Retry timing of one backend channel
///
/// While healthy the channel runs every `base`. After `n` consecutive
/// failures the next attempt waits `base * 2^(n-1)`, capped at
/// `base * max_factor`. The first success drops back to `base`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    consecutive_failures: u32,
    next_attempt_at: Instant,
}

impl Backoff {
    /// New schedule whose first attempt is due at `first_attempt_at`
    pub fn new(base: Duration, max_factor: u32, first_attempt_at: Instant) -> Self {
        Self {
            base,
            max: base * max_factor.max(1),
            consecutive_failures: 0,
            next_attempt_at: first_attempt_at,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_attempt_at
    }

    /// Delay applied after the current number of failures
    pub fn current_interval(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return self.base;
        }
        let exponent = (self.consecutive_failures - 1).min(32);
        let ticks = self.base.as_ticks().saturating_mul(1u64 << exponent);
        Duration::from_ticks(ticks).min(self.max)
    }

    pub fn record_success(&mut self, now: Instant) {
        self.consecutive_failures = 0;
        self.next_attempt_at = now + self.base;
    }

    /// Register a failed attempt and return the delay until the next one
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay = self.current_interval();
        self.next_attempt_at = now + delay;
        delay
    }

    /// Make the next attempt due immediately unless the channel is backing off
    pub fn expedite(&mut self, now: Instant) {
        if self.consecutive_failures == 0 && self.next_attempt_at > now {
            self.next_attempt_at = now;
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn next_attempt_at(&self) -> Instant {
        self.next_attempt_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn doubles_from_base_and_caps() {
        let mut backoff = Backoff::new(secs(30), 8, Instant::from_secs(0));
        let now = Instant::from_secs(100);

        let delays: Vec<Duration> = (0..6).map(|_| backoff.record_failure(now)).collect();

        assert_eq!(
            delays,
            [secs(30), secs(60), secs(120), secs(240), secs(240), secs(240)]
        );
        assert_eq!(backoff.next_attempt_at(), now + secs(240));
    }

    #[test]
    fn never_decreases_while_failing() {
        let mut backoff = Backoff::new(Duration::from_millis(10_000), 4, Instant::from_secs(0));
        let mut previous = Duration::from_ticks(0);

        for i in 0..40 {
            let delay = backoff.record_failure(Instant::from_secs(i));
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn success_resets_to_base() {
        let mut backoff = Backoff::new(secs(10), 8, Instant::from_secs(0));
        backoff.record_failure(Instant::from_secs(0));
        backoff.record_failure(Instant::from_secs(10));

        backoff.record_success(Instant::from_secs(30));

        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.current_interval(), secs(10));
        assert_eq!(backoff.next_attempt_at(), Instant::from_secs(40));
    }

    #[test]
    fn expedite_respects_backoff() {
        let mut backoff = Backoff::new(secs(30), 8, Instant::from_secs(0));
        backoff.record_success(Instant::from_secs(0));
        backoff.expedite(Instant::from_secs(5));
        assert!(backoff.is_due(Instant::from_secs(5)));

        backoff.record_failure(Instant::from_secs(5));
        backoff.expedite(Instant::from_secs(6));
        assert!(!backoff.is_due(Instant::from_secs(6)));
    }
}
