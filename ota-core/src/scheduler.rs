use std::time::{Duration, Instant};

/// Fixed-period check timer.
///
/// Every check resets the timer the same way whatever its outcome; there
/// is no backoff. With periodic checks off only manual triggers run.
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
    last_check: Option<Instant>,
    periodic: bool,
}

impl Scheduler {
    /// The first periodic check comes one `interval` after `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_check: Some(now),
            periodic: true,
        }
    }

    pub fn periodic(mut self, enabled: bool) -> Self {
        self.periodic = enabled;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_check(&self) -> Option<Instant> {
        self.last_check
    }

    /// Forget the last check so the next connected tick runs one.
    pub fn trigger_now(&mut self) {
        log::info!("Manual update check requested");
        self.last_check = None;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_check {
            None => true,
            Some(last) => self.periodic && now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// `None` while only a manual trigger can make a check due.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        match self.last_check {
            None => Some(Duration::ZERO),
            Some(_) if !self.periodic => None,
            Some(last) => Some(
                self.interval
                    .saturating_sub(now.saturating_duration_since(last)),
            ),
        }
    }

    /// Run `check` if connected and due, stamping the timer with `now`.
    pub fn tick<F, R>(&mut self, now: Instant, connected: bool, check: F) -> Option<R>
    where
        F: FnOnce() -> R,
    {
        if !connected || !self.is_due(now) {
            return None;
        }
        self.last_check = Some(now);
        Some(check())
    }
}
