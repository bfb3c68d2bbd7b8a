use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Sliding-window error rate over collaborator calls
///
/// Every call the orchestrator makes (market data, ranking, signals,
/// executor, account state) is recorded as a success or failure. The rate
/// feeds the API error-rate circuit breaker.
#[derive(Debug)]
pub struct ErrorRateTracker {
    window: Duration,
    min_samples: usize,
    outcomes: Mutex<VecDeque<(DateTime<Utc>, bool)>>,
}

impl ErrorRateTracker {
    pub fn new(window_secs: u64, min_samples: usize) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            min_samples,
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record_success(&self, at: DateTime<Utc>) {
        self.record(at, true);
    }

    pub fn record_failure(&self, at: DateTime<Utc>) {
        self.record(at, false);
    }

    fn record(&self, at: DateTime<Utc>, ok: bool) {
        let mut outcomes = match self.outcomes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        outcomes.push_back((at, ok));
        Self::evict(&mut outcomes, at - self.window);
    }

    fn evict(outcomes: &mut VecDeque<(DateTime<Utc>, bool)>, cutoff: DateTime<Utc>) {
        while outcomes.front().is_some_and(|(t, _)| *t < cutoff) {
            outcomes.pop_front();
        }
    }

    /// Failure percentage within the window ending at `now`.
    /// None until at least `min_samples` calls were observed.
    pub fn rate_at(&self, now: DateTime<Utc>) -> Option<f64> {
        let mut outcomes = match self.outcomes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::evict(&mut outcomes, now - self.window);

        let total = outcomes.len();
        if total == 0 || total < self.min_samples {
            return None;
        }

        let failures = outcomes.iter().filter(|(_, ok)| !ok).count();
        Some(failures as f64 / total as f64 * 100.0)
    }

    pub fn sample_count(&self) -> usize {
        match self.outcomes.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for ErrorRateTracker {
    fn default() -> Self {
        Self::new(15 * 60, 10)
    }
}
