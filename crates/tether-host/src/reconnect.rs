//! Sliding-window restart budget.

use std::time::{Duration, Instant};

/// Decides whether another restart is permitted.
///
/// The ledger holds the instants of recent restarts. Entries older than the
/// window are pruned before each decision, so the budget refills as old
/// failures age out.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_restarts: u32,
    window: Duration,
    ledger: Vec<Instant>,
}

impl ReconnectPolicy {
    /// Creates a policy allowing `max_restarts` restarts per `window`.
    #[must_use]
    pub const fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            ledger: Vec::new(),
        }
    }

    /// Returns `true` if a restart is permitted now.
    pub fn can_restart(&mut self) -> bool {
        self.can_restart_at(Instant::now())
    }

    /// Returns `true` if a restart is permitted at `now`.
    pub fn can_restart_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.ledger.len() < usize::try_from(self.max_restarts).unwrap_or(usize::MAX)
    }

    /// Records a restart taking place now.
    pub fn record_restart(&mut self) {
        self.record_restart_at(Instant::now());
    }

    /// Records a restart taking place at `now`, then prunes aged entries.
    pub fn record_restart_at(&mut self, now: Instant) {
        self.ledger.push(now);
        self.prune(now);
    }

    /// Clears the ledger, restoring the full budget.
    pub fn reset(&mut self) {
        self.ledger.clear();
    }

    /// Restarts currently counted against the budget.
    #[must_use]
    pub const fn restart_count(&self) -> usize {
        self.ledger.len()
    }

    fn prune(&mut self, now: Instant) {
        // Before the window has fully elapsed since process start nothing can
        // have aged out.
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        self.ledger.retain(|restart| *restart > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[rstest]
    fn budget_is_exhausted_within_window() {
        let mut policy = ReconnectPolicy::new(3, WINDOW);
        let base = Instant::now();

        for offset in 0..3 {
            let at = base + Duration::from_secs(offset);
            assert!(policy.can_restart_at(at));
            policy.record_restart_at(at);
        }

        assert!(!policy.can_restart_at(base + Duration::from_secs(2)));
        assert_eq!(policy.restart_count(), 3);
    }

    #[rstest]
    fn budget_refills_as_entries_age_out() {
        let mut policy = ReconnectPolicy::new(3, WINDOW);
        let base = Instant::now();
        for offset in 0..3 {
            policy.record_restart_at(base + Duration::from_secs(offset));
        }

        // Strict pruning at base + 61s keeps only the entry recorded at base + 2s.
        assert!(policy.can_restart_at(base + Duration::from_secs(61)));
        assert_eq!(policy.restart_count(), 1);
    }

    #[rstest]
    fn recording_prunes_aged_entries() {
        let mut policy = ReconnectPolicy::new(3, WINDOW);
        let base = Instant::now();
        policy.record_restart_at(base);
        policy.record_restart_at(base + Duration::from_secs(1));

        policy.record_restart_at(base + WINDOW + Duration::from_secs(1));

        assert_eq!(policy.restart_count(), 1);
    }

    #[rstest]
    fn entry_exactly_at_window_edge_is_pruned() {
        let mut policy = ReconnectPolicy::new(1, WINDOW);
        let base = Instant::now();
        policy.record_restart_at(base);

        assert!(!policy.can_restart_at(base + Duration::from_secs(59)));
        assert!(policy.can_restart_at(base + WINDOW));
    }

    #[rstest]
    fn zero_budget_never_restarts() {
        let mut policy = ReconnectPolicy::new(0, WINDOW);

        assert!(!policy.can_restart());
    }

    #[rstest]
    fn reset_restores_budget() {
        let mut policy = ReconnectPolicy::new(2, WINDOW);
        policy.record_restart();
        policy.record_restart();
        assert!(!policy.can_restart());

        policy.reset();

        assert!(policy.can_restart());
        assert_eq!(policy.restart_count(), 0);
    }
}
