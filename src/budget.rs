//! Global, process-wide request budget: the one piece of shared mutable
//! state touched on the hot path (spec §5).

use crate::limits::Mode;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Consulted by every request-initiation site before starting a new
/// request. `counter` and `last_progress_print` each sit on their own
/// cache line so the hot increment never false-shares with anything else.
pub(crate) struct RunBudget {
    counter: CachePadded<AtomicU64>,
    last_progress_print: CachePadded<AtomicI64>,
    mode: Mode,
    quiet: bool,
    start: Instant,
    progress_step: u64,
}

/// Whether the caller that just incremented the counter may start a
/// request, and whether it happens to be the one that should print a
/// progress line.
pub(crate) struct BudgetDecision {
    pub(crate) proceed: bool,
    pub(crate) progress_line: Option<String>,
}

impl RunBudget {
    pub(crate) fn new(mode: Mode, quiet: bool) -> Self {
        let progress_step = match mode {
            Mode::Count { num_requests } => (num_requests / 4).min(50_000),
            _ => 0,
        };
        Self {
            counter: CachePadded::new(AtomicU64::new(0)),
            last_progress_print: CachePadded::new(AtomicI64::new(0)),
            mode,
            quiet,
            start: Instant::now(),
            progress_step,
        }
    }

    pub(crate) fn start(&self) -> Instant {
        self.start
    }

    /// Current counter value without incrementing — used by the
    /// aggregator's invariant checks, never on the hot path.
    pub(crate) fn observed_count(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Non-incrementing peek at whether the run's stop condition has
    /// already tripped. Used by the heartbeat to decide when to start
    /// draining; the hot path always goes through
    /// [`Self::more_requests_to_run`] instead.
    pub(crate) fn is_past_deadline(&self) -> bool {
        match self.mode {
            Mode::Infinite => false,
            Mode::Time { run_time } => self.start.elapsed() >= run_time,
            Mode::Count { num_requests } => self.observed_count() >= num_requests,
        }
    }

    /// Atomically claims the next request slot and decides whether the
    /// caller may proceed. Matches `more_requests_to_run`'s increment-then-
    /// branch ordering (`httpress.c`).
    pub(crate) fn more_requests_to_run(&self) -> BudgetDecision {
        let rc = self.counter.fetch_add(1, Ordering::AcqRel) + 1;

        match self.mode {
            Mode::Infinite => BudgetDecision { proceed: true, progress_line: None },
            Mode::Time { run_time } => {
                let elapsed = self.start.elapsed();
                if elapsed >= run_time {
                    return BudgetDecision { proceed: false, progress_line: None };
                }
                let progress_line = self.time_mode_progress_line(elapsed, rc);
                BudgetDecision { proceed: true, progress_line }
            }
            Mode::Count { num_requests } => {
                if rc > num_requests {
                    return BudgetDecision { proceed: false, progress_line: None };
                }
                let progress_line = (!self.quiet
                    && self.progress_step >= 10
                    && (rc % self.progress_step == 0 || rc == num_requests))
                    .then(|| format!("{rc} requests launched"));
                BudgetDecision { proceed: true, progress_line }
            }
        }
    }

    fn time_mode_progress_line(&self, elapsed: std::time::Duration, rc: u64) -> Option<String> {
        if self.quiet {
            return None;
        }
        let now_secs = elapsed.as_secs() as i64;
        let previous = self.last_progress_print.load(Ordering::Relaxed);
        if now_secs - previous <= 4 {
            return None;
        }
        if self
            .last_progress_print
            .compare_exchange(previous, now_secs, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            // Another worker just printed; skip rather than double-print.
            return None;
        }
        Some(format!("{now_secs} sec:  {rc} requests launched"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_mode_stops_exactly_at_limit() {
        let budget = RunBudget::new(Mode::Count { num_requests: 3 }, true);
        assert!(budget.more_requests_to_run().proceed);
        assert!(budget.more_requests_to_run().proceed);
        assert!(budget.more_requests_to_run().proceed);
        assert!(!budget.more_requests_to_run().proceed);
    }

    #[test]
    fn infinite_mode_never_stops() {
        let budget = RunBudget::new(Mode::Infinite, true);
        for _ in 0..1000 {
            assert!(budget.more_requests_to_run().proceed);
        }
    }

    #[test]
    fn counter_is_strictly_increasing_and_observed_once_each() {
        let budget = RunBudget::new(Mode::Count { num_requests: 1_000 }, true);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1_000 {
            let rc = budget.counter.fetch_add(0, Ordering::Relaxed);
            let decision = budget.more_requests_to_run();
            assert!(decision.proceed);
            assert!(seen.insert(rc + 1));
        }
    }

    #[test]
    fn progress_step_suppressed_when_small() {
        let budget = RunBudget::new(Mode::Count { num_requests: 20 }, false);
        // progress_step = 20/4 = 5, below the `>= 10` threshold: no lines.
        for _ in 0..20 {
            assert!(budget.more_requests_to_run().progress_line.is_none());
        }
    }
}
