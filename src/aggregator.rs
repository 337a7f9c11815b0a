//! Combines every worker's final counters into the run-wide totals the
//! report prints (`real_concurrency` included).

use crate::engine::worker::WorkerReport;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Totals {
    pub(crate) num_connect: u64,
    pub(crate) num_success: u64,
    pub(crate) num_fail: u64,
    pub(crate) num_bytes_received: u64,
    pub(crate) num_overhead_received: u64,
    pub(crate) real_concurrency: u64,
    pub(crate) real_concurrency_threshold_hit: u64,
}

/// Sums every worker's counters and classifies per-connection
/// `success_count`s against the original tool's two concurrency
/// estimates: any success at all, and success counts clearing
/// `max(2, num_requests / num_connections / 10)`.
pub(crate) fn aggregate(reports: &[WorkerReport], num_requests: u64, num_connections: u64) -> Totals {
    let threshold = (num_requests / num_connections.max(1) / 10).max(2);

    let mut totals = Totals::default();
    for report in reports {
        totals.num_connect += report.num_connect;
        totals.num_success += report.num_success;
        totals.num_fail += report.num_fail;
        totals.num_bytes_received += report.num_bytes_received;
        totals.num_overhead_received += report.num_overhead_received;
        for &success_count in &report.per_connection_success {
            if success_count > 0 {
                totals.real_concurrency += 1;
            }
            if success_count >= threshold {
                totals.real_concurrency_threshold_hit += 1;
            }
        }
    }
    totals
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Rates {
    pub(crate) rps: f64,
    pub(crate) kbps: u64,
    pub(crate) avg_req_time: Duration,
}

/// Derives throughput figures from `totals` over `elapsed`, matching the
/// original's `rps`/`kbps`/`avg_req_time` formulas (`avg_req_time` scaled
/// by `num_connections`, the concurrency level, not `num_threads`).
pub(crate) fn rates(totals: &Totals, elapsed: Duration, num_connections: u64) -> Rates {
    let elapsed_secs = elapsed.as_secs_f64().max(0.00001);
    let rps = totals.num_success as f64 / elapsed_secs;
    let kbps = ((totals.num_bytes_received + totals.num_overhead_received) as f64 / elapsed_secs / 1024.0) as u64;
    let avg_req_time = if totals.num_success > 0 {
        Duration::from_secs_f64(elapsed_secs * num_connections as f64 / totals.num_success as f64)
    } else {
        Duration::ZERO
    };
    Rates { rps, kbps, avg_req_time }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(connect: u64, success: u64, fail: u64, per_conn: Vec<u64>) -> WorkerReport {
        WorkerReport {
            num_success: success,
            num_fail: fail,
            num_bytes_received: success * 100,
            num_overhead_received: success * 10,
            num_connect: connect,
            per_connection_success: per_conn,
        }
    }

    #[test]
    fn sums_counters_across_workers() {
        let reports = vec![report(2, 10, 1, vec![5, 5]), report(2, 8, 0, vec![4, 4])];
        let totals = aggregate(&reports, 100, 4);
        assert_eq!(totals.num_connect, 4);
        assert_eq!(totals.num_success, 18);
        assert_eq!(totals.num_fail, 1);
    }

    #[test]
    fn real_concurrency_counts_any_success() {
        let reports = vec![report(2, 5, 0, vec![0, 5])];
        let totals = aggregate(&reports, 100, 2);
        assert_eq!(totals.real_concurrency, 1);
    }

    #[test]
    fn threshold_floor_is_at_least_two() {
        let reports = vec![report(1, 3, 0, vec![1])];
        // num_requests/num_connections/10 == 0 here, so the threshold floors to 2.
        let totals = aggregate(&reports, 10, 1);
        assert_eq!(totals.real_concurrency_threshold_hit, 0);
    }

    #[test]
    fn rates_fall_back_to_zero_avg_when_nothing_succeeded() {
        let totals = Totals::default();
        let r = rates(&totals, Duration::from_secs(5), 4);
        assert_eq!(r.avg_req_time, Duration::ZERO);
        assert_eq!(r.rps, 0.0);
    }
}
